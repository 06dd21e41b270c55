use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

/// The result of one logical request against the system under test.
///
/// The engine treats the payload as opaque; scenario code parses it when it needs a
/// correlated value (such as an auth token) for a later call.
#[derive(Clone, Debug)]
pub struct Outcome {
    /// HTTP status code, or the numeric RPC status code for RPC drivers (0 = OK).
    pub status: u16,
    pub latency: Duration,
    pub payload: Bytes,
    /// Transport-level or protocol-level error. RPC drivers set this for any non-OK status.
    pub error: Option<String>,
}

impl Outcome {
    /// Whether the system under test failed to serve this request: a transport error, an RPC
    /// error code, or an HTTP 4xx/5xx.
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.status >= 400
    }

    pub fn ok(&self) -> bool {
        !self.failed()
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1_000.0
    }
}

/// Executes one logical request against the system under test.
///
/// The core never constructs protocol-specific payloads: the request type is chosen by the
/// driver and supplied by scenario code as opaque data.
pub trait ProtocolDriver: Send + Sync {
    type Request: Send;

    fn invoke(
        &self,
        request: Self::Request,
    ) -> impl Future<Output = anyhow::Result<Outcome>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: u16, error: Option<&str>) -> Outcome {
        Outcome {
            status,
            latency: Duration::from_millis(10),
            payload: Bytes::new(),
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn http_failure_classification() {
        assert!(outcome(200, None).ok());
        assert!(outcome(201, None).ok());
        assert!(outcome(404, None).failed());
        assert!(outcome(500, None).failed());
        assert!(outcome(200, Some("connection reset")).failed());
    }

    #[test]
    fn rpc_failure_classification() {
        // RPC drivers report low status codes but set the error field on failure.
        assert!(outcome(0, None).ok());
        assert!(outcome(14, Some("unavailable")).failed());
    }
}
