//! gRPC driver for Slipstream scenarios, built on [tonic].
//!
//! The driver is schema-free: it sends unary calls addressed by full service and method name,
//! with the message supplied as already-encoded protobuf bytes. Scenarios assemble simple
//! request messages with [MessageBuilder] instead of carrying generated client stubs for every
//! service they exercise.

mod codec;
mod message;

use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use http::uri::PathAndQuery;
use slipstream_runner::prelude::{Outcome, ProtocolDriver};
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};

pub use message::MessageBuilder;

const GRPC_ADDR_ENV: &str = "GRPC_ADDR";
const DEFAULT_GRPC_ADDR: &str = "localhost:50051";

/// Where the driver sends its traffic: `$GRPC_ADDR`, or a local default.
pub fn grpc_addr() -> String {
    std::env::var(GRPC_ADDR_ENV).unwrap_or_else(|_| DEFAULT_GRPC_ADDR.to_string())
}

/// One unary call against the target.
#[derive(Clone, Debug)]
pub struct RpcRequest {
    service: String,
    method: String,
    message: Bytes,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            message: Bytes::new(),
        }
    }

    pub fn message(mut self, message: Bytes) -> Self {
        self.message = message;
        self
    }

    fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// gRPC realization of [ProtocolDriver]. The channel multiplexes all VUs of a run over a
/// small number of HTTP/2 connections, the way production gRPC clients behave.
#[derive(Clone, Debug)]
pub struct RpcDriver {
    channel: Channel,
}

impl RpcDriver {
    /// Connect lazily to `$GRPC_ADDR`. The connection is established on first use, so this is
    /// safe to call from synchronous setup code.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_addr(grpc_addr())
    }

    pub fn with_addr(addr: impl AsRef<str>) -> anyhow::Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{}", addr.as_ref()))
            .context("Invalid gRPC address")?
            .connect_timeout(Duration::from_secs(5))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(30));
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }
}

impl ProtocolDriver for RpcDriver {
    type Request = RpcRequest;

    async fn invoke(&self, request: RpcRequest) -> anyhow::Result<Outcome> {
        let path = PathAndQuery::try_from(request.path())
            .with_context(|| format!("Invalid method path {}", request.path()))?;

        let mut grpc = Grpc::new(self.channel.clone());
        let started = Instant::now();

        if let Err(e) = grpc.ready().await {
            return Ok(Outcome {
                status: tonic::Code::Unavailable as i32 as u16,
                latency: started.elapsed(),
                payload: Bytes::new(),
                error: Some(format!("channel not ready: {e}")),
            });
        }

        match grpc
            .unary(tonic::Request::new(request.message), path, codec::RawCodec)
            .await
        {
            Ok(response) => Ok(Outcome {
                status: 0,
                latency: started.elapsed(),
                payload: response.into_inner(),
                error: None,
            }),
            Err(status) => Ok(Outcome {
                status: status.code() as i32 as u16,
                latency: started.elapsed(),
                payload: Bytes::new(),
                error: Some(format!("{}: {}", status.code(), status.message())),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_is_service_slash_method() {
        let request = RpcRequest::new("grpc.health.v1.Health", "Check");
        assert_eq!(request.path(), "/grpc.health.v1.Health/Check");
        assert!(PathAndQuery::try_from(request.path()).is_ok());
    }

    #[test]
    fn default_address_is_local() {
        // Only assert the fallback shape; the env var is owned by the harness when set.
        if std::env::var(GRPC_ADDR_ENV).is_err() {
            assert_eq!(grpc_addr(), DEFAULT_GRPC_ADDR);
        }
    }
}
