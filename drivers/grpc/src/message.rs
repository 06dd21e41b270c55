use bytes::{BufMut, Bytes, BytesMut};

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;

/// Hand-encodes flat protobuf messages of string, integer and double fields.
///
/// Load scenarios send small request messages whose schemas are owned by the target; encoding
/// them by field number avoids compiling the target's proto files into every scenario binary.
/// Nested messages can be built separately and attached with [MessageBuilder::bytes].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, field: u32, value: &str) -> Self {
        self.put_key(field, WIRE_LEN);
        self.put_varint(value.len() as u64);
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// A length-delimited field holding pre-encoded bytes, typically a nested message.
    pub fn bytes(mut self, field: u32, value: &[u8]) -> Self {
        self.put_key(field, WIRE_LEN);
        self.put_varint(value.len() as u64);
        self.buf.put_slice(value);
        self
    }

    pub fn uint(mut self, field: u32, value: u64) -> Self {
        self.put_key(field, WIRE_VARINT);
        self.put_varint(value);
        self
    }

    pub fn double(mut self, field: u32, value: f64) -> Self {
        self.put_key(field, WIRE_FIXED64);
        self.buf.put_u64_le(value.to_bits());
        self
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }

    fn put_key(&mut self, field: u32, wire_type: u32) {
        self.put_varint(((field << 3) | wire_type) as u64);
    }

    fn put_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn string_field_uses_length_delimited_wire_format() {
        // grpc.health.v1.HealthCheckRequest { service = "svc" }
        let message = MessageBuilder::new().string(1, "svc").build();
        assert_eq!(message.as_ref(), b"\x0a\x03svc");
    }

    #[test]
    fn varints_span_multiple_bytes() {
        let message = MessageBuilder::new().uint(2, 300).build();
        assert_eq!(message.as_ref(), &[0x10, 0xac, 0x02]);
    }

    #[test]
    fn double_is_little_endian_fixed64() {
        let message = MessageBuilder::new().double(3, 1.0).build();
        assert_eq!(message.as_ref(), &[0x19, 0, 0, 0, 0, 0, 0, 0xf0, 0x3f]);
    }

    #[test]
    fn nested_message_round_trips_as_bytes() {
        let inner = MessageBuilder::new().uint(1, 7).build();
        let outer = MessageBuilder::new().bytes(2, &inner).build();
        assert_eq!(outer.as_ref(), &[0x12, 0x02, 0x08, 0x07]);
    }
}
