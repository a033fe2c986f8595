use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::sunspec::{AddressClass, RegisterAddress};

/// The largest register count per read that devices universally accept.
///
/// The protocol allows 125, some gateways choke on anything above 123.
pub const MAX_SAFE_READ_COUNT: u16 = 123;

const READ_HOLDING_REGISTERS: u8 = 3;
const READ_INPUT_REGISTERS: u8 = 4;
const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    GetInputs { address: u16, count: u16 },
}

impl Operation {
    pub fn read(address: RegisterAddress, count: u16) -> Self {
        match address.class {
            AddressClass::Holding => Operation::GetHoldings { address: address.offset, count },
            AddressClass::Input => Operation::GetInputs { address: address.offset, count },
        }
    }

    fn function_code(&self) -> u8 {
        match self {
            Operation::GetHoldings { .. } => READ_HOLDING_REGISTERS,
            Operation::GetInputs { .. } => READ_INPUT_REGISTERS,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::Registers { values: _ } => None,
        }
    }

    pub fn is_server_busy(&self) -> bool {
        self.exception_code() == Some(6)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    /// Register values as big-endian byte pairs.
    Registers { values: Vec<u8> },
}

impl ResponseKind {
    pub fn words(values: &[u8]) -> impl Iterator<Item = u16> + '_ {
        values.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Modbus TCP framing: the 7 byte MBAP header followed by the PDU.
pub struct ModbusTCPCodec {}

impl Encoder<Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (Operation::GetHoldings { address, count } | Operation::GetInputs { address, count }) =
            req.operation;
        dst.reserve(12);
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        // Unit id + function code + address + count.
        dst.put_u16(6);
        dst.put_u8(req.device_id);
        dst.put_u8(req.operation.function_code());
        dst.put_u16(address);
        dst.put_u16(count);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            if u16::from_be_bytes(*proto_buffer) != 0 {
                // Not a Modbus frame boundary, resynchronize.
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = usize::from(u16::from_be_bytes(*length_buffer));
            let Some((data, _)) = remainder.split_at_checked(required_length) else {
                return Ok(None);
            };
            let [device_id, function_code, code, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function_code, code) = (*device_id, *function_code, *code);
            let kind = if function_code & EXCEPTION_FLAG != 0 {
                ResponseKind::ErrorCode(code)
            } else {
                match function_code {
                    READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
                        let byte_count = usize::from(code);
                        let Some(values) = payload.get(..byte_count) else {
                            src.advance(1);
                            continue;
                        };
                        ResponseKind::Registers { values: values.to_vec() }
                    }
                    _ => {
                        src.advance(6 + required_length);
                        continue;
                    }
                }
            };
            src.advance(6 + required_length);
            return Ok(Some(Response { device_id, transaction_id, kind }));
        }
    }
}
