//! Wire codec for the served Modbus subset: read holding/input registers
//! over TCP (MBAP) and RTU (CRC16). Everything else is answered with an
//! IllegalFunction exception — the register space is read-only.

use crate::prelude::*;

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Response PDU limit of 253 bytes caps one read at 125 registers.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Transaction(2) + protocol(2) + length(2) + unit(1).
pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_PDU_SIZE: usize = 253;

/// Unit id a Modbus-TCP master may use when it does not address a specific
/// slave.
pub const TCP_DONT_CARE_UNIT: u8 = 0xFF;

/// Fixed length of the RTU read-request frame (and of the single-write
/// frames we answer with an exception).
pub const RTU_REQUEST_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub function: u8,
    pub addr: u16,
    pub count: u16,
}

/// A decoded request PDU addressed to this slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Read(ReadRequest),
    /// Well-formed frame for a function the slave does not serve.
    Unsupported { function: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction: u16,
    pub length: u16,
    pub unit_id: u8,
}

pub fn decode_mbap_header(bytes: &[u8; MBAP_HEADER_LEN]) -> Result<MbapHeader, Error> {
    let protocol = u16::from_be_bytes([bytes[2], bytes[3]]);
    if protocol != 0 {
        return Err(Error::protocol(format!(
            "unexpected MBAP protocol id {}",
            protocol
        )));
    }

    let length = u16::from_be_bytes([bytes[4], bytes[5]]);
    if length < 2 || length as usize > 1 + MAX_PDU_SIZE {
        return Err(Error::protocol(format!("invalid MBAP length {}", length)));
    }

    Ok(MbapHeader {
        transaction: u16::from_be_bytes([bytes[0], bytes[1]]),
        length,
        unit_id: bytes[6],
    })
}

pub fn decode_request_pdu(pdu: &[u8]) -> Result<Request, Error> {
    if pdu.is_empty() {
        return Err(Error::protocol("empty request PDU"));
    }

    let function = pdu[0];
    match function {
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            if pdu.len() != 5 {
                return Err(Error::protocol(format!(
                    "read request PDU has {} bytes",
                    pdu.len()
                )));
            }
            Ok(Request::Read(ReadRequest {
                function,
                addr: u16::from_be_bytes([pdu[1], pdu[2]]),
                count: u16::from_be_bytes([pdu[3], pdu[4]]),
            }))
        }
        _ => Ok(Request::Unsupported { function }),
    }
}

pub fn encode_tcp_response(
    transaction: u16,
    unit_id: u8,
    function: u8,
    words: &[u16],
) -> Vec<u8> {
    let byte_count = words.len() * 2;
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 2 + byte_count);
    frame.extend_from_slice(&transaction.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&((3 + byte_count) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.push(function);
    frame.push(byte_count as u8);
    for word in words {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    frame
}

pub fn encode_tcp_exception(transaction: u16, unit_id: u8, function: u8, code: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 2);
    frame.extend_from_slice(&transaction.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&3u16.to_be_bytes());
    frame.push(unit_id);
    frame.push(function | 0x80);
    frame.push(code);
    frame
}

pub fn crc(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// Decode one fixed-length RTU frame. The unit id is returned alongside so
/// the caller can silently ignore frames for other slaves.
pub fn decode_rtu_request(frame: &[u8; RTU_REQUEST_LEN]) -> Result<(u8, Request), Error> {
    let received = u16::from_le_bytes([frame[6], frame[7]]);
    if crc(&frame[..6]) != received {
        return Err(Error::protocol("RTU frame CRC mismatch"));
    }

    let request = decode_request_pdu(&frame[1..6])?;
    Ok((frame[0], request))
}

pub fn encode_rtu_response(unit_id: u8, function: u8, words: &[u16]) -> Vec<u8> {
    let byte_count = words.len() * 2;
    let mut frame = Vec::with_capacity(3 + byte_count + 2);
    frame.push(unit_id);
    frame.push(function);
    frame.push(byte_count as u8);
    for word in words {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    let checksum = crc(&frame);
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame
}

pub fn encode_rtu_exception(unit_id: u8, function: u8, code: u8) -> Vec<u8> {
    let mut frame = vec![unit_id, function | 0x80, code];
    let checksum = crc(&frame);
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_known_vector() {
        // Read holding register 0, count 1, unit 1: wire CRC bytes 84 0A.
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc(&frame).to_le_bytes(), [0x84, 0x0A]);
    }

    #[test]
    fn mbap_header_round_trip() {
        let header = decode_mbap_header(&[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01]).unwrap();
        assert_eq!(header.transaction, 0x1234);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 1);
    }

    #[test]
    fn mbap_header_rejects_wrong_protocol() {
        assert!(decode_mbap_header(&[0, 1, 0, 1, 0, 6, 1]).is_err());
    }

    #[test]
    fn read_request_pdu() {
        let request = decode_request_pdu(&[0x03, 0x9C, 0x40, 0x00, 0x42]).unwrap();
        assert_eq!(
            request,
            Request::Read(ReadRequest {
                function: 0x03,
                addr: 40000,
                count: 66,
            })
        );
    }

    #[test]
    fn write_request_is_unsupported() {
        let request = decode_request_pdu(&[0x06, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(request, Request::Unsupported { function: 0x06 });
    }

    #[test]
    fn rtu_request_round_trip() {
        let mut frame = [0x01, 0x04, 0x9C, 0x40, 0x00, 0x02, 0, 0];
        let checksum = crc(&frame[..6]).to_le_bytes();
        frame[6] = checksum[0];
        frame[7] = checksum[1];

        let (unit, request) = decode_rtu_request(&frame).unwrap();
        assert_eq!(unit, 1);
        assert_eq!(
            request,
            Request::Read(ReadRequest {
                function: 0x04,
                addr: 40000,
                count: 2,
            })
        );
    }

    #[test]
    fn rtu_bad_crc_rejected() {
        let frame = [0x01, 0x04, 0x9C, 0x40, 0x00, 0x02, 0xDE, 0xAD];
        assert!(decode_rtu_request(&frame).is_err());
    }

    #[test]
    fn tcp_response_layout() {
        let frame = encode_tcp_response(7, 1, 0x03, &[0x5375, 0x6E53]);
        assert_eq!(
            frame,
            vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x53, 0x75, 0x6E, 0x53]
        );
    }

    #[test]
    fn tcp_exception_layout() {
        let frame = encode_tcp_exception(7, 1, 0x06, EXCEPTION_ILLEGAL_FUNCTION);
        assert_eq!(frame[7], 0x86);
        assert_eq!(frame[8], 0x01);
    }

    #[test]
    fn rtu_response_crc_is_valid() {
        let frame = encode_rtu_response(1, 0x03, &[0x1234]);
        assert_eq!(crc(&frame), 0);
    }
}
