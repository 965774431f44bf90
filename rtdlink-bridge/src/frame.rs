//! Modbus RTU framing for the "read input registers" request.
//!
//! ```text
//! request:  unit(1) fn(1) start(2, BE) count(2, BE) crc(2, LE)
//! response: unit(1) fn(1) byte_count(1) payload(byte_count) crc(2, LE)
//! ```

use crate::error::FrameError;

/// Function code for "read input registers".
pub const READ_INPUT_REGISTERS: u8 = 0x04;

/// Unit id, function code and byte count.
pub const HEADER_LEN: usize = 3;

/// Trailing CRC16.
pub const CRC_LEN: usize = 2;

/// Smallest response that can carry a header and a checksum.
pub const MIN_RESPONSE_LEN: usize = 5;

/// Encoded request length.
pub const REQUEST_LEN: usize = 8;

const CRC_SEED: u16 = 0xFFFF;
const CRC_POLYNOMIAL: u16 = 0xA001;

/// Compute the Modbus CRC16 of `data`, packed little-endian.
pub fn crc16(data: &[u8]) -> [u8; 2] {
    let mut crc = CRC_SEED;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC_POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.to_le_bytes()
}

/// A read request. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    unit_id: u8,
    function_code: u8,
    start_address: u16,
    count: u16,
}

impl RequestFrame {
    pub fn new(unit_id: u8, function_code: u8, start_address: u16, count: u16) -> Self {
        Self {
            unit_id,
            function_code,
            start_address,
            count,
        }
    }

    /// A "read input registers" request.
    pub fn read_input_registers(unit_id: u8, start_address: u16, count: u16) -> Self {
        Self::new(unit_id, READ_INPUT_REGISTERS, start_address, count)
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Encode to wire bytes, checksum included.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let [start_hi, start_lo] = self.start_address.to_be_bytes();
        let [count_hi, count_lo] = self.count.to_be_bytes();
        let body = [
            self.unit_id,
            self.function_code,
            start_hi,
            start_lo,
            count_hi,
            count_lo,
        ];
        let [crc_lo, crc_hi] = crc16(&body);

        let mut frame = [0u8; REQUEST_LEN];
        frame[..6].copy_from_slice(&body);
        frame[6] = crc_lo;
        frame[7] = crc_hi;
        frame
    }
}

/// Build the wire bytes of a request.
pub fn build_request(
    unit_id: u8,
    function_code: u8,
    start_address: u16,
    count: u16,
) -> [u8; REQUEST_LEN] {
    RequestFrame::new(unit_id, function_code, start_address, count).encode()
}

/// A validated response, borrowing the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    bytes: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    pub fn unit_id(&self) -> u8 {
        self.bytes[0]
    }

    pub fn function_code(&self) -> u8 {
        self.bytes[1]
    }

    pub fn byte_count(&self) -> usize {
        usize::from(self.bytes[2])
    }

    /// Register payload, without header and checksum.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[HEADER_LEN..self.bytes.len() - CRC_LEN]
    }

    pub fn checksum(&self) -> [u8; 2] {
        let n = self.bytes.len();
        [self.bytes[n - 2], self.bytes[n - 1]]
    }

    /// Decode `count` registers as scaled values.
    pub fn registers(&self, count: usize) -> Vec<f64> {
        decode_registers(self.bytes, count)
    }
}

/// Validate a response against the request that produced it.
///
/// Checks run in order: length, checksum, unit/function echo, byte count.
pub fn validate_response(
    bytes: &[u8],
    expected_unit: u8,
    expected_function: u8,
    expected_count: u16,
) -> Result<ResponseFrame<'_>, FrameError> {
    if bytes.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::ShortFrame { len: bytes.len() });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CRC_LEN);
    let expected_crc = crc16(body);
    if trailer != expected_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: u16::from_le_bytes(expected_crc),
            received: u16::from_le_bytes([trailer[0], trailer[1]]),
        });
    }

    if bytes[0] != expected_unit || bytes[1] != expected_function {
        return Err(FrameError::UnitOrFunctionMismatch {
            expected_unit,
            expected_function,
            unit: bytes[0],
            function: bytes[1],
        });
    }

    let expected_bytes = usize::from(expected_count) * 2;
    if usize::from(bytes[2]) != expected_bytes {
        return Err(FrameError::ByteCountMismatch {
            expected: expected_bytes,
            received: usize::from(bytes[2]),
        });
    }

    Ok(ResponseFrame { bytes })
}

/// Decode `count` big-endian registers starting at offset 3, each scaled by 0.1.
///
/// Stops early if `bytes` does not hold `count` complete registers.
pub fn decode_registers(bytes: &[u8], count: usize) -> Vec<f64> {
    bytes
        .get(HEADER_LEN..)
        .unwrap_or_default()
        .chunks_exact(2)
        .take(count)
        .map(|pair| f64::from(u16::from_be_bytes([pair[0], pair[1]])) * 0.1)
        .collect()
}

/// Total frame length announced by a partial response, once the header is in.
pub fn expected_response_len(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    Some(HEADER_LEN + usize::from(buffer[2]) + CRC_LEN)
}

/// Whether `buffer` already holds the whole frame its header announces.
pub fn is_complete(buffer: &[u8]) -> bool {
    expected_response_len(buffer).is_some_and(|len| buffer.len() >= len)
}

/// Build a well-formed response for `values` (device side; used by simulators and tests).
pub fn build_response(unit_id: u8, function_code: u8, values: &[u16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + values.len() * 2 + CRC_LEN);
    frame.push(unit_id);
    frame.push(function_code);
    frame.push((values.len() * 2) as u8);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16(body));
        frame
    }

    #[test]
    fn test_crc_of_empty_input_is_seed() {
        assert_eq!(crc16(&[]), [0xFF, 0xFF]);
    }

    #[test]
    fn test_crc_check_value() {
        // CRC-16/MODBUS check value for "123456789" is 0x4B37.
        assert_eq!(crc16(b"123456789"), [0x37, 0x4B]);
    }

    #[test]
    fn test_build_request_vector() {
        let frame = build_request(1, READ_INPUT_REGISTERS, 0, 8);
        assert_eq!(&frame[..6], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(&frame[6..], &[0xF1, 0xCC]);
        assert_eq!(&frame[6..], &crc16(&frame[..6]));
    }

    #[test]
    fn test_request_frame_fields() {
        let request = RequestFrame::read_input_registers(7, 0x0102, 3);
        assert_eq!(request.function_code(), READ_INPUT_REGISTERS);
        assert_eq!(
            request.encode()[..6],
            [0x07, 0x04, 0x01, 0x02, 0x00, 0x03]
        );
    }

    #[test]
    fn test_checksum_roundtrip_and_bit_flips() {
        let inputs: [&[u8]; 4] = [
            &[0x01, 0x04, 0x02, 0x00, 0x64],
            &[0x11, 0x04, 0x10, 0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00, 0xFF, 0xFF],
            b"sensor array",
            &[0x00],
        ];

        for input in inputs {
            let frame = with_crc(input);
            let (body, trailer) = frame.split_at(input.len());
            assert_eq!(trailer, crc16(body));

            for byte in 0..input.len() {
                for bit in 0..8 {
                    let mut corrupted = frame.clone();
                    corrupted[byte] ^= 1 << bit;
                    let (body, trailer) = corrupted.split_at(input.len());
                    assert_ne!(
                        trailer,
                        crc16(body),
                        "flip of bit {} in byte {} went undetected",
                        bit,
                        byte
                    );
                }
            }
        }
    }

    #[test]
    fn test_validate_accepts_good_frame() {
        let frame = build_response(1, READ_INPUT_REGISTERS, &[100, 300]);
        let response = validate_response(&frame, 1, READ_INPUT_REGISTERS, 2).unwrap();

        assert_eq!(response.unit_id(), 1);
        assert_eq!(response.byte_count(), 4);
        assert_eq!(response.payload(), &[0x00, 0x64, 0x01, 0x2C]);
        assert_eq!(response.checksum(), [0xBA, 0x16]);
        assert_eq!(response.registers(2), vec![10.0, 30.0]);
    }

    #[test]
    fn test_validate_short_frame() {
        let err = validate_response(&[0x01, 0x04, 0x02, 0x00], 1, 4, 1).unwrap_err();
        assert_eq!(err, FrameError::ShortFrame { len: 4 });

        let err = validate_response(&[], 1, 4, 1).unwrap_err();
        assert_eq!(err, FrameError::ShortFrame { len: 0 });
    }

    #[test]
    fn test_validate_checksum_mismatch() {
        let mut frame = build_response(1, READ_INPUT_REGISTERS, &[100]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let err = validate_response(&frame, 1, READ_INPUT_REGISTERS, 1).unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_validate_unit_mismatch() {
        let frame = build_response(2, READ_INPUT_REGISTERS, &[100]);
        let err = validate_response(&frame, 1, READ_INPUT_REGISTERS, 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::UnitOrFunctionMismatch {
                expected_unit: 1,
                expected_function: 4,
                unit: 2,
                function: 4,
            }
        );
    }

    #[test]
    fn test_validate_function_mismatch() {
        // Exception responses set the high bit of the function code.
        let frame = with_crc(&[0x01, 0x84, 0x02, 0x00, 0x00]);
        let err = validate_response(&frame, 1, READ_INPUT_REGISTERS, 1).unwrap_err();
        assert!(matches!(err, FrameError::UnitOrFunctionMismatch { function: 0x84, .. }));
    }

    #[test]
    fn test_validate_byte_count_mismatch() {
        let frame = build_response(1, READ_INPUT_REGISTERS, &[1, 2]);
        let err = validate_response(&frame, 1, READ_INPUT_REGISTERS, 8).unwrap_err();
        assert_eq!(
            err,
            FrameError::ByteCountMismatch {
                expected: 16,
                received: 4
            }
        );
    }

    #[test]
    fn test_decode_registers() {
        let frame = with_crc(&[0x01, 0x04, 0x02, 0x00, 0x64]);
        assert_eq!(decode_registers(&frame, 1), vec![10.0]);
    }

    #[test]
    fn test_decode_registers_short_input() {
        assert_eq!(decode_registers(&[0x01, 0x04, 0x04, 0x00, 0x64], 2), vec![10.0]);
        assert!(decode_registers(&[0x01], 4).is_empty());
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(expected_response_len(&[0x01, 0x04]), None);
        assert_eq!(expected_response_len(&[0x01, 0x04, 0x10]), Some(21));
        assert!(!is_complete(&[0x01, 0x04, 0x02, 0x00, 0x64, 0xB8]));
        assert!(is_complete(&[0x01, 0x04, 0x02, 0x00, 0x64, 0xB8, 0xDB]));
    }
}
