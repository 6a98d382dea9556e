//! APDU (Application Protocol Data Unit) handling.
//!
//! Parsing of ISO 7816-4 command APDUs, short and extended forms, plus the
//! class-byte predicates the dispatcher relies on. Chaining is detected from
//! the class byte directly (bit 0x10): platform-provided chaining indicators
//! have been observed to be unreliable, so the check is never delegated.

mod response;
pub mod status;

pub use response::Response;
pub use status::SW;

use thiserror::Error;

/// Errors that can occur while parsing a command APDU.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("body length inconsistent with Lc")]
    InvalidLength,

    #[error("malformed extended APDU body")]
    InvalidExtendedFormat,
}

/// Instruction bytes understood by the token.
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const VERIFY: u8 = 0x20;
    pub const MANAGE_SECURITY_ENVIRONMENT: u8 = 0x22;
    pub const CHANGE_REFERENCE_DATA: u8 = 0x24;
    pub const PERFORM_SECURITY_OPERATION: u8 = 0x2A;
    pub const RESET_RETRY_COUNTER: u8 = 0x2C;
    pub const GENERATE_ASYMMETRIC_KEYPAIR: u8 = 0x46;
    pub const GET_RESPONSE: u8 = 0xC0;
    pub const UPDATE_BINARY: u8 = 0xD6;
    pub const PUT_DATA: u8 = 0xDB;
    pub const CREATE_FILE: u8 = 0xE0;
    pub const DELETE_FILE: u8 = 0xE4;
}

/// A parsed command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Class byte (CLA).
    pub cla: u8,
    /// Instruction byte (INS).
    pub ins: u8,
    /// Parameter 1 (P1).
    pub p1: u8,
    /// Parameter 2 (P2).
    pub p2: u8,
    /// Command data field (may be empty).
    pub data: Vec<u8>,
    /// Expected response length (Le), `None` if absent.
    pub le: Option<u32>,
}

impl Apdu {
    /// Header-only APDU (case 1).
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// APDU with a data field.
    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// True if this frame is a non-final segment of a command chain
    /// (CLA bit 0x10 set).
    pub fn is_chained(&self) -> bool {
        (self.cla & 0x10) != 0
    }

    /// True if the class byte requests secure messaging (CLA bits 0x0C).
    pub fn is_secure_messaging(&self) -> bool {
        (self.cla & 0x0C) != 0
    }

    /// True for an ISO interindustry class byte (bit 0x80 clear).
    pub fn is_interindustry(&self) -> bool {
        (self.cla & 0x80) == 0
    }

    /// P1 and P2 combined big-endian, useful for operation selectors.
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | (self.p2 as u16)
    }
}

/// Parse raw bytes into an [`Apdu`].
///
/// Both encodings are handled:
/// - short: `CLA INS P1 P2 [Lc data] [Le]`
/// - extended: `CLA INS P1 P2 00 Lc1 Lc2 data [Le1 Le2]`
pub fn parse_apdu(raw: &[u8]) -> Result<Apdu, ApduError> {
    if raw.len() < 4 {
        return Err(ApduError::TooShort(raw.len()));
    }

    let (cla, ins, p1, p2) = (raw[0], raw[1], raw[2], raw[3]);
    let body = &raw[4..];

    if body.is_empty() {
        return Ok(Apdu::new(cla, ins, p1, p2));
    }

    // Extended form is flagged by a zero byte where short-form Lc would be,
    // with at least two more bytes following it.
    if body[0] == 0x00 && body.len() > 2 {
        return parse_extended(cla, ins, p1, p2, &body[1..]);
    }

    parse_short(cla, ins, p1, p2, body)
}

fn parse_short(cla: u8, ins: u8, p1: u8, p2: u8, body: &[u8]) -> Result<Apdu, ApduError> {
    // Case 2: a lone Le byte (0 encodes 256).
    if body.len() == 1 {
        let le = if body[0] == 0 { 256 } else { body[0] as u32 };
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: Some(le),
        });
    }

    let lc = body[0] as usize;

    // Case 3: Lc + data.
    if body.len() == 1 + lc {
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data: body[1..1 + lc].to_vec(),
            le: None,
        });
    }

    // Case 4: Lc + data + Le.
    if body.len() == 1 + lc + 1 {
        let le_byte = body[1 + lc];
        let le = if le_byte == 0 { 256 } else { le_byte as u32 };
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data: body[1..1 + lc].to_vec(),
            le: Some(le),
        });
    }

    Err(ApduError::InvalidLength)
}

fn parse_extended(cla: u8, ins: u8, p1: u8, p2: u8, body: &[u8]) -> Result<Apdu, ApduError> {
    if body.len() < 2 {
        return Err(ApduError::InvalidExtendedFormat);
    }

    let first_word = ((body[0] as u32) << 8) | (body[1] as u32);

    // Case 2E: extended Le only (0 encodes 65536).
    if body.len() == 2 {
        let le = if first_word == 0 { 65536 } else { first_word };
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: Some(le),
        });
    }

    let lc = first_word as usize;
    if body.len() < 2 + lc {
        return Err(ApduError::InvalidLength);
    }
    let data = body[2..2 + lc].to_vec();

    // Case 3E: extended Lc + data.
    if body.len() == 2 + lc {
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        });
    }

    // Case 4E: extended Lc + data + extended Le.
    if body.len() == 2 + lc + 2 {
        let le_word = ((body[2 + lc] as u32) << 8) | (body[2 + lc + 1] as u32);
        let le = if le_word == 0 { 65536 } else { le_word };
        return Ok(Apdu {
            cla,
            ins,
            p1,
            p2,
            data,
            le: Some(le),
        });
    }

    Err(ApduError::InvalidExtendedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case1_header_only() {
        let apdu = parse_apdu(&[0x00, 0x20, 0x00, 0x01]).unwrap();
        assert_eq!(apdu.ins, ins::VERIFY);
        assert!(apdu.data.is_empty());
        assert!(apdu.le.is_none());
    }

    #[test]
    fn case2_le_only() {
        let apdu = parse_apdu(&[0x00, 0xC0, 0x00, 0x00, 0x0E]).unwrap();
        assert_eq!(apdu.ins, ins::GET_RESPONSE);
        assert_eq!(apdu.le, Some(14));

        let apdu = parse_apdu(&[0x00, 0xC0, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(apdu.le, Some(256));
    }

    #[test]
    fn case3_lc_and_data() {
        let apdu =
            parse_apdu(&[0x00, 0x20, 0x00, 0x01, 0x04, 0x31, 0x32, 0x33, 0x34]).unwrap();
        assert_eq!(apdu.data, vec![0x31, 0x32, 0x33, 0x34]);
        assert!(apdu.le.is_none());
    }

    #[test]
    fn case4_lc_data_le() {
        let apdu = parse_apdu(&[0x00, 0x46, 0x42, 0x00, 0x02, 0xAB, 0xCD, 0x00]).unwrap();
        assert_eq!(apdu.data, vec![0xAB, 0xCD]);
        assert_eq!(apdu.le, Some(256));
    }

    #[test]
    fn extended_lc_data_le() {
        let mut raw = vec![0x00, 0xDB, 0x3F, 0xFF, 0x00, 0x01, 0x04];
        raw.extend_from_slice(&[0x55; 0x0104]);
        raw.extend_from_slice(&[0x00, 0x00]);
        let apdu = parse_apdu(&raw).unwrap();
        assert_eq!(apdu.data.len(), 0x0104);
        assert_eq!(apdu.le, Some(65536));
    }

    #[test]
    fn class_byte_predicates() {
        let chained = parse_apdu(&[0x10, 0xDB, 0x3F, 0xFF]).unwrap();
        assert!(chained.is_chained());
        assert!(chained.is_interindustry());
        assert!(!chained.is_secure_messaging());

        let sm = parse_apdu(&[0x0C, 0x20, 0x00, 0x01]).unwrap();
        assert!(sm.is_secure_messaging());

        let proprietary = parse_apdu(&[0x80, 0x20, 0x00, 0x01]).unwrap();
        assert!(!proprietary.is_interindustry());
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(
            parse_apdu(&[0x00, 0xA4]),
            Err(ApduError::TooShort(2))
        ));
    }

    #[test]
    fn inconsistent_lc_is_rejected() {
        assert_eq!(
            parse_apdu(&[0x00, 0x20, 0x00, 0x01, 0x05, 0x31, 0x32]),
            Err(ApduError::InvalidLength)
        );
    }
}
