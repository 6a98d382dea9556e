//! Command response handling.
//!
//! A `Response` carries the response data plus the SW1/SW2 status word pair.

use super::status::SW;
use crate::error::TokenError;

/// A command response: data bytes followed by a status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data (without the status word).
    pub data: Vec<u8>,
    /// Status word 1 (SW1).
    pub sw1: u8,
    /// Status word 2 (SW2).
    pub sw2: u8,
}

impl Response {
    /// Create a response with data and a status word.
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    /// Success (0x9000) with data.
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    /// Empty success (0x9000).
    pub fn ok() -> Self {
        Self::success(Vec::new())
    }

    /// Error status with no data.
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Partial response with `remaining` bytes still staged (0x61xx).
    pub fn more_data(data: Vec<u8>, remaining: u8) -> Self {
        Self::new(data, SW::bytes_remaining(remaining))
    }

    /// The combined status word.
    pub fn sw(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// True for 0x9000 or 0x61xx.
    pub fn is_okay(&self) -> bool {
        SW::is_success(self.sw())
    }

    /// Bytes still waiting for GET RESPONSE, if SW1 is 0x61.
    pub fn remaining(&self) -> Option<u8> {
        if self.sw1 == 0x61 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Raw wire form: data followed by SW1 and SW2.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.push(self.sw1);
        out.push(self.sw2);
        out
    }
}

impl From<TokenError> for Response {
    fn from(err: TokenError) -> Self {
        Self::error(err.status_word())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_with_data() {
        let resp = Response::success(vec![0x00, 0x04, 0x00]);
        assert!(resp.is_okay());
        assert_eq!(resp.sw(), 0x9000);
        assert_eq!(resp.to_bytes(), vec![0x00, 0x04, 0x00, 0x90, 0x00]);
    }

    #[test]
    fn error_status() {
        let resp = Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
        assert!(!resp.is_okay());
        assert_eq!(resp.to_bytes(), vec![0x69, 0x82]);
    }

    #[test]
    fn more_data_reports_remaining() {
        let resp = Response::more_data(vec![0xAA; 256], 14);
        assert!(resp.is_okay());
        assert_eq!(resp.remaining(), Some(14));
    }

    #[test]
    fn from_token_error() {
        let resp: Response = TokenError::TriesRemaining(1).into();
        assert_eq!(resp.sw(), 0x63C1);
    }
}
