//! Status Word (SW) constants for command responses.
//!
//! ISO 7816-4 status words indicating command execution results.

/// Status word constants.
pub struct SW;

impl SW {
    pub const SUCCESS: u16 = 0x9000;

    pub const WRONG_LENGTH: u16 = 0x6700;

    pub const SECURE_MESSAGING_NOT_SUPPORTED: u16 = 0x6882;
    pub const COMMAND_CHAINING_NOT_SUPPORTED: u16 = 0x6884;

    pub const COMMAND_NOT_ALLOWED: u16 = 0x6900;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const DATA_INVALID: u16 = 0x6984;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;

    pub const WRONG_DATA: u16 = 0x6A80;
    pub const FUNCTION_NOT_SUPPORTED: u16 = 0x6A81;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const INCORRECT_P1_P2: u16 = 0x6A86;

    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
    pub const UNKNOWN_ERROR: u16 = 0x6F00;

    /// "More data available" status (61xx); the low byte is the number of
    /// bytes waiting for GET RESPONSE.
    #[inline]
    pub fn bytes_remaining(remaining: u8) -> u16 {
        0x6100 | (remaining as u16)
    }

    /// Counter warning (63Cx) used to report remaining PIN/PUK tries.
    #[inline]
    pub fn tries_remaining(tries: u8) -> u16 {
        0x63C0 | ((tries & 0x0F) as u16)
    }

    /// "Wrong Le" status (6Cxx); the low byte is the correct Le value
    /// (0 encodes 256).
    #[inline]
    pub fn wrong_le(correct_le: u8) -> u16 {
        0x6C00 | (correct_le as u16)
    }

    /// True for 0x9000 or any 61xx status.
    #[inline]
    pub fn is_success(sw: u16) -> bool {
        sw == Self::SUCCESS || (sw & 0xFF00) == 0x6100
    }

    /// Extract the remaining try count from a 63Cx status.
    #[inline]
    pub fn try_count(sw: u16) -> Option<u8> {
        if (sw & 0xFFF0) == 0x63C0 {
            Some((sw & 0x0F) as u8)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_data_encoding() {
        assert_eq!(SW::bytes_remaining(14), 0x610E);
        assert_eq!(SW::bytes_remaining(255), 0x61FF);
    }

    #[test]
    fn tries_encoding() {
        assert_eq!(SW::tries_remaining(3), 0x63C3);
        assert_eq!(SW::tries_remaining(0), 0x63C0);
        assert_eq!(SW::try_count(0x63C2), Some(2));
        assert_eq!(SW::try_count(0x9000), None);
    }

    #[test]
    fn success_check() {
        assert!(SW::is_success(0x9000));
        assert!(SW::is_success(0x610E));
        assert!(!SW::is_success(0x6982));
    }
}
