//! Token error taxonomy.
//!
//! Every command handler returns `Result<Response, TokenError>`. The
//! dispatcher converts an error into the matching ISO 7816-4 status word,
//! so errors always terminate the current command synchronously and nothing
//! is swallowed. Early returns are plain `?` propagation.

use thiserror::Error;

use crate::apdu::status::SW;

/// Errors raised while processing a command.
///
/// The variants preserve the distinctions of the ISO 7816-4 status word
/// taxonomy; `status_word()` gives the wire encoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("secure messaging is not supported")]
    SecureMessagingNotSupported,

    #[error("command chaining is not supported for this instruction")]
    ChainingNotSupported,

    #[error("command not allowed")]
    CommandNotAllowed,

    #[error("class byte not supported")]
    ClaNotSupported,

    #[error("instruction not supported")]
    InsNotSupported,

    #[error("function not supported")]
    FunctionNotSupported,

    #[error("incorrect P1/P2 parameters")]
    IncorrectP1P2,

    #[error("wrong length")]
    WrongLength,

    /// The caller requested the wrong Le; the exact expected byte count is
    /// reported back (0 encodes 256).
    #[error("wrong length, correct length is {0}")]
    WrongExpectedLength(u8),

    #[error("security status not satisfied")]
    SecurityStatusNotSatisfied,

    #[error("conditions of use not satisfied")]
    ConditionsNotSatisfied,

    /// PIN or PUK comparison failed; carries the remaining try count.
    #[error("authentication failed, {0} tries remaining")]
    TriesRemaining(u8),

    #[error("invalid data")]
    DataInvalid,

    #[error("wrong data")]
    WrongData,

    #[error("file not found")]
    FileNotFound,

    /// Underlying cryptographic operation failed. Deliberately carries no
    /// detail about which internal check failed.
    #[error("cryptographic operation failed")]
    CryptoFailed,
}

impl TokenError {
    /// Map the error to its ISO 7816-4 status word.
    pub fn status_word(&self) -> u16 {
        match self {
            TokenError::SecureMessagingNotSupported => SW::SECURE_MESSAGING_NOT_SUPPORTED,
            TokenError::ChainingNotSupported => SW::COMMAND_CHAINING_NOT_SUPPORTED,
            TokenError::CommandNotAllowed => SW::COMMAND_NOT_ALLOWED,
            TokenError::ClaNotSupported => SW::CLA_NOT_SUPPORTED,
            TokenError::InsNotSupported => SW::INS_NOT_SUPPORTED,
            TokenError::FunctionNotSupported => SW::FUNCTION_NOT_SUPPORTED,
            TokenError::IncorrectP1P2 => SW::INCORRECT_P1_P2,
            TokenError::WrongLength => SW::WRONG_LENGTH,
            TokenError::WrongExpectedLength(n) => SW::wrong_le(*n),
            TokenError::SecurityStatusNotSatisfied => SW::SECURITY_STATUS_NOT_SATISFIED,
            TokenError::ConditionsNotSatisfied => SW::CONDITIONS_NOT_SATISFIED,
            TokenError::TriesRemaining(n) => SW::tries_remaining(*n),
            TokenError::DataInvalid => SW::DATA_INVALID,
            TokenError::WrongData => SW::WRONG_DATA,
            TokenError::FileNotFound => SW::FILE_NOT_FOUND,
            TokenError::CryptoFailed => SW::UNKNOWN_ERROR,
        }
    }
}
