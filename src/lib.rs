//! Command-processing core of an ISO/IEC 7816-4/8 cryptographic identity
//! token.
//!
//! The crate dispatches command APDUs, enforces a PIN/PUK-gated lifecycle,
//! manages a security environment (algorithm plus key slot), generates and
//! imports RSA-CRT and elliptic-curve private keys, signs and deciphers, and
//! reassembles payloads larger than one frame through a fixed scratch buffer
//! with command chaining and GET RESPONSE staging.
//!
//! The hierarchical file system is an external collaborator behind the
//! [`fs::FileSystem`] trait; [`fs::MemoryFileSystem`] is a compact in-memory
//! backend. The transport hands raw frames to [`apdu::parse_apdu`] and
//! feeds the result to [`applet::Token::process`].
//!
//! ```
//! use pki_token::apdu::parse_apdu;
//! use pki_token::applet::{Token, TokenConfig};
//! use pki_token::fs::MemoryFileSystem;
//!
//! let mut token = Token::new(TokenConfig::default(), MemoryFileSystem::new());
//! // SELECT the application: returns the 3-byte version record.
//! let cmd = parse_apdu(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
//! let resp = token.process(cmd);
//! assert_eq!(resp.sw(), 0x9000);
//! assert_eq!(resp.data.len(), 3);
//! ```

pub mod apdu;
pub mod applet;
pub mod auth;
pub mod chaining;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod keys;
pub mod se;
pub mod tlv;

pub use apdu::{parse_apdu, Apdu, Response, SW};
pub use applet::{Token, TokenConfig};
pub use error::TokenError;
