//! The current security environment: which algorithm and key slot the next
//! security operation will use.

/// Algorithm reference bytes accepted by MANAGE SECURITY ENVIRONMENT.
pub mod alg {
    /// On-card RSA 2048 key pair generation.
    pub const GEN_RSA_2048: u8 = 0xF3;
    /// RSA signature / decipher with PKCS#1 v1.5 padding.
    pub const RSA_PKCS1: u8 = 0x11;
    /// On-card EC key pair generation over caller-supplied domain parameters.
    pub const GEN_EC: u8 = 0xEC;
    /// ECDSA with SHA-1, input hashed on card.
    pub const ECDSA_SHA1: u8 = 0x21;
}

/// Number of private key slots.
pub const KEY_SLOT_COUNT: usize = 16;

/// The security environment set up by MSE and consumed by key generation
/// and PERFORM SECURITY OPERATION.
///
/// Defaults to no algorithm (0) and no key reference; RESTORE returns to
/// exactly this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityEnvironment {
    /// Currently selected algorithm reference, 0 when unset.
    pub algorithm: u8,
    /// Currently selected key slot.
    pub key_ref: Option<usize>,
}

impl SecurityEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the power-up defaults.
    pub fn restore(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_clears_selection() {
        let mut env = SecurityEnvironment::new();
        env.algorithm = alg::ECDSA_SHA1;
        env.key_ref = Some(3);
        env.restore();
        assert_eq!(env, SecurityEnvironment::default());
    }
}
