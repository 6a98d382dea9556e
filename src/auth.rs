//! Lifecycle state and PIN/PUK credentials.
//!
//! Credentials follow OwnerPIN semantics: the secret is stored zero-padded
//! to a fixed width, a try counter limits brute forcing, and the per-session
//! "validated" flag is cleared on deselection while the counter persists.

/// Fixed storage width of a credential; shorter secrets are zero-padded.
pub const CREDENTIAL_WIDTH: usize = 16;

/// PIN length bounds.
pub const PIN_MIN_LENGTH: usize = 4;
pub const PIN_MAX_LENGTH: usize = 16;

/// PUK length is fixed.
pub const PUK_LENGTH: usize = 16;

/// Token lifecycle states.
///
/// The state only ever advances (Creation → Initialisation →
/// OperationalActivated); none of the implemented operations regress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No credentials set; bootstrap trust applies.
    Creation,
    /// PUK set, PIN not set yet.
    Initialisation,
    /// PIN set; data is secured.
    OperationalActivated,
    /// Usage deactivated (reserved, not reachable here).
    OperationalDeactivated,
    /// Usage terminated (reserved, not reachable here).
    Terminated,
}

/// A PIN or PUK: fixed-width padded secret, try counter, validated flag.
pub struct Credential {
    value: [u8; CREDENTIAL_WIDTH],
    is_set: bool,
    tries: u8,
    max_tries: u8,
    validated: bool,
}

impl Credential {
    pub fn new(max_tries: u8) -> Self {
        Self {
            value: [0u8; CREDENTIAL_WIDTH],
            is_set: false,
            tries: max_tries,
            max_tries,
            validated: false,
        }
    }

    /// Zero-pad a candidate secret to the fixed comparison width.
    pub fn pad(secret: &[u8]) -> [u8; CREDENTIAL_WIDTH] {
        let mut padded = [0u8; CREDENTIAL_WIDTH];
        padded[..secret.len()].copy_from_slice(secret);
        padded
    }

    /// Store a new secret, reset the try counter and unblock.
    ///
    /// The previous secret is overwritten in place.
    pub fn update(&mut self, padded: &[u8; CREDENTIAL_WIDTH]) {
        self.value.copy_from_slice(padded);
        self.is_set = true;
        self.tries = self.max_tries;
        self.validated = false;
    }

    /// Compare a padded candidate against the stored secret.
    ///
    /// A match resets the try counter and validates the session; a mismatch
    /// burns one try. A blocked credential (zero tries) always fails without
    /// touching the counter.
    pub fn check(&mut self, padded: &[u8; CREDENTIAL_WIDTH]) -> bool {
        if self.tries == 0 || !self.is_set {
            self.validated = false;
            return false;
        }

        // Fold over every byte so the comparison does not exit early.
        let mut diff = 0u8;
        for (a, b) in self.value.iter().zip(padded.iter()) {
            diff |= a ^ b;
        }

        if diff == 0 {
            self.tries = self.max_tries;
            self.validated = true;
            true
        } else {
            self.tries -= 1;
            self.validated = false;
            false
        }
    }

    /// Clear the per-session validated flag. The try counter persists.
    pub fn reset(&mut self) {
        self.validated = false;
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn tries_remaining(&self) -> u8 {
        self.tries
    }

    pub fn is_set(&self) -> bool {
        self.is_set
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.value.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin_with(value: &[u8]) -> Credential {
        let mut pin = Credential::new(3);
        pin.update(&Credential::pad(value));
        pin
    }

    #[test]
    fn check_match_validates_and_resets() {
        let mut pin = pin_with(b"1234");
        assert!(pin.check(&Credential::pad(b"1234")));
        assert!(pin.is_validated());
        assert_eq!(pin.tries_remaining(), 3);
    }

    #[test]
    fn check_mismatch_burns_a_try() {
        let mut pin = pin_with(b"1234");
        assert!(!pin.check(&Credential::pad(b"9999")));
        assert!(!pin.is_validated());
        assert_eq!(pin.tries_remaining(), 2);
    }

    #[test]
    fn blocked_credential_rejects_correct_value() {
        let mut pin = pin_with(b"1234");
        for _ in 0..3 {
            pin.check(&Credential::pad(b"0000"));
        }
        assert_eq!(pin.tries_remaining(), 0);
        assert!(!pin.check(&Credential::pad(b"1234")));
        assert_eq!(pin.tries_remaining(), 0);
    }

    #[test]
    fn unset_credential_never_matches() {
        let mut pin = Credential::new(3);
        assert!(!pin.check(&Credential::pad(b"1234")));
    }

    #[test]
    fn padding_is_part_of_the_secret() {
        let mut pin = pin_with(b"1234");
        // A candidate with trailing garbage beyond the real PIN must fail.
        let mut padded = Credential::pad(b"1234");
        padded[10] = 0x41;
        assert!(!pin.check(&padded));
    }

    #[test]
    fn reset_clears_validation_only() {
        let mut pin = pin_with(b"1234");
        pin.check(&Credential::pad(b"9999"));
        pin.reset();
        assert!(!pin.is_validated());
        assert_eq!(pin.tries_remaining(), 2);
    }
}
