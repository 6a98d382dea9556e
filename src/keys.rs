//! Private key storage: sixteen slots, each holding an RSA or EC key.

use crate::crypto::ec::EcPrivateKey;
use crate::crypto::rsa::RsaCrtKey;
use crate::se::{alg, KEY_SLOT_COUNT};

/// A stored private key.
pub enum KeySlot {
    RsaCrt(RsaCrtKey),
    Ec(EcPrivateKey),
}

impl KeySlot {
    /// True if this key type fits the given algorithm reference.
    pub fn matches_algorithm(&self, algorithm: u8) -> bool {
        match self {
            KeySlot::RsaCrt(_) => {
                algorithm == alg::RSA_PKCS1 || algorithm == alg::GEN_RSA_2048
            }
            KeySlot::Ec(_) => algorithm == alg::ECDSA_SHA1 || algorithm == alg::GEN_EC,
        }
    }
}

/// Fixed-size private key store.
pub struct KeyStore {
    slots: [Option<KeySlot>; KEY_SLOT_COUNT],
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// True for a valid slot index.
    pub fn is_valid_ref(index: usize) -> bool {
        index < KEY_SLOT_COUNT
    }

    pub fn get(&self, index: usize) -> Option<&KeySlot> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Install a key, replacing whatever the slot held.
    pub fn set(&mut self, index: usize, key: KeySlot) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(key);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ec::{EcDomainParams, EcPrivateKey};

    fn ec_key() -> EcPrivateKey {
        let params = EcDomainParams::parse(&crate::crypto::ec::tests::p256_params_tlv()).unwrap();
        EcPrivateKey::generate(params).unwrap()
    }

    #[test]
    fn slots_start_empty() {
        let store = KeyStore::new();
        for i in 0..KEY_SLOT_COUNT {
            assert!(store.get(i).is_none());
        }
    }

    #[test]
    fn set_and_replace() {
        let mut store = KeyStore::new();
        store.set(3, KeySlot::Ec(ec_key()));
        assert!(store.get(3).is_some());
        store.clear(3);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn algorithm_matching() {
        let slot = KeySlot::Ec(ec_key());
        assert!(slot.matches_algorithm(alg::ECDSA_SHA1));
        assert!(slot.matches_algorithm(alg::GEN_EC));
        assert!(!slot.matches_algorithm(alg::RSA_PKCS1));
    }
}
