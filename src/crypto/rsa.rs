//! RSA 2048 with CRT private keys and PKCS#1 v1.5 padding.
//!
//! Keys are stored in CRT form (p, q, dP, dQ, qInv) because that is the
//! form the import path delivers components in, and CRT exponentiation is
//! what the private operations run. On-card generation goes through the
//! `rsa` crate and the CRT components are derived from the resulting key.

use log::debug;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

use super::{mod_inverse, to_fixed_bytes};
use crate::error::TokenError;

/// Generated keys are always 2048 bit.
pub const KEY_BITS: usize = 2048;

/// Modulus length in bytes for generated keys.
pub const MODULUS_BYTES: usize = KEY_BITS / 8;

/// Public exponent of generated keys, big-endian.
pub const PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// PKCS#1 v1.5 overhead; the signable payload is the modulus minus this.
const PKCS1_OVERHEAD: usize = 11;

/// An RSA private key in CRT form.
#[derive(Debug, Clone)]
pub struct RsaCrtKey {
    p: BigUint,
    q: BigUint,
    dp: BigUint,
    dq: BigUint,
    qinv: BigUint,
    n: BigUint,
}

impl RsaCrtKey {
    /// Generate a fresh 2048-bit key.
    ///
    /// Returns the key plus the big-endian modulus and public exponent
    /// bytes for the response envelope.
    pub fn generate() -> Result<(Self, Vec<u8>, Vec<u8>), TokenError> {
        debug!("generating {KEY_BITS}-bit RSA key");
        let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS).map_err(|_| TokenError::CryptoFailed)?;

        let primes = key.primes();
        if primes.len() != 2 {
            return Err(TokenError::CryptoFailed);
        }
        let (p, q) = (primes[0].clone(), primes[1].clone());
        let one = BigUint::from(1u32);
        let dp = key.d() % (&p - &one);
        let dq = key.d() % (&q - &one);
        let qinv = mod_inverse(&q, &p);
        let n = key.n().clone();

        let n_bytes = to_fixed_bytes(&n, MODULUS_BYTES);
        let key = Self { p, q, dp, dq, qinv, n };
        Ok((key, n_bytes, PUBLIC_EXPONENT.to_vec()))
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        (self.n.bits() as usize + 7) / 8
    }

    /// Raw private-key exponentiation via the CRT.
    fn crt_exp(&self, c: &BigUint) -> BigUint {
        let m1 = c.modpow(&self.dp, &self.p);
        let m2 = c.modpow(&self.dq, &self.q);
        let m2p = &m2 % &self.p;
        let diff = if m1 >= m2p {
            m1 - m2p
        } else {
            m1 + &self.p - m2p
        };
        let h = (&self.qinv * diff) % &self.p;
        m2 + h * &self.q
    }

    /// Sign `payload` with PKCS#1 v1.5 type 1 padding.
    ///
    /// The payload is used as-is (any DigestInfo wrapping is the caller's
    /// business) and must leave room for the padding.
    pub fn sign_pkcs1(&self, payload: &[u8]) -> Result<Vec<u8>, TokenError> {
        let k = self.modulus_len();
        if payload.is_empty() || payload.len() + PKCS1_OVERHEAD > k {
            return Err(TokenError::WrongLength);
        }

        // EM = 00 01 FF..FF 00 payload
        let mut em = vec![0xFFu8; k];
        em[0] = 0x00;
        em[1] = 0x01;
        let payload_start = k - payload.len();
        em[payload_start - 1] = 0x00;
        em[payload_start..].copy_from_slice(payload);

        let m = BigUint::from_bytes_be(&em);
        let s = self.crt_exp(&m);
        em.fill(0);
        Ok(to_fixed_bytes(&s, k))
    }

    /// Decrypt a PKCS#1 v1.5 type 2 ciphertext.
    ///
    /// Every failure mode collapses to the same error so padding validity
    /// is not distinguishable from a malformed ciphertext.
    pub fn decrypt_pkcs1(&self, ciphertext: &[u8]) -> Result<Vec<u8>, TokenError> {
        let k = self.modulus_len();
        if ciphertext.len() != k {
            return Err(TokenError::WrongData);
        }

        let c = BigUint::from_bytes_be(ciphertext);
        if c >= self.n {
            return Err(TokenError::WrongData);
        }
        let mut em = to_fixed_bytes(&self.crt_exp(&c), k);

        let ok = em[0] == 0x00 && em[1] == 0x02;
        let sep = em[2..].iter().position(|&b| b == 0x00);
        let result = match sep {
            // At least eight nonzero padding bytes before the separator.
            Some(idx) if ok && idx >= 8 => Ok(em[2 + idx + 1..].to_vec()),
            _ => Err(TokenError::WrongData),
        };
        em.fill(0);
        result
    }
}

/// Accumulates CRT components delivered one chained frame at a time.
///
/// Tags follow the interindustry private-key template: 0x92 p, 0x93 q,
/// 0x94 qInv, 0x95 dP, 0x96 dQ.
#[derive(Default)]
pub struct RsaCrtKeyBuilder {
    p: Option<BigUint>,
    q: Option<BigUint>,
    qinv: Option<BigUint>,
    dp: Option<BigUint>,
    dq: Option<BigUint>,
}

impl RsaCrtKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one component by its template tag.
    pub fn set_component(&mut self, tag: u8, value: &[u8]) -> Result<(), TokenError> {
        if value.is_empty() {
            return Err(TokenError::DataInvalid);
        }
        let v = BigUint::from_bytes_be(value);
        match tag {
            0x92 => self.p = Some(v),
            0x93 => self.q = Some(v),
            0x94 => self.qinv = Some(v),
            0x95 => self.dp = Some(v),
            0x96 => self.dq = Some(v),
            _ => return Err(TokenError::DataInvalid),
        }
        Ok(())
    }

    /// True once all five components have arrived.
    pub fn is_complete(&self) -> bool {
        self.p.is_some()
            && self.q.is_some()
            && self.qinv.is_some()
            && self.dp.is_some()
            && self.dq.is_some()
    }

    /// Assemble the key; the modulus is recomputed from p and q and must
    /// come out at exactly the supported key size.
    pub fn build(self) -> Result<RsaCrtKey, TokenError> {
        match (self.p, self.q, self.qinv, self.dp, self.dq) {
            (Some(p), Some(q), Some(qinv), Some(dp), Some(dq)) => {
                let n = &p * &q;
                if n.bits() != KEY_BITS {
                    return Err(TokenError::DataInvalid);
                }
                Ok(RsaCrtKey { p, q, dp, dq, qinv, n })
            }
            _ => Err(TokenError::ConditionsNotSatisfied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> (RsaCrtKey, Vec<u8>) {
        let (key, n_bytes, _) = RsaCrtKey::generate().unwrap();
        (key, n_bytes)
    }

    #[test]
    fn sign_verifies_against_public_key() {
        let (key, n_bytes) = test_key();
        let payload = b"hash-shaped payload, 32 bytes!!!";
        let sig = key.sign_pkcs1(payload).unwrap();
        assert_eq!(sig.len(), MODULUS_BYTES);

        // s^e mod n recovers the padded message.
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&PUBLIC_EXPONENT);
        let m = BigUint::from_bytes_be(&sig).modpow(&e, &n);
        let em = to_fixed_bytes(&m, MODULUS_BYTES);
        assert_eq!(em[0], 0x00);
        assert_eq!(em[1], 0x01);
        assert_eq!(&em[MODULUS_BYTES - payload.len()..], payload);
    }

    #[test]
    fn sign_rejects_oversized_payload() {
        let (key, _) = test_key();
        assert_eq!(
            key.sign_pkcs1(&[0u8; MODULUS_BYTES - 10]),
            Err(TokenError::WrongLength)
        );
    }

    #[test]
    fn decrypt_round_trip() {
        let (key, n_bytes) = test_key();
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&PUBLIC_EXPONENT);

        // Encrypt by hand with type 2 padding.
        let secret = b"session key material";
        let mut em = vec![0xA5u8; MODULUS_BYTES];
        em[0] = 0x00;
        em[1] = 0x02;
        em[MODULUS_BYTES - secret.len() - 1] = 0x00;
        em[MODULUS_BYTES - secret.len()..].copy_from_slice(secret);
        let c = BigUint::from_bytes_be(&em).modpow(&e, &n);
        let ciphertext = to_fixed_bytes(&c, MODULUS_BYTES);

        assert_eq!(key.decrypt_pkcs1(&ciphertext).unwrap(), secret.to_vec());
    }

    #[test]
    fn decrypt_bad_padding_fails_generically() {
        let (key, _) = test_key();
        assert_eq!(
            key.decrypt_pkcs1(&[0x17u8; MODULUS_BYTES]),
            Err(TokenError::WrongData)
        );
        assert_eq!(key.decrypt_pkcs1(&[1, 2, 3]), Err(TokenError::WrongData));
    }

    #[test]
    fn builder_reassembles_a_working_key() {
        let (key, n_bytes) = test_key();

        let mut builder = RsaCrtKeyBuilder::new();
        builder.set_component(0x92, &key.p.to_bytes_be()).unwrap();
        builder.set_component(0x93, &key.q.to_bytes_be()).unwrap();
        builder.set_component(0x94, &key.qinv.to_bytes_be()).unwrap();
        builder.set_component(0x95, &key.dp.to_bytes_be()).unwrap();
        assert!(!builder.is_complete());
        builder.set_component(0x96, &key.dq.to_bytes_be()).unwrap();
        assert!(builder.is_complete());

        let rebuilt = builder.build().unwrap();
        assert_eq!(to_fixed_bytes(&rebuilt.n, MODULUS_BYTES), n_bytes);

        let sig_a = key.sign_pkcs1(b"same input").unwrap();
        let sig_b = rebuilt.sign_pkcs1(b"same input").unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn builder_rejects_undersized_key() {
        let mut builder = RsaCrtKeyBuilder::new();
        builder.set_component(0x92, &[11]).unwrap();
        builder.set_component(0x93, &[13]).unwrap();
        builder.set_component(0x94, &[1]).unwrap();
        builder.set_component(0x95, &[1]).unwrap();
        builder.set_component(0x96, &[1]).unwrap();
        assert!(builder.is_complete());
        assert_eq!(builder.build().err(), Some(TokenError::DataInvalid));
    }

    #[test]
    fn builder_rejects_unknown_tag() {
        let mut builder = RsaCrtKeyBuilder::new();
        assert_eq!(
            builder.set_component(0x97, &[1]),
            Err(TokenError::DataInvalid)
        );
    }
}
