//! Cryptographic primitives: RSA-CRT and generic-curve ECDSA.

pub mod ec;
pub mod rsa;

use ::rsa::BigUint;

/// Big-endian bytes of `x`, left-padded with zeros to exactly `len` bytes.
pub(crate) fn to_fixed_bytes(x: &BigUint, len: usize) -> Vec<u8> {
    let raw = x.to_bytes_be();
    let mut out = vec![0u8; len];
    out[len - raw.len()..].copy_from_slice(&raw);
    out
}

/// Modular inverse via Fermat: `a^(p-2) mod p`. `p` must be prime.
pub(crate) fn mod_inverse(a: &BigUint, p: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    a.modpow(&(p - &two), p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bytes_pads_left() {
        let x = BigUint::from(0x0102u32);
        assert_eq!(to_fixed_bytes(&x, 4), vec![0, 0, 1, 2]);
    }

    #[test]
    fn inverse_over_small_prime() {
        let p = BigUint::from(101u32);
        let a = BigUint::from(7u32);
        let inv = mod_inverse(&a, &p);
        assert_eq!((a * inv) % p, BigUint::from(1u32));
    }
}
