//! ECDSA over caller-supplied short-Weierstrass domain parameters.
//!
//! Curves arrive as explicit parameters (prime, a, b, generator, order,
//! cofactor), not as named-curve OIDs, so the arithmetic here is generic
//! affine point math over the given prime field rather than a fixed-curve
//! backend. Field widths are restricted to the sizes the key generation
//! command advertises.

use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::BigUint;
use sha1::{Digest, Sha1};

use super::{mod_inverse, to_fixed_bytes};
use crate::error::TokenError;
use crate::tlv;

/// Field widths (in bits) a curve may use.
pub const ALLOWED_FIELD_BITS: [usize; 6] = [192, 224, 256, 320, 384, 512];

/// Template tags for explicit EC domain parameters.
pub mod tag {
    pub const PRIME: u8 = 0x81;
    pub const COEFFICIENT_A: u8 = 0x82;
    pub const COEFFICIENT_B: u8 = 0x83;
    pub const GENERATOR: u8 = 0x84;
    pub const ORDER: u8 = 0x85;
    pub const PUBLIC_POINT: u8 = 0x86;
    pub const COFACTOR: u8 = 0x87;
    pub const PRIVATE_SCALAR: u8 = 0x88;
}

/// An affine point, `None` meaning the point at infinity.
type Point = Option<(BigUint, BigUint)>;

/// Explicit domain parameters of a short-Weierstrass curve over Fp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcDomainParams {
    pub prime: BigUint,
    pub a: BigUint,
    pub b: BigUint,
    pub gx: BigUint,
    pub gy: BigUint,
    pub order: BigUint,
    pub cofactor: u16,
    /// Field width in bytes, fixed by the prime's TLV length.
    field_len: usize,
}

impl EcDomainParams {
    /// Parse domain parameters from a flat TLV sequence.
    ///
    /// All six parameter tags must be present; the generator must be an
    /// uncompressed point of the right width and must lie on the curve.
    pub fn parse(buf: &[u8]) -> Result<Self, TokenError> {
        let prime_bytes = tlv::read_value(buf, tag::PRIME).map_err(|_| TokenError::DataInvalid)?;
        let field_len = prime_bytes.len();
        if !ALLOWED_FIELD_BITS.contains(&(field_len * 8)) {
            return Err(TokenError::FunctionNotSupported);
        }

        let a = tlv::read_value(buf, tag::COEFFICIENT_A).map_err(|_| TokenError::DataInvalid)?;
        let b = tlv::read_value(buf, tag::COEFFICIENT_B).map_err(|_| TokenError::DataInvalid)?;
        let g = tlv::read_value(buf, tag::GENERATOR).map_err(|_| TokenError::DataInvalid)?;
        let order = tlv::read_value(buf, tag::ORDER).map_err(|_| TokenError::DataInvalid)?;
        let cofactor = tlv::read_value(buf, tag::COFACTOR).map_err(|_| TokenError::DataInvalid)?;

        if g.len() != 1 + 2 * field_len || g[0] != 0x04 {
            return Err(TokenError::DataInvalid);
        }
        let cofactor = match cofactor.len() {
            1 => cofactor[0] as u16,
            2 => ((cofactor[0] as u16) << 8) | cofactor[1] as u16,
            _ => return Err(TokenError::DataInvalid),
        };

        let params = Self {
            prime: BigUint::from_bytes_be(prime_bytes),
            a: BigUint::from_bytes_be(a),
            b: BigUint::from_bytes_be(b),
            gx: BigUint::from_bytes_be(&g[1..1 + field_len]),
            gy: BigUint::from_bytes_be(&g[1 + field_len..]),
            order: BigUint::from_bytes_be(order),
            cofactor,
            field_len,
        };

        // Every parameter must fit the field width fixed by the prime.
        if params.a >= params.prime
            || params.b >= params.prime
            || params.order.bits() > params.field_bits()
        {
            return Err(TokenError::DataInvalid);
        }
        if params.order < BigUint::from(2u32)
            || !params.is_on_curve(&params.gx, &params.gy)
        {
            return Err(TokenError::DataInvalid);
        }
        Ok(params)
    }

    /// Field width in bytes.
    pub fn field_len(&self) -> usize {
        self.field_len
    }

    /// Field width in bits.
    pub fn field_bits(&self) -> usize {
        self.field_len * 8
    }

    /// Encode the parameters back into the flat TLV form.
    ///
    /// The cofactor is always written as two bytes.
    pub fn encode(&self) -> Vec<u8> {
        let fl = self.field_len;
        let mut out = Vec::new();
        out.extend(tlv::encode(tag::PRIME, &to_fixed_bytes(&self.prime, fl)));
        out.extend(tlv::encode(tag::COEFFICIENT_A, &to_fixed_bytes(&self.a, fl)));
        out.extend(tlv::encode(tag::COEFFICIENT_B, &to_fixed_bytes(&self.b, fl)));
        out.extend(tlv::encode(tag::GENERATOR, &self.encode_point(&self.gx, &self.gy)));
        out.extend(tlv::encode(tag::ORDER, &to_fixed_bytes(&self.order, fl)));
        out.extend(tlv::encode(
            tag::COFACTOR,
            &[(self.cofactor >> 8) as u8, self.cofactor as u8],
        ));
        out
    }

    /// Uncompressed point encoding, coordinates at full field width.
    pub fn encode_point(&self, x: &BigUint, y: &BigUint) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 2 * self.field_len);
        out.push(0x04);
        out.extend(to_fixed_bytes(x, self.field_len));
        out.extend(to_fixed_bytes(y, self.field_len));
        out
    }

    fn mod_sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let b = b % &self.prime;
        let a = a % &self.prime;
        if a >= b {
            a - b
        } else {
            a + &self.prime - b
        }
    }

    /// True if (x, y) satisfies y^2 = x^3 + ax + b over Fp.
    pub fn is_on_curve(&self, x: &BigUint, y: &BigUint) -> bool {
        if x >= &self.prime || y >= &self.prime {
            return false;
        }
        let lhs = (y * y) % &self.prime;
        let rhs = (x * x * x + &self.a * x + &self.b) % &self.prime;
        lhs == rhs
    }

    fn point_double(&self, p: &Point) -> Point {
        let (x, y) = match p {
            Some(p) => p,
            None => return None,
        };
        if y == &BigUint::from(0u32) {
            return None;
        }
        // lambda = (3x^2 + a) / 2y
        let three_x2 = (BigUint::from(3u32) * x * x + &self.a) % &self.prime;
        let inv_2y = mod_inverse(&((BigUint::from(2u32) * y) % &self.prime), &self.prime);
        let lambda = (three_x2 * inv_2y) % &self.prime;

        let x3 = self.mod_sub(&((&lambda * &lambda) % &self.prime), &(x + x));
        let y3 = self.mod_sub(&((&lambda * self.mod_sub(x, &x3)) % &self.prime), y);
        Some((x3, y3))
    }

    fn point_add(&self, p: &Point, q: &Point) -> Point {
        let (px, py) = match p {
            Some(p) => p,
            None => return q.clone(),
        };
        let (qx, qy) = match q {
            Some(q) => q,
            None => return p.clone(),
        };
        if px == qx {
            return if py == qy {
                self.point_double(p)
            } else {
                None
            };
        }
        // lambda = (qy - py) / (qx - px)
        let num = self.mod_sub(qy, py);
        let den = self.mod_sub(qx, px);
        let lambda = (num * mod_inverse(&den, &self.prime)) % &self.prime;

        let x3 = self.mod_sub(&self.mod_sub(&((&lambda * &lambda) % &self.prime), px), qx);
        let y3 = self.mod_sub(&((&lambda * self.mod_sub(px, &x3)) % &self.prime), py);
        Some((x3, y3))
    }

    /// Double-and-add scalar multiplication.
    fn scalar_mul(&self, k: &BigUint, p: &Point) -> Point {
        let mut acc: Point = None;
        let bits = k.bits();
        for i in (0..bits).rev() {
            acc = self.point_double(&acc);
            if (k >> i) & BigUint::from(1u32) == BigUint::from(1u32) {
                acc = self.point_add(&acc, p);
            }
        }
        acc
    }

    fn generator(&self) -> Point {
        Some((self.gx.clone(), self.gy.clone()))
    }
}

/// An EC private key bound to its domain parameters.
#[derive(Debug, Clone)]
pub struct EcPrivateKey {
    pub params: EcDomainParams,
    d: BigUint,
}

impl EcPrivateKey {
    /// Generate a key with a random scalar in [1, order-1].
    pub fn generate(params: EcDomainParams) -> Result<Self, TokenError> {
        debug!("generating EC key over a {}-bit field", params.field_bits());
        let mut raw = vec![0u8; params.field_len() + 8];
        OsRng.fill_bytes(&mut raw);
        let wide = BigUint::from_bytes_be(&raw);
        raw.fill(0);
        let d = wide % (&params.order - BigUint::from(1u32)) + BigUint::from(1u32);
        Ok(Self { params, d })
    }

    /// Build a key from an imported scalar, validating its range.
    pub fn from_scalar(params: EcDomainParams, scalar: &[u8]) -> Result<Self, TokenError> {
        let d = BigUint::from_bytes_be(scalar);
        if d == BigUint::from(0u32) || d >= params.order {
            return Err(TokenError::DataInvalid);
        }
        Ok(Self { params, d })
    }

    /// The public point d*G.
    pub fn public_point(&self) -> Result<(BigUint, BigUint), TokenError> {
        self.params
            .scalar_mul(&self.d, &self.params.generator())
            .ok_or(TokenError::CryptoFailed)
    }

    /// Uncompressed encoding of the public point.
    pub fn encoded_public_point(&self) -> Result<Vec<u8>, TokenError> {
        let (x, y) = self.public_point()?;
        Ok(self.params.encode_point(&x, &y))
    }
}

/// Streaming ECDSA-SHA1: data blocks are hashed as they arrive and the
/// signature is produced when the final block closes the operation.
pub struct EcdsaSha1Signer {
    key: EcPrivateKey,
    digest: Sha1,
}

impl EcdsaSha1Signer {
    pub fn new(key: EcPrivateKey) -> Self {
        Self {
            key,
            digest: Sha1::new(),
        }
    }

    /// Feed one block of message data into the running hash.
    pub fn update(&mut self, block: &[u8]) {
        self.digest.update(block);
    }

    /// Finish the hash and sign it, returning a DER-encoded signature.
    pub fn sign(self) -> Result<Vec<u8>, TokenError> {
        let params = &self.key.params;
        let n = &params.order;
        let digest = self.digest.finalize();
        // The field is at least 192 bits, so the 160-bit digest is used
        // whole without truncation.
        let z = BigUint::from_bytes_be(&digest) % n;

        for _ in 0..64 {
            let mut raw = vec![0u8; params.field_len() + 8];
            OsRng.fill_bytes(&mut raw);
            let wide = BigUint::from_bytes_be(&raw);
            raw.fill(0);
            let k = wide % (n - BigUint::from(1u32)) + BigUint::from(1u32);

            let point = params.scalar_mul(&k, &params.generator());
            let r = match point {
                Some((x, _)) => x % n,
                None => continue,
            };
            if r == BigUint::from(0u32) {
                continue;
            }
            let k_inv = mod_inverse(&k, n);
            let s = (k_inv * ((&z + &r * &self.key.d) % n)) % n;
            if s == BigUint::from(0u32) {
                continue;
            }
            return Ok(der_signature(&r, &s));
        }
        Err(TokenError::CryptoFailed)
    }
}

/// DER SEQUENCE of two INTEGERs.
fn der_signature(r: &BigUint, s: &BigUint) -> Vec<u8> {
    let r = der_integer(r);
    let s = der_integer(s);
    let mut out = Vec::with_capacity(2 + r.len() + s.len());
    out.push(0x30);
    out.extend(tlv::encode_length(r.len() + s.len()));
    out.extend(r);
    out.extend(s);
    out
}

/// DER INTEGER: minimal big-endian, with a leading zero when the high bit
/// would make the value read as negative.
fn der_integer(x: &BigUint) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    let mut out = vec![0x02];
    if bytes[0] & 0x80 != 0 {
        out.extend(tlv::encode_length(bytes.len() + 1));
        out.push(0x00);
    } else {
        out.extend(tlv::encode_length(bytes.len()));
    }
    out.extend(bytes);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// NIST P-256 as explicit parameters.
    pub(crate) fn p256_params_tlv() -> Vec<u8> {
        let prime =
            hex::decode("ffffffff00000001000000000000000000000000ffffffffffffffffffffffff")
                .unwrap();
        let a = hex::decode("ffffffff00000001000000000000000000000000fffffffffffffffffffffffc")
            .unwrap();
        let b = hex::decode("5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b")
            .unwrap();
        let gx = hex::decode("6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296")
            .unwrap();
        let gy = hex::decode("4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5")
            .unwrap();
        let order =
            hex::decode("ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551")
                .unwrap();

        let mut g = vec![0x04];
        g.extend(&gx);
        g.extend(&gy);

        let mut buf = Vec::new();
        buf.extend(tlv::encode(tag::PRIME, &prime));
        buf.extend(tlv::encode(tag::COEFFICIENT_A, &a));
        buf.extend(tlv::encode(tag::COEFFICIENT_B, &b));
        buf.extend(tlv::encode(tag::GENERATOR, &g));
        buf.extend(tlv::encode(tag::ORDER, &order));
        buf.extend(tlv::encode(tag::COFACTOR, &[0x01]));
        buf
    }

    #[test]
    fn parse_p256() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        assert_eq!(params.field_bits(), 256);
        assert_eq!(params.cofactor, 1);
        assert!(params.is_on_curve(&params.gx, &params.gy));
    }

    #[test]
    fn parse_rejects_missing_tag() {
        let mut buf = p256_params_tlv();
        buf[0] = 0x79; // clobber the prime tag
        assert_eq!(EcDomainParams::parse(&buf), Err(TokenError::DataInvalid));
    }

    #[test]
    fn parse_rejects_unsupported_field_width() {
        let mut buf = Vec::new();
        buf.extend(tlv::encode(tag::PRIME, &[0xFB; 20])); // 160-bit field
        assert_eq!(
            EcDomainParams::parse(&buf),
            Err(TokenError::FunctionNotSupported)
        );
    }

    #[test]
    fn parse_rejects_parameters_wider_than_the_field() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        let mut wide_order = vec![0x01];
        wide_order.extend(to_fixed_bytes(&params.order, 32));

        let mut buf = Vec::new();
        buf.extend(tlv::encode(tag::PRIME, &to_fixed_bytes(&params.prime, 32)));
        buf.extend(tlv::encode(tag::COEFFICIENT_A, &to_fixed_bytes(&params.a, 32)));
        buf.extend(tlv::encode(tag::COEFFICIENT_B, &to_fixed_bytes(&params.b, 32)));
        buf.extend(tlv::encode(
            tag::GENERATOR,
            &params.encode_point(&params.gx, &params.gy),
        ));
        buf.extend(tlv::encode(tag::ORDER, &wide_order));
        buf.extend(tlv::encode(tag::COFACTOR, &[0x01]));

        assert_eq!(EcDomainParams::parse(&buf), Err(TokenError::DataInvalid));
    }

    #[test]
    fn parse_rejects_off_curve_generator() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        let mut bad = params.clone();
        bad.gy += BigUint::from(1u32);
        let buf = bad.encode();
        assert_eq!(EcDomainParams::parse(&buf), Err(TokenError::DataInvalid));
    }

    #[test]
    fn encode_round_trips() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        let reparsed = EcDomainParams::parse(&params.encode()).unwrap();
        assert_eq!(params, reparsed);
    }

    #[test]
    fn generated_point_is_on_curve() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        let key = EcPrivateKey::generate(params.clone()).unwrap();
        let (x, y) = key.public_point().unwrap();
        assert!(params.is_on_curve(&x, &y));
    }

    #[test]
    fn scalar_import_range_checks() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        assert!(EcPrivateKey::from_scalar(params.clone(), &[0x00]).is_err());
        let order_bytes = to_fixed_bytes(&params.order, 32);
        assert!(EcPrivateKey::from_scalar(params.clone(), &order_bytes).is_err());
        assert!(EcPrivateKey::from_scalar(params, &[0x02]).is_ok());
    }

    #[test]
    fn signature_verifies_by_hand() {
        let params = EcDomainParams::parse(&p256_params_tlv()).unwrap();
        let key = EcPrivateKey::generate(params.clone()).unwrap();
        let (px, py) = key.public_point().unwrap();

        let msg = b"token signing test vector";
        let mut signer = EcdsaSha1Signer::new(key);
        signer.update(msg);
        let sig = signer.sign().unwrap();

        // Decode the DER SEQUENCE.
        assert_eq!(sig[0], 0x30);
        let body = tlv::read_value(&sig, 0x30).unwrap();
        let mut ints = Vec::new();
        let mut pos = 0;
        while pos < body.len() {
            assert_eq!(body[pos], 0x02);
            let len = body[pos + 1] as usize;
            ints.push(BigUint::from_bytes_be(&body[pos + 2..pos + 2 + len]));
            pos += 2 + len;
        }
        let (r, s) = (ints[0].clone(), ints[1].clone());
        let n = &params.order;

        // Standard verification: u1*G + u2*Q, check x == r (mod n).
        let z = BigUint::from_bytes_be(&Sha1::digest(msg)) % n;
        let w = mod_inverse(&s, n);
        let u1 = (&z * &w) % n;
        let u2 = (&r * &w) % n;
        let p1 = params.scalar_mul(&u1, &params.generator());
        let p2 = params.scalar_mul(&u2, &Some((px, py)));
        let (x, _) = params.point_add(&p1, &p2).unwrap();
        assert_eq!(x % n, r);
    }
}
