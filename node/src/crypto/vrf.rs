//! ECVRF over secp256k1 (suite `ECVRF-SECP256K1-SHA256-TAI`).
//!
//! Proofs are laid out as four 32-byte big-endian words,
//! `Gamma.x ‖ Gamma.y ‖ c ‖ s`, which is exactly the `uint256[4] proof`
//! argument decoded by the on-chain coordinator. Every hash input uses the
//! SEC1 compressed encoding of the points involved.

use alloy_primitives::{keccak256, B256};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::curve::{Point, Scalar, WORD_LEN};

/// Suite identifier for ECVRF-SECP256K1-SHA256-TAI.
pub const SUITE: u8 = 0xfe;

/// Encoded proof length: four 32-byte words.
pub const PROOF_LEN: usize = 4 * WORD_LEN;

/// Length of the truncated challenge `c`.
pub const CHALLENGE_LEN: usize = 16;

/// Length of the VRF output `beta`.
pub const BETA_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VrfError {
    #[error("proof must be {PROOF_LEN} bytes, got {0}")]
    InvalidProofLength(usize),
    #[error("proof point Gamma is not on the curve")]
    InvalidPoint,
    #[error("proof scalar {0} is out of range")]
    InvalidScalar(&'static str),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("hash_to_curve exhausted every counter value")]
    HashToCurveExhausted,
    #[error("nonce generation failed")]
    NonceGeneration,
    #[error("entropy source failure: {0}")]
    Entropy(String),
}

/// Secret scalar `x` in `[1, n-1]`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretKey(Scalar);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8; WORD_LEN]) -> Result<Self, VrfError> {
        match Scalar::from_be_bytes(bytes) {
            Some(scalar) if !scalar.is_zero() => Ok(SecretKey(scalar)),
            _ => Err(VrfError::InvalidSecretKey),
        }
    }

    pub fn from_hex(value: &str) -> Result<Self, VrfError> {
        let raw = hex::decode(value.trim().trim_start_matches("0x"))
            .map_err(|_| VrfError::InvalidSecretKey)?;
        let word: [u8; WORD_LEN] = raw.try_into().map_err(|_| VrfError::InvalidSecretKey)?;
        Self::from_bytes(&word)
    }

    pub fn to_bytes(&self) -> [u8; WORD_LEN] {
        self.0.to_be_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: Point::generator() * self.0,
        }
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Public key `Y = x·G`, stored on-chain as its affine coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    point: Point,
}

impl PublicKey {
    pub fn from_sec1(bytes: &[u8]) -> Result<Self, VrfError> {
        Point::from_sec1(bytes)
            .map(|point| PublicKey { point })
            .ok_or_else(|| VrfError::InvalidPublicKey("not a valid SEC1 point".to_string()))
    }

    pub fn from_hex(value: &str) -> Result<Self, VrfError> {
        let raw = hex::decode(value.trim().trim_start_matches("0x"))
            .map_err(|e| VrfError::InvalidPublicKey(e.to_string()))?;
        Self::from_sec1(&raw)
    }

    pub fn from_coordinates(x: &[u8; WORD_LEN], y: &[u8; WORD_LEN]) -> Result<Self, VrfError> {
        Point::from_coordinates(x, y)
            .filter(|point| !point.is_identity())
            .map(|point| PublicKey { point })
            .ok_or_else(|| VrfError::InvalidPublicKey("coordinates are not on the curve".to_string()))
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn x(&self) -> [u8; WORD_LEN] {
        self.point.coordinates().0
    }

    pub fn y(&self) -> [u8; WORD_LEN] {
        self.point.coordinates().1
    }

    pub fn compressed(&self) -> [u8; 33] {
        self.point.to_compressed()
    }

    /// Identifier the coordinator uses for a registered key: `keccak256(x ‖ y)`.
    pub fn key_hash(&self) -> B256 {
        let (x, y) = self.point.coordinates();
        let mut packed = [0u8; 2 * WORD_LEN];
        packed[..WORD_LEN].copy_from_slice(&x);
        packed[WORD_LEN..].copy_from_slice(&y);
        keccak256(packed)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn from_secret(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }
}

/// Generate a fresh key pair from the OS entropy source.
pub fn keygen() -> Result<KeyPair, VrfError> {
    let scalar = Scalar::random().map_err(|e| VrfError::Entropy(e.to_string()))?;
    Ok(KeyPair::from_secret(SecretKey(scalar)))
}

/// Decoded `(Gamma, c, s)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Proof {
    pub gamma: Point,
    pub c: Scalar,
    pub s: Scalar,
}

impl Proof {
    pub fn to_bytes(&self) -> [u8; PROOF_LEN] {
        let (gx, gy) = self.gamma.coordinates();
        let mut out = [0u8; PROOF_LEN];
        out[..WORD_LEN].copy_from_slice(&gx);
        out[WORD_LEN..2 * WORD_LEN].copy_from_slice(&gy);
        out[2 * WORD_LEN..3 * WORD_LEN].copy_from_slice(&self.c.to_be_bytes());
        out[3 * WORD_LEN..].copy_from_slice(&self.s.to_be_bytes());
        out
    }

    /// The four proof words as the verifier receives them.
    pub fn words(&self) -> [[u8; WORD_LEN]; 4] {
        let (gx, gy) = self.gamma.coordinates();
        [gx, gy, self.c.to_be_bytes(), self.s.to_be_bytes()]
    }
}

/// Parse proof bytes, checking length, point validity and scalar ranges.
pub fn decode(proof: &[u8]) -> Result<Proof, VrfError> {
    if proof.len() != PROOF_LEN {
        return Err(VrfError::InvalidProofLength(proof.len()));
    }

    let word = |i: usize| -> [u8; WORD_LEN] {
        let mut w = [0u8; WORD_LEN];
        w.copy_from_slice(&proof[i * WORD_LEN..(i + 1) * WORD_LEN]);
        w
    };

    let gamma = Point::from_coordinates(&word(0), &word(1))
        .filter(|p| !p.is_identity())
        .ok_or(VrfError::InvalidPoint)?;

    let c_word = word(2);
    if c_word[..WORD_LEN - CHALLENGE_LEN].iter().any(|b| *b != 0) {
        return Err(VrfError::InvalidScalar("c"));
    }
    let c = Scalar::from_be_bytes(&c_word).ok_or(VrfError::InvalidScalar("c"))?;
    let s = Scalar::from_be_bytes(&word(3)).ok_or(VrfError::InvalidScalar("s"))?;

    Ok(Proof { gamma, c, s })
}

/// Try-and-increment hash to curve:
/// `SHA256(suite ‖ 0x01 ‖ Y ‖ alpha ‖ ctr ‖ 0x00)` read as the x-coordinate
/// of an even-y point, for `ctr` in `0..=255`.
pub fn hash_to_curve(public_key: &PublicKey, alpha: &[u8]) -> Result<Point, VrfError> {
    let pk_string = public_key.compressed();

    for ctr in 0..=u8::MAX {
        let digest = Sha256::new()
            .chain_update([SUITE, 0x01])
            .chain_update(pk_string)
            .chain_update(alpha)
            .chain_update([ctr, 0x00])
            .finalize();

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);

        if let Some(point) = Point::from_sec1(&candidate) {
            return Ok(point);
        }
    }

    tracing::error!(
        alpha = %hex::encode(alpha),
        "hash_to_curve exhausted all 256 counters; this is an implementation defect"
    );
    Err(VrfError::HashToCurveExhausted)
}

/// Challenge `c = SHA256(suite ‖ 0x02 ‖ P1 ‖ … ‖ Pn ‖ 0x00)` truncated to 16 bytes.
pub(crate) fn hash_points(points: &[Point]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update([SUITE, 0x02]);
    for point in points {
        hasher.update(point.to_compressed());
    }
    hasher.update([0x00]);
    let digest = hasher.finalize();

    let mut truncated = [0u8; CHALLENGE_LEN];
    truncated.copy_from_slice(&digest[..CHALLENGE_LEN]);
    Scalar::from_u128(u128::from_be_bytes(truncated))
}

/// RFC 6979 section 3.2 nonce with HMAC-SHA256.
fn nonce_generation(secret_key: &SecretKey, h_string: &[u8]) -> Result<Scalar, VrfError> {
    let x = secret_key.to_bytes();
    let h1 = Scalar::reduce_be_bytes(&Sha256::digest(h_string).into()).to_be_bytes();

    let mut k = [0u8; 32];
    let mut v = [1u8; 32];

    k = hmac_sha256(&k, &[&v, &[0x00], &x, &h1])?;
    v = hmac_sha256(&k, &[&v])?;
    k = hmac_sha256(&k, &[&v, &[0x01], &x, &h1])?;
    v = hmac_sha256(&k, &[&v])?;

    loop {
        v = hmac_sha256(&k, &[&v])?;
        if let Some(candidate) = Scalar::from_be_bytes(&v) {
            if !candidate.is_zero() {
                return Ok(candidate);
            }
        }
        k = hmac_sha256(&k, &[&v, &[0x00]])?;
        v = hmac_sha256(&k, &[&v])?;
    }
}

fn hmac_sha256(key: &[u8; 32], parts: &[&[u8]]) -> Result<[u8; 32], VrfError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| VrfError::NonceGeneration)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Produce a deterministic proof for `alpha`.
pub fn prove(secret_key: &SecretKey, alpha: &[u8]) -> Result<[u8; PROOF_LEN], VrfError> {
    let public_key = secret_key.public_key();
    let h = hash_to_curve(&public_key, alpha)?;
    let gamma = h * secret_key.0;

    let k = nonce_generation(secret_key, &h.to_compressed())?;
    let u = Point::generator() * k;
    let v = h * k;

    let c = hash_points(&[h, gamma, u, v]);
    let s = k + c * secret_key.0;

    Ok(Proof { gamma, c, s }.to_bytes())
}

/// `beta = SHA256(suite ‖ 0x03 ‖ Gamma ‖ 0x00)`.
pub fn gamma_to_hash(gamma: &Point) -> [u8; BETA_LEN] {
    Sha256::new()
        .chain_update([SUITE, 0x03])
        .chain_update(gamma.to_compressed())
        .chain_update([0x00])
        .finalize()
        .into()
}

/// VRF output of a proof without verifying it.
pub fn proof_to_hash(proof: &[u8]) -> Result<[u8; BETA_LEN], VrfError> {
    let decoded = decode(proof)?;
    Ok(gamma_to_hash(&decoded.gamma))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VrfVerification {
    Valid { beta: [u8; BETA_LEN] },
    Invalid,
}

impl VrfVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, VrfVerification::Valid { .. })
    }

    pub fn beta(&self) -> Option<&[u8; BETA_LEN]> {
        match self {
            VrfVerification::Valid { beta } => Some(beta),
            VrfVerification::Invalid => None,
        }
    }
}

/// Verify `proof` for `alpha` under `public_key`.
///
/// Only a proof of the wrong length is an error. Any proof with the right
/// shape that fails a check (off-curve Gamma, scalar out of range, challenge
/// mismatch) is reported as [`VrfVerification::Invalid`].
pub fn verify(
    public_key: &PublicKey,
    proof: &[u8],
    alpha: &[u8],
) -> Result<VrfVerification, VrfError> {
    let Proof { gamma, c, s } = match decode(proof) {
        Ok(decoded) => decoded,
        Err(VrfError::InvalidProofLength(len)) => return Err(VrfError::InvalidProofLength(len)),
        Err(_) => return Ok(VrfVerification::Invalid),
    };

    let h = hash_to_curve(public_key, alpha)?;
    let u = Point::generator() * s - public_key.point * c;
    let v = h * s - gamma * c;

    if u.is_identity() || v.is_identity() {
        return Ok(VrfVerification::Invalid);
    }

    if hash_points(&[h, gamma, u, v]) == c {
        Ok(VrfVerification::Valid {
            beta: gamma_to_hash(&gamma),
        })
    } else {
        Ok(VrfVerification::Invalid)
    }
}

/// Witness points precomputed off-chain so the verifier contract only has
/// to check `c == hash(H, Gamma, U, sH - cGamma)` instead of multiplying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastVerifyComponents {
    pub u: ([u8; WORD_LEN], [u8; WORD_LEN]),
    pub s_h: ([u8; WORD_LEN], [u8; WORD_LEN]),
    pub c_gamma: ([u8; WORD_LEN], [u8; WORD_LEN]),
}

impl FastVerifyComponents {
    /// `[sH.x, sH.y, cGamma.x, cGamma.y]` in the order the contract expects.
    pub fn v_components(&self) -> [[u8; WORD_LEN]; 4] {
        [self.s_h.0, self.s_h.1, self.c_gamma.0, self.c_gamma.1]
    }
}

pub fn fast_verify_components(
    public_key: &PublicKey,
    proof: &[u8],
    alpha: &[u8],
) -> Result<FastVerifyComponents, VrfError> {
    let Proof { gamma, c, s } = decode(proof)?;
    let h = hash_to_curve(public_key, alpha)?;

    let u = Point::generator() * s - public_key.point * c;
    let s_h = h * s;
    let c_gamma = gamma * c;

    Ok(FastVerifyComponents {
        u: u.coordinates(),
        s_h: s_h.coordinates(),
        c_gamma: c_gamma.coordinates(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> KeyPair {
        let sk = SecretKey::from_hex(
            "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721",
        )
        .unwrap();
        KeyPair::from_secret(sk)
    }

    #[test]
    fn prove_is_deterministic() {
        let keys = fixed_key();
        let a = prove(&keys.secret_key, b"sample").unwrap();
        let b = prove(&keys.secret_key, b"sample").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, prove(&keys.secret_key, b"other").unwrap());
    }

    #[test]
    fn honest_proof_verifies_with_beta() {
        let keys = keygen().unwrap();
        let alpha = b"request alpha";
        let proof = prove(&keys.secret_key, alpha).unwrap();

        let result = verify(&keys.public_key, &proof, alpha).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.beta(), Some(&proof_to_hash(&proof).unwrap()));
    }

    #[test]
    fn wrong_alpha_or_key_is_invalid() {
        let keys = fixed_key();
        let other = keygen().unwrap();
        let proof = prove(&keys.secret_key, b"alpha").unwrap();

        assert_eq!(
            verify(&keys.public_key, &proof, b"beta").unwrap(),
            VrfVerification::Invalid
        );
        assert_eq!(
            verify(&other.public_key, &proof, b"alpha").unwrap(),
            VrfVerification::Invalid
        );
    }

    #[test]
    fn every_single_byte_tamper_is_rejected() {
        let keys = fixed_key();
        let alpha = b"tamper";
        let proof = prove(&keys.secret_key, alpha).unwrap();

        for i in 0..PROOF_LEN {
            let mut tampered = proof;
            tampered[i] ^= 0x01;
            let outcome = verify(&keys.public_key, &tampered, alpha).unwrap();
            assert_eq!(outcome, VrfVerification::Invalid, "byte {i} accepted");
        }
    }

    #[test]
    fn hand_built_proof_verifies() {
        let keys = fixed_key();
        let alpha = b"manual";
        let x = keys.secret_key.0;

        let h = hash_to_curve(&keys.public_key, alpha).unwrap();
        let gamma = h * x;
        let k = Scalar::random().unwrap();
        let c = hash_points(&[h, gamma, Point::generator() * k, h * k]);
        let s = k + c * x;

        let proof = Proof { gamma, c, s }.to_bytes();
        let result = verify(&keys.public_key, &proof, alpha).unwrap();
        assert!(result.is_valid());
        assert_eq!(
            result.beta(),
            verify(&keys.public_key, &prove(&keys.secret_key, alpha).unwrap(), alpha)
                .unwrap()
                .beta()
        );
    }

    #[test]
    fn decode_rejects_malformed_proofs() {
        let keys = fixed_key();
        let proof = prove(&keys.secret_key, b"decode").unwrap();

        assert_eq!(decode(&proof[..100]), Err(VrfError::InvalidProofLength(100)));
        assert!(matches!(
            verify(&keys.public_key, &proof[..1], b"decode"),
            Err(VrfError::InvalidProofLength(1))
        ));

        let mut off_curve = proof;
        off_curve[63] ^= 0x01;
        assert_eq!(decode(&off_curve), Err(VrfError::InvalidPoint));

        let mut wide_c = proof;
        wide_c[2 * WORD_LEN] = 0x01;
        assert_eq!(decode(&wide_c), Err(VrfError::InvalidScalar("c")));

        let mut big_s = proof;
        big_s[3 * WORD_LEN..].copy_from_slice(&[0xff; WORD_LEN]);
        assert_eq!(decode(&big_s), Err(VrfError::InvalidScalar("s")));

        let decoded = decode(&proof).unwrap();
        assert_eq!(decoded.to_bytes(), proof);
    }

    #[test]
    fn fast_verify_components_reconstruct_v() {
        let keys = fixed_key();
        let alpha = b"fast";
        let proof = prove(&keys.secret_key, alpha).unwrap();
        let fast = fast_verify_components(&keys.public_key, &proof, alpha).unwrap();
        let Proof { gamma, c, .. } = decode(&proof).unwrap();

        let h = hash_to_curve(&keys.public_key, alpha).unwrap();
        let u = Point::from_coordinates(&fast.u.0, &fast.u.1).unwrap();
        let s_h = Point::from_coordinates(&fast.s_h.0, &fast.s_h.1).unwrap();
        let c_gamma = Point::from_coordinates(&fast.c_gamma.0, &fast.c_gamma.1).unwrap();

        assert_eq!(hash_points(&[h, gamma, u, s_h - c_gamma]), c);
        assert_eq!(fast.v_components()[0], fast.s_h.0);
    }

    #[test]
    fn hash_to_curve_is_deterministic_and_input_bound() {
        let keys = fixed_key();
        let a = hash_to_curve(&keys.public_key, b"x").unwrap();
        assert_eq!(a, hash_to_curve(&keys.public_key, b"x").unwrap());
        assert_ne!(a, hash_to_curve(&keys.public_key, b"y").unwrap());
        assert_eq!(a.to_compressed()[0], 0x02);
    }

    #[test]
    fn public_key_encodings_agree() {
        let keys = fixed_key();
        let pk = keys.public_key;
        let from_coords = PublicKey::from_coordinates(&pk.x(), &pk.y()).unwrap();
        let from_hex = PublicKey::from_hex(&hex::encode(pk.compressed())).unwrap();
        assert_eq!(from_coords, pk);
        assert_eq!(from_hex, pk);
        assert_eq!(pk.key_hash(), from_coords.key_hash());
        assert!(PublicKey::from_hex("0x02").is_err());
    }

    #[test]
    fn secret_key_rejects_zero_and_garbage() {
        assert_eq!(SecretKey::from_bytes(&[0u8; 32]), Err(VrfError::InvalidSecretKey));
        assert!(SecretKey::from_hex("zz").is_err());
        assert!(SecretKey::from_hex("0x01").is_err());
    }
}
