//! secp256k1 scalar and point arithmetic with fixed-width encodings.
//!
//! Every encoding produced here has a constant length so that the hashes
//! computed over them are identical off-chain and inside the verifier
//! contract. Coordinates and scalars are raw 32-byte big-endian words.

use std::ops::{Add, Mul, Neg, Sub};

use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, U256};
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of a SEC1 compressed point.
pub const COMPRESSED_LEN: usize = 33;

/// Length of a coordinate or scalar word.
pub const WORD_LEN: usize = 32;

/// A scalar modulo the group order `n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scalar(k256::Scalar);

impl Scalar {
    pub const ZERO: Scalar = Scalar(k256::Scalar::ZERO);
    pub const ONE: Scalar = Scalar(k256::Scalar::ONE);

    /// Parse a big-endian word. Returns `None` when the value is `>= n`.
    pub fn from_be_bytes(bytes: &[u8; WORD_LEN]) -> Option<Self> {
        let repr = FieldBytes::from(*bytes);
        Option::<k256::Scalar>::from(k256::Scalar::from_repr(repr)).map(Scalar)
    }

    /// Interpret up to 32 big-endian bytes as an integer, left-padding with zeros.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > WORD_LEN {
            return None;
        }
        let mut word = [0u8; WORD_LEN];
        word[WORD_LEN - bytes.len()..].copy_from_slice(bytes);
        Self::from_be_bytes(&word)
    }

    pub fn from_u128(value: u128) -> Self {
        Scalar(k256::Scalar::from(value))
    }

    /// Reduce an arbitrary 256-bit big-endian integer modulo `n`.
    pub fn reduce_be_bytes(bytes: &[u8; WORD_LEN]) -> Self {
        Scalar(<k256::Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(*bytes)))
    }

    pub fn to_be_bytes(&self) -> [u8; WORD_LEN] {
        self.0.to_bytes().into()
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }

    /// Draw a uniformly random non-zero scalar from the OS entropy source.
    ///
    /// Rejection sampling keeps the distribution uniform over `[1, n-1]`.
    /// Entropy failures are returned, never papered over.
    pub fn random() -> Result<Self, rand::Error> {
        loop {
            let mut word = [0u8; WORD_LEN];
            OsRng.try_fill_bytes(&mut word)?;
            if let Some(scalar) = Self::from_be_bytes(&word) {
                if !scalar.is_zero() {
                    return Ok(scalar);
                }
            }
        }
    }
}

impl Add for Scalar {
    type Output = Scalar;

    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl Mul for Scalar {
    type Output = Scalar;

    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

/// A point on secp256k1, possibly the identity.
#[derive(Clone, Copy, Debug)]
pub struct Point(ProjectivePoint);

impl Point {
    pub fn generator() -> Self {
        Point(ProjectivePoint::GENERATOR)
    }

    pub fn identity() -> Self {
        Point(ProjectivePoint::IDENTITY)
    }

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    /// Decode any SEC1 encoding (compressed or uncompressed).
    pub fn from_sec1(bytes: &[u8]) -> Option<Self> {
        let encoded = EncodedPoint::from_bytes(bytes).ok()?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))?;
        let point = Point(ProjectivePoint::from(affine));
        if point.is_identity() {
            None
        } else {
            Some(point)
        }
    }

    /// Decode raw affine coordinates. Fails when `(x, y)` is not on the curve.
    pub fn from_coordinates(x: &[u8; WORD_LEN], y: &[u8; WORD_LEN]) -> Option<Self> {
        let encoded =
            EncodedPoint::from_affine_coordinates(&FieldBytes::from(*x), &FieldBytes::from(*y), false);
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))?;
        Some(Point(ProjectivePoint::from(affine)))
    }

    /// SEC1 compressed form. The identity encodes as 33 zero bytes so the
    /// output width never varies; callers reject the identity before hashing.
    pub fn to_compressed(&self) -> [u8; COMPRESSED_LEN] {
        let mut out = [0u8; COMPRESSED_LEN];
        if self.is_identity() {
            return out;
        }
        let encoded = self.0.to_affine().to_encoded_point(true);
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Affine `(x, y)` as big-endian words; zeros for the identity.
    pub fn coordinates(&self) -> ([u8; WORD_LEN], [u8; WORD_LEN]) {
        let mut x = [0u8; WORD_LEN];
        let mut y = [0u8; WORD_LEN];
        if self.is_identity() {
            return (x, y);
        }
        let encoded = self.0.to_affine().to_encoded_point(false);
        if let (Some(ex), Some(ey)) = (encoded.x(), encoded.y()) {
            x.copy_from_slice(ex);
            y.copy_from_slice(ey);
        }
        (x, y)
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Point) -> bool {
        self.0 == other.0
    }
}

impl Eq for Point {}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point(self.0 - rhs.0)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point(-self.0)
    }
}

impl Mul<Scalar> for Point {
    type Output = Point;

    fn mul(self, rhs: Scalar) -> Point {
        Point(self.0 * rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_round_trips_through_every_encoding() {
        let g = Point::generator();
        let compressed = g.to_compressed();
        assert_eq!(compressed[0], 0x02);
        assert_eq!(Point::from_sec1(&compressed), Some(g));

        let (x, y) = g.coordinates();
        assert_eq!(Point::from_coordinates(&x, &y), Some(g));
        assert_eq!(
            hex::encode(x),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn group_law_holds() {
        let g = Point::generator();
        let two = Scalar::ONE + Scalar::ONE;
        assert_eq!(g + g, g * two);
        assert!((g - g).is_identity());
        assert_eq!(-(-g), g);
        assert_eq!(g + (-g), Point::identity());
    }

    #[test]
    fn identity_encodes_with_fixed_width() {
        let id = Point::identity();
        assert_eq!(id.to_compressed(), [0u8; COMPRESSED_LEN]);
        assert_eq!(id.coordinates(), ([0u8; WORD_LEN], [0u8; WORD_LEN]));
    }

    #[test]
    fn off_curve_coordinates_are_rejected() {
        let (x, mut y) = Point::generator().coordinates();
        y[31] ^= 0x01;
        assert!(Point::from_coordinates(&x, &y).is_none());
    }

    #[test]
    fn scalar_rejects_values_at_or_above_order() {
        let order =
            hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141").unwrap();
        let mut word = [0u8; WORD_LEN];
        word.copy_from_slice(&order);
        assert!(Scalar::from_be_bytes(&word).is_none());

        word[31] -= 1;
        let max = Scalar::from_be_bytes(&word).unwrap();
        assert_eq!(max + Scalar::ONE, Scalar::ZERO);
    }

    #[test]
    fn random_scalars_are_non_zero_and_distinct() {
        let a = Scalar::random().unwrap();
        let b = Scalar::random().unwrap();
        assert!(!a.is_zero());
        assert_ne!(a, b);
    }
}
