//! Elliptic-curve primitives and the VRF engine built on top of them.

pub mod curve;
pub mod vrf;

pub use vrf::{
    decode, fast_verify_components, keygen, proof_to_hash, prove, verify, FastVerifyComponents,
    KeyPair, Proof, PublicKey, SecretKey, VrfError, VrfVerification, PROOF_LEN,
};
