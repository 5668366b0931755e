//! Finite-field Diffie-Hellman over a fixed group
//!
//! All agreements share the 2048-bit MODP group from RFC 3526 with generator 2.
//! Nothing here authenticates a peer's public value; any party holding a private
//! value and a public value can derive the shared secret, including the relay.

use crate::error::{KeyAgreementError, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::sync::OnceLock;

/// RFC 3526 group 14 prime
const MODP_2048_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const GENERATOR: u32 = 2;

/// Immutable group parameters `(P, G)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupParams {
    /// Safe prime modulus
    pub prime: BigUint,
    /// Generator
    pub generator: BigUint,
}

impl GroupParams {
    /// The process-wide group every key agreement uses
    pub fn modp_2048() -> &'static GroupParams {
        static PARAMS: OnceLock<GroupParams> = OnceLock::new();
        PARAMS.get_or_init(|| GroupParams {
            prime: BigUint::parse_bytes(MODP_2048_PRIME_HEX.as_bytes(), 16)
                .expect("RFC 3526 prime is valid hex"),
            generator: BigUint::from(GENERATOR),
        })
    }

    /// Bit width of private exponents: `bitlength(P) - 1`
    pub fn private_bits(&self) -> u64 {
        self.prime.bits() - 1
    }
}

/// A user's private exponent and matching public value
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// `G^private mod P`
    pub public: BigUint,
    /// Uniform in `[1, 2^(bitlength(P) - 1)]`
    pub private: BigUint,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &crate::encoding::encode_hex(&self.public))
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Generate a new key pair from the operating system CSPRNG
pub fn generate_keypair() -> KeyPair {
    generate_keypair_with(GroupParams::modp_2048(), &mut OsRng)
}

/// Generate a key pair in `params` from a caller-supplied CSPRNG
pub fn generate_keypair_with<R>(params: &GroupParams, rng: &mut R) -> KeyPair
where
    R: RngCore + CryptoRng,
{
    // [0, 2^bits - 1] shifted to [1, 2^bits]
    let private = rng.gen_biguint(params.private_bits()) + BigUint::one();
    let public = params.generator.modpow(&private, &params.prime);
    KeyPair { public, private }
}

/// Compute `peer_public^private mod P`.
///
/// The peer value is not range checked here; see [`validate_public_value`].
pub fn compute_shared_secret(private: &BigUint, peer_public: &BigUint) -> BigUint {
    peer_public.modpow(private, &GroupParams::modp_2048().prime)
}

/// Check that a peer public value lies in `[1, P - 1]`.
///
/// No subgroup-confinement check is made.
pub fn validate_public_value(value: &BigUint) -> Result<()> {
    let prime = &GroupParams::modp_2048().prime;
    if value.bits() == 0 || value >= prime {
        return Err(KeyAgreementError::PublicValueOutOfRange);
    }
    Ok(())
}
