//! Protocol parameters for the commodity model

use crate::arith::mod_mul;
use crate::sharing::generate_beaver_triplet;
use crate::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::{OsRng, SmallRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Miller-Rabin witnesses tried per candidate
const PRIMALITY_ROUNDS: usize = 32;

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Correlated randomness `(w, u, v)` with `w = u * v mod M`, distributed by
/// the dealer ahead of the protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaverTriplet {
    /// Product component
    pub w: BigUint,
    /// First factor
    pub u: BigUint,
    /// Second factor
    pub v: BigUint,
}

impl BeaverTriplet {
    /// Check `w = u * v mod modulus`
    pub fn is_consistent(&self, modulus: &BigUint) -> bool {
        !modulus.is_zero() && mod_mul(&self.u, &self.v, modulus) == self.w
    }
}

/// Immutable configuration of one protocol instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    party_count: usize,
    modulus: BigUint,
    triplet: BeaverTriplet,
    async_marker: usize,
}

impl Parameters {
    /// Assemble parameters from dealer-provided values.
    ///
    /// No validation happens here; protocols validate on setup.
    pub fn new(
        party_count: usize,
        modulus: BigUint,
        triplet: BeaverTriplet,
        async_marker: usize,
    ) -> Self {
        Self {
            party_count,
            modulus,
            triplet,
            async_marker,
        }
    }

    /// Act as the dealer: pick a random prime modulus of `bit_length` bits,
    /// a Beaver triplet for it and the party using the alternate
    /// multiplication setup.
    pub fn generate(bit_length: u64, party_count: usize) -> Result<Self> {
        if party_count < 2 {
            return Err(Error::InvalidConfig(format!(
                "at least 2 computing parties are required, got {party_count}"
            )));
        }

        let modulus = random_prime(bit_length)?;
        let triplet = generate_beaver_triplet(&modulus)?;
        let async_marker = SmallRng::from_entropy().gen_range(0..party_count);

        debug!(bit_length, party_count, "Generated protocol parameters");

        Ok(Self::new(party_count, modulus, triplet, async_marker))
    }

    /// Number of computing parties
    pub fn party_count(&self) -> usize {
        self.party_count
    }

    /// Ring modulus M
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn triplet(&self) -> &BeaverTriplet {
        &self.triplet
    }

    /// Party holding the alternate multiplication role
    pub fn async_marker(&self) -> usize {
        self.async_marker
    }

    /// Check the invariants a protocol relies on
    pub fn validate(&self) -> Result<()> {
        if self.party_count < 2 {
            return Err(Error::InvalidConfig(format!(
                "the number of computing parties must be at least 2, got {}",
                self.party_count
            )));
        }
        if self.modulus <= BigUint::one() {
            return Err(Error::InvalidConfig("modulus must be greater than 1".into()));
        }
        if self.async_marker >= self.party_count {
            return Err(Error::InvalidConfig(format!(
                "async marker {} is not a party id",
                self.async_marker
            )));
        }
        if !self.triplet.is_consistent(&self.modulus) {
            return Err(Error::InvalidConfig(
                "Beaver triplet does not satisfy w = u * v mod M".into(),
            ));
        }
        Ok(())
    }
}

/// Random prime with exactly `bits` bits
pub fn random_prime(bits: u64) -> Result<BigUint> {
    if bits < 2 {
        return Err(Error::Arithmetic(format!(
            "cannot generate a {bits}-bit prime"
        )));
    }

    let mut rng = OsRng;
    let high = BigUint::one() << (bits - 1);
    loop {
        let candidate = rng.gen_biguint(bits - 1) | &high | BigUint::one();
        if is_probable_prime(&candidate) {
            return Ok(candidate);
        }
    }
}

/// Miller-Rabin test after trial division by small primes
pub fn is_probable_prime(n: &BigUint) -> bool {
    if *n < BigUint::from(2u32) {
        return false;
    }
    for p in SMALL_PRIMES {
        if *n == BigUint::from(p) {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    let two = BigUint::from(2u32);

    let mut rng = OsRng;
    'witness: for _ in 0..PRIMALITY_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
