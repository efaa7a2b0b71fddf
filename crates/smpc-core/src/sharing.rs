//! Additive secret sharing and Beaver triplet generation

use crate::arith::{get_random, mod_inverse, mod_mul, mod_sum, reduce};
use crate::params::BeaverTriplet;
use crate::{Error, Result, Share};
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Split `secret` into `n` additive shares modulo `m`.
///
/// Every share lies in `[0, m)` and the shares sum to `secret mod m`. All
/// slots but one are drawn from the CSPRNG; the slot absorbing the remainder
/// is picked at random so its position reveals nothing.
pub fn generate_shares(secret: i64, n: usize, m: &BigUint) -> Result<Vec<Share>> {
    if n == 0 {
        return Err(Error::InvalidConfig("at least one share is required".into()));
    }
    if m.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }

    let j = SmallRng::from_entropy().gen_range(0..n);

    let mut shares = vec![BigUint::zero(); n];
    for (i, share) in shares.iter_mut().enumerate() {
        if i != j {
            *share = get_random(m)?;
        }
    }

    let sum = BigInt::from(mod_sum(shares.iter(), m));
    shares[j] = reduce(&(BigInt::from(secret) - sum), m)?;

    Ok(shares)
}

/// Sum `shares` modulo `m`, recovering the shared secret's residue
pub fn reconstruct(shares: &[Share], m: &BigUint) -> Result<BigUint> {
    if m.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }
    Ok(mod_sum(shares, m))
}

/// Generate a Beaver triplet `(w, u, v)` with `w = u * v mod n`
pub fn generate_beaver_triplet(n: &BigUint) -> Result<BeaverTriplet> {
    let x = get_random(n)?;
    let y = get_random(n)?;

    let triplet = if SmallRng::from_entropy().gen_bool(0.5) {
        BeaverTriplet {
            w: mod_mul(&x, &y, n),
            u: x,
            v: y,
        }
    } else {
        // v = x, w = y, u = (x * y^-1)^-1
        let u = mod_mul(&x, &mod_inverse(&y, n)?, n);
        BeaverTriplet {
            u: mod_inverse(&u, n)?,
            v: x,
            w: y,
        }
    };

    Ok(triplet)
}
