//! Randomness sourcing and modular arithmetic helpers
//!
//! All values handled here are owned big integers; nothing is shared between
//! callers, so results can be moved freely into party tasks.

use crate::{Error, Result};
use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

/// Sample `r` uniformly from `[0, n)` with `gcd(r, n) = 1`.
///
/// Uses the operating system CSPRNG and rejection sampling, so every
/// returned value is invertible modulo `n`.
pub fn get_random(n: &BigUint) -> Result<BigUint> {
    if n.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }

    let mut rng = OsRng;
    loop {
        let r = rng.gen_biguint_below(n);
        if r.gcd(n).is_one() {
            return Ok(r);
        }
    }
}

/// Reduce a signed integer into `[0, m)`
pub fn reduce(value: &BigInt, m: &BigUint) -> Result<BigUint> {
    if m.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }
    let modulus = BigInt::from_biguint(Sign::Plus, m.clone());
    let (_, magnitude) = value.mod_floor(&modulus).into_parts();
    Ok(magnitude)
}

/// Lift an element of `[0, m)` to its centered signed representative in
/// `(-m/2, m/2]`
pub fn to_signed(value: &BigUint, m: &BigUint) -> BigInt {
    let value = value % m;
    if &value * 2u32 > *m {
        BigInt::from_biguint(Sign::Plus, value) - BigInt::from_biguint(Sign::Plus, m.clone())
    } else {
        BigInt::from_biguint(Sign::Plus, value)
    }
}

/// `(a + b) mod m`
pub fn mod_add(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a + b) % m
}

/// `(a * b) mod m`
pub fn mod_mul(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

/// Sum of `values` reduced mod `m`
pub fn mod_sum<'a, I>(values: I, m: &BigUint) -> BigUint
where
    I: IntoIterator<Item = &'a BigUint>,
{
    values
        .into_iter()
        .fold(BigUint::zero(), |acc, v| acc + v)
        % m
}

/// Inverse of `a` modulo `m`
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Result<BigUint> {
    if m.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }
    a.modinv(m)
        .ok_or_else(|| Error::Arithmetic("value is not invertible modulo M".into()))
}

/// Integer division with remainder by a non-zero count
pub fn div_rem(a: &BigUint, divisor: usize) -> Result<(BigUint, BigUint)> {
    if divisor == 0 {
        return Err(Error::Arithmetic("division by zero".into()));
    }
    Ok(a.div_rem(&BigUint::from(divisor)))
}
