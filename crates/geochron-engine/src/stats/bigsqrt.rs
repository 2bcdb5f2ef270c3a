//! Arbitrary-precision square root via Babylonian iteration.
//!
//! The reduction needs square roots of quantities whose magnitude can fall
//! outside comfortable `f64` territory (products of count totals), so this
//! module carries a minimal scaled-integer decimal on top of
//! [`num_bigint::BigInt`] and an integer Newton/Babylonian iteration.

use std::fmt;
use std::str::FromStr;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};

/// Default output precision, in significant digits.
pub const DEFAULT_SQRT_SIGNIFICANT_DIGITS: u32 = 34;

/// A decimal number `unscaled * 10^-scale` (negative scales denote trailing
/// zeros before the decimal point).
///
/// Deliberately small: construction, display, and the square root are all the
/// engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigDecimal {
    unscaled: BigInt,
    scale: i64,
}

impl BigDecimal {
    pub fn new(unscaled: BigInt, scale: i64) -> Self {
        Self { unscaled, scale }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            unscaled: BigInt::from(value),
            scale: 0,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.unscaled.sign() == Sign::Minus
    }

    pub fn to_f64(&self) -> f64 {
        let unscaled = self.unscaled.to_f64().unwrap_or(f64::NAN);
        unscaled / 10f64.powi(self.scale as i32)
    }

    /// Babylonian square root to [`DEFAULT_SQRT_SIGNIFICANT_DIGITS`].
    pub fn sqrt(&self) -> Option<BigDecimal> {
        self.sqrt_babylonian(DEFAULT_SQRT_SIGNIFICANT_DIGITS)
    }

    /// Babylonian square root to `significant_digits` significant digits.
    /// Returns `None` for negative input.
    pub fn sqrt_babylonian(&self, significant_digits: u32) -> Option<BigDecimal> {
        if self.is_negative() {
            return None;
        }
        if self.unscaled.is_zero() {
            return Some(BigDecimal::from_integer(0));
        }
        let digits = significant_digits.max(1);

        // Scale the radicand so its integer square root carries a few guard
        // digits beyond the requested precision: with
        // value = u * 10^-scale, sqrt(value) = sqrt(u * 10^(2q - scale)) / 10^q.
        let magnitude = self.unscaled.magnitude().clone();
        let value_digits = decimal_digit_count(&magnitude);
        let guard = 3u32;
        let needed = 2 * (digits + guard);
        let deficit = needed.saturating_sub(value_digits);
        let mut q = i64::from(deficit.div_ceil(2) + guard);
        if 2 * q < self.scale {
            q = (self.scale + 1) / 2 + i64::from(guard);
        }

        let shift = u32::try_from(2 * q - self.scale).ok()?;
        let radicand = &magnitude * BigUint::from(10u32).pow(shift);
        let root = integer_sqrt(&radicand);

        Some(round_to_significant(
            BigDecimal {
                unscaled: BigInt::from(root),
                scale: q,
            },
            digits,
        ))
    }
}

impl FromStr for BigDecimal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sign, body) = match s.as_bytes().first() {
            Some(b'-') => (Sign::Minus, &s[1..]),
            Some(b'+') => (Sign::Plus, &s[1..]),
            _ => (Sign::Plus, s),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("not a decimal number: {s:?}"));
        }
        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("not a decimal number: {s:?}"));
        }
        let magnitude = BigUint::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| format!("not a decimal number: {s:?}"))?;
        Ok(BigDecimal {
            unscaled: BigInt::from_biguint(sign, magnitude),
            scale: frac_part.len() as i64,
        })
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut digits = self.unscaled.magnitude().to_str_radix(10);
        if self.is_negative() {
            f.write_str("-")?;
        }
        if self.scale <= 0 {
            for _ in 0..(-self.scale) {
                digits.push('0');
            }
            return f.write_str(&digits);
        }
        let scale = self.scale as usize;
        if digits.len() <= scale {
            let mut padded = String::with_capacity(scale + 2);
            padded.push_str("0.");
            for _ in 0..(scale - digits.len()) {
                padded.push('0');
            }
            padded.push_str(&digits);
            return f.write_str(&padded);
        }
        digits.insert(digits.len() - scale, '.');
        f.write_str(&digits)
    }
}

/// Integer square root (floor) via Babylonian iteration.
///
/// The initial guess comes from the `f64` square root when the value fits; a
/// magnitude-adjusted bit-shift estimate otherwise. The iteration
/// `x' = (x + n / x) / 2` is monotonically decreasing once above the true
/// root, so termination is when it stops decreasing.
fn integer_sqrt(n: &BigUint) -> BigUint {
    if n.is_zero() || n.is_one() {
        return n.clone();
    }

    let overshoot = || BigUint::one() << ((n.bits() / 2 + 1) as usize);
    let mut x = match n.to_f64() {
        Some(approx) if approx.is_finite() => BigUint::from_f64(approx.sqrt().ceil())
            .filter(|g| !g.is_zero())
            .unwrap_or_else(overshoot),
        _ => overshoot(),
    };

    // The guess must start at or above the root for the descent argument.
    while &x * &x < *n {
        x = &x * 2u32;
    }

    loop {
        let next = (&x + n / &x) / 2u32;
        if next >= x {
            return x;
        }
        x = next;
    }
}

fn decimal_digit_count(n: &BigUint) -> u32 {
    if n.is_zero() {
        1
    } else {
        n.to_str_radix(10).len() as u32
    }
}

/// Rounds (half-up) to the requested number of significant digits.
fn round_to_significant(value: BigDecimal, significant_digits: u32) -> BigDecimal {
    let magnitude = value.unscaled.magnitude().clone();
    let digit_count = decimal_digit_count(&magnitude);
    if digit_count <= significant_digits {
        return value;
    }
    let drop = digit_count - significant_digits;
    let divisor = BigUint::from(10u32).pow(drop);
    let half = &divisor / BigUint::from(2u32);
    let rounded = (&magnitude + half) / divisor;
    let sign = value.unscaled.sign();
    BigDecimal {
        unscaled: BigInt::from_biguint(
            if sign == Sign::Minus { Sign::Minus } else { Sign::Plus },
            rounded,
        ),
        scale: value.scale - i64::from(drop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_two_to_34_significant_digits() {
        let two = BigDecimal::from_integer(2);
        let root = two.sqrt_babylonian(34).unwrap();
        assert_eq!(root.to_string(), "1.414213562373095048801688724209698");
    }

    #[test]
    fn sqrt_of_perfect_square() {
        let n = BigDecimal::from_integer(144);
        let root = n.sqrt_babylonian(10).unwrap();
        assert!((root.to_f64() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn sqrt_of_fraction() {
        let quarter: BigDecimal = "0.25".parse().unwrap();
        let root = quarter.sqrt_babylonian(10).unwrap();
        assert!((root.to_f64() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn sqrt_of_huge_value_uses_shift_seed() {
        // 10^400 is far outside f64 range; its root is 10^200.
        let huge = BigDecimal::new(BigInt::from(10u32).pow(400), 0);
        let root = huge.sqrt_babylonian(20).unwrap();
        assert_eq!(root.to_string().len(), 201);
        assert!((root.to_f64().log10() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn negative_input_has_no_root() {
        let neg = BigDecimal::from_integer(-4);
        assert!(neg.sqrt_babylonian(10).is_none());
    }

    #[test]
    fn display_round_trips_small_values() {
        let parsed: BigDecimal = "0.0025".parse().unwrap();
        assert_eq!(parsed.to_string(), "0.0025");
        let parsed: BigDecimal = "12.5".parse().unwrap();
        assert_eq!(parsed.to_string(), "12.5");
    }
}
