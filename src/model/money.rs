//! `Money` values and their addition rules.
//!
//! Ground truth is `google/scc/money.py`'s `add`: normalize the nanos carry
//! into units, reconcile sign mismatches between the reconciled units/nanos,
//! then detect overflow keyed off the *operands'* signs (`_sign_of(a)`,
//! `_sign_of(b)`), not the final sum's sign. Translated from Python's
//! arbitrary-precision integers to Rust's `i64`, so the overflow checks use
//! `i64::MAX`/`i64::MIN` directly instead of `sys.maxint`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One less than one billion: the largest valid magnitude for [`Money::nanos`].
pub const MAX_NANOS: i32 = 999_999_999;
const BILLION: i64 = 1_000_000_000;

/// An amount of money with a three-letter ISO 4217 currency code.
///
/// Invariant: `sign(units) == sign(nanos)` whenever both are nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub currency_code: [u8; 3],
    pub units: i64,
    pub nanos: i32,
}

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("currency codes do not match: {0:?} vs {1:?}")]
    CurrencyMismatch([u8; 3], [u8; 3]),
    #[error("money addition overflowed and allow_overflow was false")]
    Overflow,
}

impl Money {
    pub fn new(currency_code: &str, units: i64, nanos: i32) -> Self {
        let mut code = [0u8; 3];
        let bytes = currency_code.as_bytes();
        code[..bytes.len().min(3)].copy_from_slice(&bytes[..bytes.len().min(3)]);
        Self {
            currency_code: code,
            units,
            nanos,
        }
    }

    pub fn currency_str(&self) -> String {
        String::from_utf8_lossy(&self.currency_code).into_owned()
    }

    fn sign_of(&self) -> i64 {
        if self.units != 0 {
            return if self.units > 0 { 1 } else { -1 };
        }
        if self.nanos != 0 {
            return if self.nanos > 0 { 1 } else { -1 };
        }
        0
    }
}

/// Adds two `Money` values, as `google/scc/money.py`'s `add`.
///
/// When `allow_overflow` is true, a sum whose magnitude exceeds `i64::MAX`
/// is clamped to `±i64::MAX` units, `±MAX_NANOS` nanos; when false, overflow
/// is reported as `MoneyError::Overflow` rather than wrapping silently.
pub fn add(a: Money, b: Money, allow_overflow: bool) -> Result<Money, MoneyError> {
    if a.currency_code != b.currency_code {
        return Err(MoneyError::CurrencyMismatch(a.currency_code, b.currency_code));
    }

    let (nano_carry, mut nanos_sum) = sum_nanos(a.nanos, b.nanos);
    let units_sum_no_carry = a.units.saturating_add(b.units);
    let mut units_sum = units_sum_no_carry.saturating_add(nano_carry);

    if units_sum > 0 && nanos_sum < 0 {
        units_sum -= 1;
        nanos_sum += BILLION as i32;
    } else if units_sum < 0 && nanos_sum > 0 {
        units_sum += 1;
        nanos_sum -= BILLION as i32;
    }

    let sign_a = a.sign_of();
    let sign_b = b.sign_of();

    if sign_a > 0 && sign_b > 0 && units_sum >= i64::MAX {
        return if allow_overflow {
            Ok(Money {
                currency_code: a.currency_code,
                units: i64::MAX,
                nanos: MAX_NANOS,
            })
        } else {
            Err(MoneyError::Overflow)
        };
    }

    if sign_a < 0 && sign_b < 0 && (units_sum_no_carry <= -i64::MAX || units_sum <= -i64::MAX) {
        return if allow_overflow {
            Ok(Money {
                currency_code: a.currency_code,
                units: -i64::MAX,
                nanos: -MAX_NANOS,
            })
        } else {
            Err(MoneyError::Overflow)
        };
    }

    Ok(Money {
        currency_code: a.currency_code,
        units: units_sum,
        nanos: nanos_sum,
    })
}

fn sum_nanos(a: i32, b: i32) -> (i64, i32) {
    let sum = a as i64 + b as i64;
    if sum > BILLION {
        (1, (sum - BILLION) as i32)
    } else if sum <= -BILLION {
        (-1, (sum + BILLION) as i32)
    } else {
        (0, sum as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_add_same_sign() {
        let a = Money::new("USD", 1, 500_000_000);
        let b = Money::new("USD", 2, 600_000_000);
        let sum = add(a, b, false).unwrap();
        assert_eq!(sum.units, 4);
        assert_eq!(sum.nanos, 100_000_000);
    }

    #[test]
    fn currency_mismatch_errors() {
        let a = Money::new("USD", 1, 0);
        let b = Money::new("EUR", 1, 0);
        assert!(matches!(add(a, b, false), Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn positive_overflow_raises_without_allow_overflow() {
        let a = Money::new("USD", i64::MAX - 1, 0);
        let b = Money::new("USD", 2, 0);
        assert!(matches!(add(a, b, false), Err(MoneyError::Overflow)));
    }

    #[test]
    fn positive_overflow_clamps_with_allow_overflow() {
        let a = Money::new("USD", i64::MAX - 1, 0);
        let b = Money::new("USD", 2, 0);
        let sum = add(a, b, true).unwrap();
        assert_eq!(sum.units, i64::MAX);
        assert_eq!(sum.nanos, MAX_NANOS);
    }

    #[test]
    fn negative_overflow_clamps_with_allow_overflow() {
        let a = Money::new("USD", -i64::MAX + 1, 0);
        let b = Money::new("USD", -2, 0);
        let sum = add(a, b, true).unwrap();
        assert_eq!(sum.units, -i64::MAX);
        assert_eq!(sum.nanos, -MAX_NANOS);
    }

    #[test]
    fn sign_reconciliation_adjusts_nanos_carry() {
        let a = Money::new("USD", 1, -600_000_000);
        let b = Money::new("USD", 0, 100_000_000);
        let sum = add(a, b, false).unwrap();
        // units_sum_no_carry=1, nanos_sum=-500_000_000: units>0,nanos<0 => adjust
        assert_eq!(sum.units, 0);
        assert_eq!(sum.nanos, 500_000_000);
    }
}
