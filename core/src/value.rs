//! Identities and currency amounts.
//!
//! Amounts are integers in the smallest currency unit to avoid floating
//! point errors. All arithmetic is checked; callers decide what an overflow
//! means for them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An already-authenticated caller identity
///
/// The ledger never verifies identities; it only compares them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Amount of currency in its smallest unit
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(u128);

impl Amount {
    /// The zero amount
    pub const ZERO: Self = Self(0);

    /// Creates an amount from smallest units
    #[must_use]
    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    /// Creates `whole * 10^decimals` units with overflow checking
    ///
    /// `Amount::checked_scaled(1, 18)` is one whole coin of an 18-decimal currency.
    #[must_use]
    pub const fn checked_scaled(whole: u128, decimals: u32) -> Option<Self> {
        let Some(scale) = 10u128.checked_pow(decimals) else {
            return None;
        };
        match whole.checked_mul(scale) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Returns the amount in smallest units
    #[must_use]
    pub const fn units(&self) -> u128 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtracts two amounts (returns None if the result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(difference) => Some(Self(difference)),
            None => None,
        }
    }

    /// Multiplies the amount by a quantity with overflow checking
    #[must_use]
    #[allow(clippy::cast_lossless)] // u128::from is not const
    pub const fn checked_mul(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity as u128) {
            Some(product) => Some(Self(product)),
            None => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checked_scaled() {
        assert_eq!(
            Amount::checked_scaled(2, 18),
            Some(Amount::from_units(2_000_000_000_000_000_000))
        );
        assert_eq!(Amount::checked_scaled(1, 40), None);
    }

    #[test]
    fn test_checked_mul_overflow() {
        let max = Amount::from_units(u128::MAX);
        assert_eq!(max.checked_mul(2), None);
        assert_eq!(max.checked_mul(1), Some(max));
        assert_eq!(Amount::from_units(7).checked_mul(0), Some(Amount::ZERO));
    }

    #[test]
    fn test_checked_sub_never_negative() {
        let five = Amount::from_units(5);
        assert_eq!(five.checked_sub(Amount::from_units(6)), None);
        assert_eq!(five.checked_sub(five), Some(Amount::ZERO));
    }

    #[test]
    fn test_identity_display() {
        let id = Identity::from("0xabc");
        assert_eq!(id.to_string(), "0xabc");
        assert_eq!(id.as_str(), "0xabc");
    }

    proptest! {
        #[test]
        fn prop_mul_matches_repeated_add(price in 0u128..1_000_000_000, quantity in 0u64..64) {
            let unit = Amount::from_units(price);
            let mut sum = Amount::ZERO;
            for _ in 0..quantity {
                sum = sum.checked_add(unit).unwrap_or(Amount::ZERO);
            }
            prop_assert_eq!(unit.checked_mul(quantity), Some(sum));
        }
    }
}
