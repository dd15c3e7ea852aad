// sale-core/src/types.rs

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

/// Block number/height
pub type BlockNumber = u64;

/// Tokens minted per unit of contributed value
pub type ExchangeRate = u64;

/// Wei per ether
pub const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

/// Token or wei amount (using BigUint for arbitrary precision)
///
/// Serialized as a decimal string so configs and scripts stay readable;
/// plain integers are accepted on input as well.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(BigUint::from(value))
    }

    /// Whole ether expressed in wei (1 ether = 10^18 wei)
    pub fn ether(ether: u64) -> Self {
        Self(BigUint::from(ether) * BigUint::from(WEI_PER_ETHER))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.0.to_u128()
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 < other.0 {
            None
        } else {
            Some(Amount(&self.0 - &other.0))
        }
    }

    /// Exact product with an exchange rate
    pub fn scaled(&self, rate: ExchangeRate) -> Amount {
        Amount(&self.0 * BigUint::from(rate))
    }

    /// Floor of `self / divisor`, `None` when dividing by zero
    pub fn checked_div(&self, divisor: &Amount) -> Option<Amount> {
        if divisor.is_zero() {
            return None;
        }
        Some(Amount(&self.0 / &divisor.0))
    }

    /// Floor of `self * numerator / denominator` without intermediate loss
    pub fn mul_div_floor(&self, numerator: &Amount, denominator: &Amount) -> Option<Amount> {
        if denominator.is_zero() {
            return None;
        }
        Some(Amount(&self.0 * &numerator.0 / &denominator.0))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |acc, a| Amount(acc.0 + &a.0))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl FromStr for Amount {
    type Err = crate::LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().chars().filter(|c| *c != '_').collect();
        BigUint::parse_bytes(digits.as_bytes(), 10)
            .map(Amount)
            .ok_or_else(|| crate::LedgerError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> de::Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount::from_u64(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount::from_u128(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u64::try_from(v)
                    .map(Amount::from_u64)
                    .map_err(|_| E::custom("amount must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_any(AmountVisitor)
        } else {
            deserializer.deserialize_str(AmountVisitor)
        }
    }
}
