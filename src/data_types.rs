//! Data types used across different parts of the orchestration layer.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub},
};

use serde::{Deserialize, Serialize};

/// An element of the ring Z/2^64, used for additive secret shares and pairwise masks.
///
/// All arithmetic wraps, so masks and Beaver-triple shares cancel exactly regardless of
/// their magnitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RingElem(pub i64);

impl RingElem {
    /// The additive identity.
    pub const ZERO: Self = Self(0);
    /// The multiplicative identity.
    pub const ONE: Self = Self(1);
}

impl fmt::Display for RingElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for RingElem {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<bool> for RingElem {
    fn from(bit: bool) -> Self {
        Self(bit as i64)
    }
}

impl Add for RingElem {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for RingElem {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for RingElem {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Mul for RingElem {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_mul(rhs.0))
    }
}

impl Neg for RingElem {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(self.0.wrapping_neg())
    }
}

impl Sum for RingElem {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a RingElem> for RingElem {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// The side of a server/client link a party plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Holds the server set (and, for [`Psm::HomomorphicSum`], the associated values).
    Server,
    /// Holds the client set and proxies it towards the paired server.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Selects which statistic over the intersection is computed in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Psm {
    /// Counts the matches and classifies the count against two thresholds.
    CardinalityThreshold,
    /// Sums the server values associated with matching elements under Paillier encryption.
    HomomorphicSum,
    /// Securely compares paired bins and reveals the sum of the per-pair equality bits.
    SecretSharedEquality,
}

#[cfg(test)]
mod tests {
    use super::RingElem;

    #[test]
    fn ring_arithmetic_wraps() {
        let max = RingElem(i64::MAX);
        assert_eq!(max + RingElem::ONE, RingElem(i64::MIN));
        assert_eq!(RingElem(i64::MIN) - RingElem::ONE, max);
        assert_eq!(-RingElem(i64::MIN), RingElem(i64::MIN));
        assert_eq!(RingElem(1 << 62) * RingElem(4), RingElem::ZERO);
    }

    #[test]
    fn masks_cancel_in_sums() {
        let secret = RingElem(0x7fff_ffff_ffff_fff1);
        let shares = [RingElem(5) + secret, RingElem(9) - secret, -RingElem(14)];
        assert_eq!(shares.iter().sum::<RingElem>(), RingElem::ZERO);
    }
}
