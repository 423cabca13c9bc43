use std::fmt::{Debug, Display, Formatter};

use crate::quantity::energy::KilowattHours;

/// Power in kilowatts.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    PartialOrd,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::From,
    derive_more::Neg,
    derive_more::Sub,
    derive_more::SubAssign,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct Kilowatts(pub f64);

impl Kilowatts {
    pub const ZERO: Self = Self(0.0);

    pub fn from_watts(watts: f64) -> Self {
        Self(watts * 0.001)
    }

    /// Energy transferred over one half-hour metering slot.
    pub fn for_half_hour(self) -> KilowattHours {
        KilowattHours(self.0 * 0.5)
    }
}

impl Display for Kilowatts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} kW", self.0)
    }
}

impl Debug for Kilowatts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.0}W", self.0 * 1000.0)
    }
}

impl std::ops::Mul<f64> for Kilowatts {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self(self.0 * rhs)
    }
}
