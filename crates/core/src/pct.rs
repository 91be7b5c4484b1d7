//! Fixed-point fractions
//!
//! Fractions are stored as integers scaled by `PCT_BASE` (10^18), so 50% is
//! `500_000_000_000_000_000`. Comparisons against token weights are done with
//! full 256-bit intermediate products so no amount can overflow them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scale of a `Pct`: 10^18 represents 100%
pub const PCT_BASE: u64 = 1_000_000_000_000_000_000;

/// A fraction in `[0, 1]` scaled by `PCT_BASE`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pct(u64);

impl Pct {
    /// Zero percent
    pub const ZERO: Pct = Pct(0);
    /// One hundred percent
    pub const ONE: Pct = Pct(PCT_BASE);

    /// Create from a raw scaled value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Create from whole percentage points, e.g. `from_percent(50)`
    pub const fn from_percent(percent: u64) -> Self {
        Self(percent * (PCT_BASE / 100))
    }

    /// The raw scaled value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Approximate value as a float, for display and logging only
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / PCT_BASE as f64
    }

    /// Whether `value / total >= self`
    ///
    /// A zero `total` never meets a threshold.
    pub fn is_met_by(&self, value: u128, total: u128) -> bool {
        if total == 0 {
            return false;
        }
        let lhs = mul_wide(value, PCT_BASE as u128);
        let rhs = mul_wide(self.0 as u128, total);
        lhs >= rhs
    }
}

impl fmt::Display for Pct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}%", self.as_f64() * 100.0)
    }
}

impl fmt::Debug for Pct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pct({})", self.0)
    }
}

/// Full 256-bit product of two u128 values as `(high, low)`
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_lo, a_hi) = (a & MASK, a >> 64);
    let (b_lo, b_hi) = (b & MASK, b >> 64);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let low = (ll & MASK) | (mid << 64);
    let high = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (high, low)
}
