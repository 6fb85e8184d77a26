//! Common Types for the 5G uplink PHY
//!
//! Defines fundamental types shared by the PHY layer and the gNodeB application

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// First C-RNTI handed out to connected UEs
    pub const MIN_CRNTI: Self = Self(0x4601);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Parse a spacing given in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::from_u32(khz)
    }

    /// Spacing in kHz
    pub fn as_khz(&self) -> u32 {
        *self as u32
    }

    /// Numerology index (mu) as per TS 38.211 Table 4.2-1
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }
}

/// Number of system frames before the SFN wraps around
pub const NOF_SFNS: u32 = 1024;

/// Number of subframes in a 10 ms radio frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// A slot in the SFN hyper period.
///
/// Slot points advance monotonically and wrap every 1024 frames. Ordering is
/// wrap-aware: `a < b` when `b` is less than half a hyper period ahead of `a`,
/// so comparisons stay meaningful across the SFN rollover. Points of different
/// numerologies cannot be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from SFN and slot index within the frame
    pub fn new(scs: SubcarrierSpacing, sfn: u16, slot: u8) -> Self {
        let numerology = scs.numerology();
        let slots_per_frame = NOF_SUBFRAMES_PER_FRAME << numerology;
        assert!((sfn as u32) < NOF_SFNS, "SFN {} out of range", sfn);
        assert!(
            (slot as u32) < slots_per_frame,
            "Slot {} out of range for {} slots per frame",
            slot,
            slots_per_frame
        );

        Self {
            numerology,
            count: sfn as u32 * slots_per_frame + slot as u32,
        }
    }

    /// Create a slot point from a running slot count, wrapped into the hyper period
    pub fn from_count(scs: SubcarrierSpacing, count: u64) -> Self {
        let numerology = scs.numerology();
        let period = NOF_SFNS * (NOF_SUBFRAMES_PER_FRAME << numerology);

        Self {
            numerology,
            count: (count % period as u64) as u32,
        }
    }

    /// Numerology index
    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Number of slots in a radio frame for this numerology
    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME << self.numerology
    }

    /// Slot count since SFN 0, slot 0
    pub fn count(&self) -> u32 {
        self.count
    }

    /// System frame number
    pub fn sfn(&self) -> u16 {
        (self.count / self.nof_slots_per_frame()) as u16
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u8 {
        (self.count % self.nof_slots_per_frame()) as u8
    }

    fn period(&self) -> u32 {
        NOF_SFNS * self.nof_slots_per_frame()
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let period = self.period() as u64;
        SlotPoint {
            numerology: self.numerology,
            count: ((self.count as u64 + rhs as u64) % period) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub for SlotPoint {
    type Output = i32;

    /// Signed distance in slots, taking the shortest way around the hyper period
    fn sub(self, rhs: SlotPoint) -> i32 {
        assert_eq!(
            self.numerology, rhs.numerology,
            "Cannot subtract slot points of different numerologies"
        );
        let period = self.period() as i64;
        let diff = (self.count as i64 - rhs.count as i64).rem_euclid(period);
        if diff >= period / 2 {
            (diff - period) as i32
        } else {
            diff as i32
        }
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.numerology != other.numerology {
            debug_assert!(false, "Comparing slot points of different numerologies");
            return None;
        }
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

/// Soft bit: log-likelihood ratio of a coded bit, positive values favour 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogLikelihoodRatio(pub i8);

impl LogLikelihoodRatio {
    /// Largest magnitude a combined LLR can reach
    pub const MAX: i8 = 120;
    /// Erased or punctured bit
    pub const ZERO: Self = Self(0);

    /// Create an LLR, clamping to the representable range
    pub fn new(value: i32) -> Self {
        let max = Self::MAX as i32;
        Self(value.clamp(-max, max) as i8)
    }

    /// Raw LLR value
    pub fn value(&self) -> i8 {
        self.0
    }

    /// Soft-combine two observations of the same coded bit
    pub fn combine(self, other: Self) -> Self {
        Self::new(self.0 as i32 + other.0 as i32)
    }

    /// Hard decision, negative LLRs map to bit 1
    pub fn hard_decision(&self) -> u8 {
        (self.0 < 0) as u8
    }

    /// LLR for a known bit with the given confidence
    pub fn from_bit(bit: u8, amplitude: i8) -> Self {
        if bit == 0 {
            Self::new(amplitude as i32)
        } else {
            Self::new(-(amplitude as i32))
        }
    }
}
