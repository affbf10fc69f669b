use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct FirmId;
    pub struct ConsumerId;
}

/// Trait for converting SlotMap keys to u64 for event fields and reports
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for FirmId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for ConsumerId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

// ============================================================================
// Scalars
// ============================================================================

pub type Price = f64;
pub type Quality = f64;
pub type Quantity = f64;
pub type Money = f64;

// ============================================================================
// Offer - a (price, quality) point on the market grid
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub price: Price,
    pub quality: Quality,
}

impl Offer {
    /// Both price and quality must be strictly positive.
    pub fn new(price: Price, quality: Quality) -> Self {
        debug_assert!(price > 0.0, "offer price must be positive, got {}", price);
        debug_assert!(
            quality > 0.0,
            "offer quality must be positive, got {}",
            quality
        );
        Self { price, quality }
    }
}

// ============================================================================
// OfferGrid - decimal scales for prices and qualities
// ============================================================================

/// Prices and qualities live on a decimal grid (`10^-scale` steps).
///
/// Rounding direction matters at the boundaries:
/// - expulsion thresholds round DOWN so pricing at the threshold is
///   guaranteed to expel (see `CompetitiveSegment::price_to_expel`),
/// - the cost-derived price floor rounds UP so a firm never quotes below
///   cost plus one grid step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferGrid {
    pub price_scale: u32,
    pub quality_scale: u32,
}

impl Default for OfferGrid {
    fn default() -> Self {
        Self {
            price_scale: 2,
            quality_scale: 1,
        }
    }
}

impl OfferGrid {
    /// Smallest representable price increment, e.g. 0.01 at scale 2.
    pub fn min_delta_price(&self) -> Price {
        10f64.powi(-(self.price_scale as i32))
    }

    /// Smallest representable quality increment, e.g. 0.1 at scale 1.
    pub fn quality_step(&self) -> Quality {
        10f64.powi(-(self.quality_scale as i32))
    }

    pub fn floor_price(&self, p: Price) -> Price {
        floor_to_scale(p, self.price_scale)
    }

    pub fn ceil_price(&self, p: Price) -> Price {
        ceil_to_scale(p, self.price_scale)
    }

    pub fn round_price(&self, p: Price) -> Price {
        round_to_scale(p, self.price_scale)
    }

    pub fn round_quality(&self, q: Quality) -> Quality {
        round_to_scale(q, self.quality_scale)
    }

    /// Integer grid tick for a quality level. One firm may occupy each tick.
    pub fn quality_tick(&self, q: Quality) -> i64 {
        (q * 10f64.powi(self.quality_scale as i32)).round() as i64
    }

    /// Quality value at a grid tick. Division rounds the decimal correctly
    /// where multiplying by the step would drift an ulp (51 * 0.1 != 5.1).
    pub fn quality_at_tick(&self, tick: i64) -> Quality {
        tick as f64 / 10f64.powi(self.quality_scale as i32)
    }
}

// Scaled values sit within a few ulps of the intended decimal, so directed
// rounding first absorbs that noise; otherwise 10.399999999999999 would
// floor to 10.39 instead of 10.4. Well below any real grid step.
const GRID_SNAP: f64 = 1e-9;

pub fn floor_to_scale(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    (value * factor + GRID_SNAP).floor() / factor
}

pub fn ceil_to_scale(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    (value * factor - GRID_SNAP).ceil() / factor
}

pub fn round_to_scale(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    (value * factor).round() / factor
}
