//! Price windows: the interval over which a fixed neighbor pair holds.
//!
//! Between its expulsion thresholds and its entry ceiling, an offer at a
//! given quality keeps the same lower and higher neighbors, so expected
//! demand is a smooth function of price there and can be maximized in
//! isolation. The search walks one window per hypothetical eviction.

use crate::segment::{CompetitiveSegment, ExpulsionPrice, FirmSnapshot};
use crate::types::{Offer, Price, Quality};

/// One feasible price interval `[min_price, max_price]` for an offer at a
/// fixed quality, together with the neighbors bounding it there.
#[derive(Debug, Clone, Copy)]
pub struct NeighborWindow {
    pub lo: Option<FirmSnapshot>,
    pub hi: Option<FirmSnapshot>,
    /// Highest of the cost floor and the neighbors' expulsion thresholds:
    /// pricing below this point would change the neighbor set.
    pub min_price: Price,
    /// Lowest of the entry ceiling between the neighbors and the expulsion
    /// threshold that opened this window.
    pub max_price: Price,
}

impl NeighborWindow {
    /// Bound the prices at which an offer at `quality` would sit between
    /// the segment's current neighbors. `ceiling` carries the expulsion
    /// threshold of the member whose hypothetical eviction produced this
    /// segment state, so the window stays consistent with that eviction.
    ///
    /// Returns None when the bounds touch or cross: no price keeps this
    /// neighbor pair valid.
    pub fn try_build(
        segment: &CompetitiveSegment,
        quality: Quality,
        floor_price: Price,
        ceiling: Option<Price>,
    ) -> Option<Self> {
        let lo = segment.lower_neighbor(quality).copied();
        let hi = segment.higher_neighbor(quality).copied();

        let mut min_price = floor_price;
        for neighbor in [lo.as_ref(), hi.as_ref()].into_iter().flatten() {
            if let Some(ExpulsionPrice::Finite(p)) = segment.price_to_expel(quality, neighbor.id) {
                min_price = min_price.max(p);
            }
        }

        let mut max_price = segment.max_price_to_enter(quality, lo.as_ref(), hi.as_ref());
        if let Some(ceiling) = ceiling {
            max_price = max_price.min(ceiling);
        }

        (min_price < max_price).then_some(Self {
            lo,
            hi,
            min_price,
            max_price,
        })
    }

    /// Bounding offers in the form the demand model takes them.
    pub fn neighbor_offers(&self) -> (Option<Offer>, Option<Offer>) {
        (
            self.lo.as_ref().map(FirmSnapshot::perceived_offer),
            self.hi.as_ref().map(FirmSnapshot::perceived_offer),
        )
    }
}
