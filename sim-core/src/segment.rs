//! The competitive segment: firms that actually capture demand.
//!
//! Offers are kept sorted by perceived quality. A firm belongs to the
//! segment only while the welfare limit separating it from its lower
//! neighbor stays strictly below the one separating it from its higher
//! neighbor; otherwise its demand interval is empty and it is excluded.
//! Admission of a new offer can expel incumbents, so membership is
//! re-established incrementally rather than recomputed from scratch.

use std::cmp::Ordering;
use std::mem;

use crate::demand::DemandModel;
use crate::types::{FirmId, Offer, OfferGrid, Price, Quality};

/// One firm's offer as competitors see it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirmSnapshot {
    pub id: FirmId,
    pub price: Price,
    pub real_quality: Quality,
    pub perceived_quality: Quality,
}

impl FirmSnapshot {
    /// The offer consumers are assumed to weigh: posted price at the
    /// market-perceived quality.
    pub fn perceived_offer(&self) -> Offer {
        Offer::new(self.price, self.perceived_quality)
    }
}

/// Price threshold below which an entrant at some quality expels a member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpulsionPrice {
    /// Pricing at or below this expels the member.
    Finite(Price),
    /// No entrant price dislodges the member.
    NeverExpelled,
}

impl ExpulsionPrice {
    pub fn finite(self) -> Option<Price> {
        match self {
            ExpulsionPrice::Finite(p) => Some(p),
            ExpulsionPrice::NeverExpelled => None,
        }
    }
}

// Total order for the member array: perceived quality, then real quality,
// price and id so equal-quality snapshots sort deterministically.
fn snapshot_order(a: &FirmSnapshot, b: &FirmSnapshot) -> Ordering {
    a.perceived_quality
        .total_cmp(&b.perceived_quality)
        .then(a.real_quality.total_cmp(&b.real_quality))
        .then(a.price.total_cmp(&b.price))
        .then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone)]
pub struct CompetitiveSegment {
    demand: DemandModel,
    grid: OfferGrid,
    /// Members sorted ascending by perceived quality (unique within the
    /// segment: a same-quality entrant either fails entry or expels).
    members: Vec<FirmSnapshot>,
    /// Firms currently priced out; rescanned when a member leaves.
    excluded: Vec<FirmSnapshot>,
}

impl CompetitiveSegment {
    pub fn new(demand: DemandModel, grid: OfferGrid) -> Self {
        Self {
            demand,
            grid,
            members: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Build a segment by admitting snapshots one at a time, in iteration
    /// order. Later arrivals can expel earlier ones.
    pub fn build(
        demand: DemandModel,
        grid: OfferGrid,
        snapshots: impl IntoIterator<Item = FirmSnapshot>,
    ) -> Self {
        let mut segment = Self::new(demand, grid);
        for snap in snapshots {
            segment.try_add(snap);
        }
        segment
    }

    pub fn demand(&self) -> &DemandModel {
        &self.demand
    }

    pub fn grid(&self) -> OfferGrid {
        self.grid
    }

    pub fn members(&self) -> &[FirmSnapshot] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: FirmId) -> bool {
        self.member_index(id).is_some()
    }

    /// Highest-quality member at or below `quality`.
    pub fn lower_neighbor(&self, quality: Quality) -> Option<&FirmSnapshot> {
        self.members
            .iter()
            .rev()
            .find(|m| m.perceived_quality <= quality)
    }

    /// Lowest-quality member strictly above `quality`.
    pub fn higher_neighbor(&self, quality: Quality) -> Option<&FirmSnapshot> {
        self.members.iter().find(|m| m.perceived_quality > quality)
    }

    /// Try to admit a snapshot. Runs the entry test first; on success,
    /// expels any incumbents the new offer prices out, then inserts.
    /// Returns false (and records the snapshot as excluded) when the
    /// offer's demand interval is empty.
    pub fn try_add(&mut self, snap: FirmSnapshot) -> bool {
        debug_assert!(
            self.member_index(snap.id).is_none(),
            "firm {:?} already in segment",
            snap.id
        );

        if !self.passes_entry_test(snap.perceived_offer()) {
            self.excluded.push(snap);
            return false;
        }

        let mut at = match self.members.binary_search_by(|m| snapshot_order(m, &snap)) {
            Ok(i) | Err(i) => i,
        };

        // Expel outward from the insertion point, stopping at the first
        // survivor on each side. Expulsion prices use each member's own
        // neighbors, which the removals so far cannot have changed.
        while at > 0 {
            match self.price_to_expel_at(snap.perceived_quality, at - 1) {
                ExpulsionPrice::Finite(p) if snap.price <= p => {
                    let out = self.members.remove(at - 1);
                    self.excluded.push(out);
                    at -= 1;
                }
                _ => break,
            }
        }
        while at < self.members.len() {
            match self.price_to_expel_at(snap.perceived_quality, at) {
                ExpulsionPrice::Finite(p) if snap.price <= p => {
                    let out = self.members.remove(at);
                    self.excluded.push(out);
                }
                _ => break,
            }
        }

        self.members.insert(at, snap);
        true
    }

    /// Remove a firm that left the market. If it was a member, firms it
    /// was pricing out may qualify again: the exclusion pool is rescanned
    /// once, re-admitting (without expulsions) any that now pass entry.
    pub fn remove(&mut self, id: FirmId) -> bool {
        self.excluded.retain(|s| s.id != id);

        let Some(idx) = self.member_index(id) else {
            return false;
        };
        self.members.remove(idx);

        let pool = mem::take(&mut self.excluded);
        for snap in pool {
            if self.passes_entry_test(snap.perceived_offer()) {
                let at = match self.members.binary_search_by(|m| snapshot_order(m, &snap)) {
                    Ok(i) | Err(i) => i,
                };
                self.members.insert(at, snap);
            } else {
                self.excluded.push(snap);
            }
        }
        true
    }

    /// Remove a member without rescanning the exclusion pool. Used by the
    /// price search on working copies, where hypothetically expelled firms
    /// must stay out.
    pub fn evict(&mut self, id: FirmId) -> bool {
        let Some(idx) = self.member_index(id) else {
            return false;
        };
        let out = self.members.remove(idx);
        self.excluded.push(out);
        true
    }

    /// Price at or below which an offer at `quality` expels the member.
    /// Returns None if the id is not a member.
    pub fn price_to_expel(&self, quality: Quality, member: FirmId) -> Option<ExpulsionPrice> {
        self.member_index(member)
            .map(|idx| self.price_to_expel_at(quality, idx))
    }

    /// Highest price at which an offer at `quality` still captures demand
    /// between `lo` and `hi`, floor-rounded so pricing at it still enters.
    /// With no higher neighbor the bound comes from the richest consumer.
    pub fn max_price_to_enter(
        &self,
        quality: Quality,
        lo: Option<&FirmSnapshot>,
        hi: Option<&FirmSnapshot>,
    ) -> Price {
        let Some(hi) = hi else {
            return self
                .grid
                .floor_price(self.demand.max_price_richest_consumer(quality));
        };

        let qu = |q: Quality| self.demand.quality_utility(q);
        let (lo_price, lo_qu) = match lo {
            Some(lo) => (lo.price, qu(lo.perceived_quality)),
            None => (0.0, 0.0),
        };
        let hi_qu = qu(hi.perceived_quality);

        if hi_qu <= lo_qu {
            return 0.0;
        }

        // Price putting the offer on the lo-hi indifference line.
        let num = hi.price * (qu(quality) - lo_qu) + lo_price * (hi_qu - qu(quality));
        self.grid.floor_price(num / (hi_qu - lo_qu))
    }

    fn member_index(&self, id: FirmId) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    fn passes_entry_test(&self, offer: Offer) -> bool {
        let lo = self
            .lower_neighbor(offer.quality)
            .map(FirmSnapshot::perceived_offer);
        let hi = self
            .higher_neighbor(offer.quality)
            .map(FirmSnapshot::perceived_offer);

        let lo_limit = self.demand.limit(lo, Some(offer));
        let hi_limit = self.demand.limit(Some(offer), hi);
        lo_limit < hi_limit
    }

    fn price_to_expel_at(&self, quality: Quality, idx: usize) -> ExpulsionPrice {
        let member = self.members[idx];
        let member_offer = member.perceived_offer();
        let qu_entrant = self.demand.quality_utility(quality);
        let qu_member = self.demand.quality_utility(member.perceived_quality);

        if member.perceived_quality == quality {
            // Matching the member's price head-on already expels it.
            return ExpulsionPrice::Finite(self.grid.floor_price(member.price));
        }

        if quality > member.perceived_quality {
            // Entering above: undercut the member's hold on its own
            // lower limit.
            let lo = idx
                .checked_sub(1)
                .map(|i| self.members[i].perceived_offer());
            let lo_limit = self.demand.limit(lo, Some(member_offer));
            if lo_limit == f64::INFINITY {
                return ExpulsionPrice::NeverExpelled;
            }
            let p = member.price + lo_limit * (qu_entrant - qu_member);
            ExpulsionPrice::Finite(self.grid.floor_price(p))
        } else {
            // Entering below: squeeze the member against its higher
            // neighbor. Without one the member cannot be expelled from
            // below, which the zero threshold encodes.
            let hi = self.members.get(idx + 1).map(FirmSnapshot::perceived_offer);
            let hi_limit = self.demand.limit(Some(member_offer), hi);
            if hi_limit == f64::INFINITY {
                return ExpulsionPrice::Finite(0.0);
            }
            let p = member.price - hi_limit * (qu_member - qu_entrant);
            ExpulsionPrice::Finite(self.grid.floor_price(p))
        }
    }
}
