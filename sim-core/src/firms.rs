//! Firms: posted offers, cost draws, profit track records, and the
//! one-firm-per-quality-level book the market is organized around.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use slotmap::SlotMap;

use crate::config::{AwarenessParams, CostParams, FirmParams, QualityStrategy};
use crate::segment::FirmSnapshot;
use crate::types::{ConsumerId, FirmId, Money, Offer, OfferGrid, Quality};

// ============================================================================
// Firm - a single producer
// ============================================================================

#[derive(Debug, Clone)]
pub struct Firm {
    /// Posted (price, real quality), both on the market grid.
    pub offer: Offer,
    /// How the firm generates next-period quality candidates.
    pub strategy: QualityStrategy,
    /// Per-period overhead, drawn once at entry.
    pub fixed_cost: Money,
    /// Period the firm entered the market.
    pub born: u64,
    /// Consumers who have purchased from this firm at least once.
    pub tried_by: u32,
    /// Consumers the firm's existence has not yet diffused to.
    pub not_yet_known_by: Vec<ConsumerId>,
    /// Units sold this period.
    pub demand: u32,
    /// Net profit realized this period.
    pub profit: Money,
    /// Lifetime sum of realized profits.
    pub accumulated_profit: Money,
    /// Exponentially weighted profit history; drives the exit rule.
    pub autoregressive_profit: Money,
}

impl Firm {
    pub fn new(
        offer: Offer,
        strategy: QualityStrategy,
        fixed_cost: Money,
        born: u64,
        not_yet_known_by: Vec<ConsumerId>,
    ) -> Self {
        Self {
            offer,
            strategy,
            fixed_cost,
            born,
            tried_by: 0,
            not_yet_known_by,
            demand: 0,
            profit: 0.0,
            accumulated_profit: 0.0,
            autoregressive_profit: 0.0,
        }
    }

    pub fn age(&self, period: u64) -> u64 {
        period - self.born
    }

    /// Number of consumers aware of this firm.
    pub fn known_by(&self, market_size: u32) -> u32 {
        market_size - self.not_yet_known_by.len() as u32
    }

    pub fn known_by_share(&self, market_size: u32) -> f64 {
        self.known_by(market_size) as f64 / market_size as f64
    }

    pub fn tried_by_share(&self, market_size: u32) -> f64 {
        self.tried_by as f64 / market_size as f64
    }

    /// How the market would see `quality` from this firm: consumers who have
    /// tried it perceive the real value, everyone else discounts it by the
    /// population-mean factor. Rounded onto the quality grid.
    pub fn perceived_quality_of(
        &self,
        quality: Quality,
        market_size: u32,
        awareness: &AwarenessParams,
        grid: OfferGrid,
    ) -> Quality {
        let n = market_size as f64;
        let tried = self.tried_by as f64;
        let expected_factor = (tried + awareness.quality_discount_mean * (n - tried)) / n;
        grid.round_quality(quality * expected_factor)
    }

    /// Perceived quality of the posted offer.
    pub fn perceived_quality(
        &self,
        market_size: u32,
        awareness: &AwarenessParams,
        grid: OfferGrid,
    ) -> Quality {
        self.perceived_quality_of(self.offer.quality, market_size, awareness, grid)
    }

    pub fn snapshot(
        &self,
        id: FirmId,
        market_size: u32,
        awareness: &AwarenessParams,
        grid: OfferGrid,
    ) -> FirmSnapshot {
        FirmSnapshot {
            id,
            price: self.offer.price,
            real_quality: self.offer.quality,
            perceived_quality: self.perceived_quality(market_size, awareness, grid),
        }
    }

    /// Settle the books for `period`: realize profit at the posted offer and
    /// fold it into the autoregressive track record. In the entry period the
    /// track record is seeded with the realized profit itself.
    pub fn settle_period(&mut self, cost: &CostParams, profit_weight: f64, period: u64) {
        let margin = self.offer.price - cost.unit_cost(self.offer.quality);
        self.profit = margin * self.demand as f64 - self.fixed_cost;
        self.accumulated_profit += self.profit;
        self.autoregressive_profit = if self.born == period {
            self.profit
        } else {
            profit_weight * self.profit
                + (1.0 - profit_weight) * self.autoregressive_profit
        };
    }

    /// Exit test: past the grace age and the profit track record has sunk
    /// below the survival threshold.
    pub fn is_failing(&self, period: u64, params: &FirmParams) -> bool {
        self.age(period) >= params.grace_periods as u64
            && self.autoregressive_profit < params.minimum_profit
    }
}

// ============================================================================
// FirmBook - live firm registry
// ============================================================================

/// Live firms keyed by generational id, with a secondary index from quality
/// tick to occupant. The index enforces one firm per quality level and gives
/// ascending-quality iteration for segment builds.
#[derive(Debug, Clone)]
pub struct FirmBook {
    grid: OfferGrid,
    firms: SlotMap<FirmId, Firm>,
    by_quality: BTreeMap<i64, FirmId>,
    strategy_cursor: usize,
}

impl FirmBook {
    pub fn new(grid: OfferGrid) -> Self {
        Self {
            grid,
            firms: SlotMap::with_key(),
            by_quality: BTreeMap::new(),
            strategy_cursor: 0,
        }
    }

    pub fn grid(&self) -> OfferGrid {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.firms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.firms.is_empty()
    }

    pub fn get(&self, id: FirmId) -> Option<&Firm> {
        self.firms.get(id)
    }

    pub fn get_mut(&mut self, id: FirmId) -> Option<&mut Firm> {
        self.firms.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FirmId, &Firm)> {
        self.firms.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FirmId, &mut Firm)> {
        self.firms.iter_mut()
    }

    /// Ids in ascending real-quality order. Collected so callers can mutate
    /// the book while walking them.
    pub fn ids_by_quality(&self) -> Vec<FirmId> {
        self.by_quality.values().copied().collect()
    }

    /// Firm currently holding a quality level, if any.
    pub fn occupant(&self, quality: Quality) -> Option<FirmId> {
        self.by_quality.get(&self.grid.quality_tick(quality)).copied()
    }

    /// Cycle through the configured strategy mix, one entrant at a time.
    pub fn next_strategy(&mut self, params: &FirmParams) -> QualityStrategy {
        let strategy = params.strategies[self.strategy_cursor % params.strategies.len()];
        self.strategy_cursor += 1;
        strategy
    }

    /// Register a firm at its offer's quality tick. The tick must be free.
    pub fn insert(&mut self, firm: Firm) -> FirmId {
        let tick = self.grid.quality_tick(firm.offer.quality);
        let id = self.firms.insert(firm);
        let prev = self.by_quality.insert(tick, id);
        debug_assert!(prev.is_none(), "quality tick {tick} double-occupied");
        id
    }

    pub fn remove(&mut self, id: FirmId) -> Option<Firm> {
        let firm = self.firms.remove(id)?;
        self.by_quality
            .remove(&self.grid.quality_tick(firm.offer.quality));
        Some(firm)
    }

    /// Re-post a firm's offer, re-registering its quality tick. The caller
    /// must have checked that the destination tick is free or the firm's own.
    pub fn set_offer(&mut self, id: FirmId, offer: Offer) {
        let old_tick = self.grid.quality_tick(self.firms[id].offer.quality);
        let new_tick = self.grid.quality_tick(offer.quality);
        if new_tick != old_tick {
            debug_assert!(
                !self.by_quality.contains_key(&new_tick),
                "quality tick {new_tick} double-occupied"
            );
            self.by_quality.remove(&old_tick);
            self.by_quality.insert(new_tick, id);
        }
        self.firms[id].offer = offer;
    }

    /// Nearest unoccupied quality level to `from`: scan upward to the quality
    /// cap first, then downward toward the lowest level.
    pub fn closest_available_quality(
        &self,
        from: Quality,
        max_quality: Quality,
    ) -> Option<Quality> {
        let max_tick = self.grid.quality_tick(max_quality);
        let start = self.grid.quality_tick(from).max(1);
        let upward = (start..=max_tick).find(|t| !self.by_quality.contains_key(t));
        let tick = upward.or_else(|| (1..start).rev().find(|t| !self.by_quality.contains_key(t)))?;
        Some(self.grid.quality_at_tick(tick))
    }

    /// Candidate real qualities for a firm's next offer, per its strategy.
    /// The firm's own tick stays occupied during the search, so step options
    /// always land on a different level; a down step blocked on both sides
    /// resolves upward and can collide with the up step, hence the dedup.
    pub fn quality_options(&self, id: FirmId, params: &FirmParams) -> Vec<Quality> {
        let firm = &self.firms[id];
        let curr = firm.offer.quality;
        let step = self.grid.quality_step();
        let down_allowed = self.grid.quality_tick(curr) > 1;
        let mut options = Vec::with_capacity(3);
        match firm.strategy {
            QualityStrategy::Standard => {
                options.push(curr);
                if down_allowed {
                    options.extend(self.closest_available_quality(curr - step, params.max_quality));
                }
                options.extend(self.closest_available_quality(curr + step, params.max_quality));
            }
            QualityStrategy::NoChange => options.push(curr),
            QualityStrategy::NoReduction => {
                options.push(curr);
                options.extend(self.closest_available_quality(curr + step, params.max_quality));
            }
            QualityStrategy::NoIncrease => {
                options.push(curr);
                if down_allowed {
                    options.extend(self.closest_available_quality(curr - step, params.max_quality));
                }
            }
            QualityStrategy::AlwaysIncrease => {
                options.extend(self.closest_available_quality(curr + step, params.max_quality));
            }
        }
        options.dedup_by(|a, b| self.grid.quality_tick(*a) == self.grid.quality_tick(*b));
        options
    }

    /// Snapshots of every live firm (optionally minus one), ascending by real
    /// quality, ready to seed a competitive segment build.
    pub fn snapshots_excluding(
        &self,
        excluded: Option<FirmId>,
        market_size: u32,
        awareness: &AwarenessParams,
    ) -> Vec<FirmSnapshot> {
        self.by_quality
            .values()
            .filter(|&&id| Some(id) != excluded)
            .map(|&id| self.firms[id].snapshot(id, market_size, awareness, self.grid))
            .collect()
    }
}

// ============================================================================
// Fixed-cost draw
// ============================================================================

/// Draw a per-period fixed cost with the configured mean and relative
/// standard deviation. Gamma shape `1/pct²` and scale `mean·pct²` reproduce
/// those moments exactly.
pub fn sample_fixed_cost<R: Rng + ?Sized>(cost: &CostParams, rng: &mut R) -> Money {
    if cost.fixed_cost_mean == 0.0 {
        return 0.0;
    }
    let cv2 = cost.fixed_cost_std_dev_pct * cost.fixed_cost_std_dev_pct;
    let gamma = Gamma::new(1.0 / cv2, cost.fixed_cost_mean * cv2).unwrap();
    gamma.sample(rng)
}
