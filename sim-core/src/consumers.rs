//! Consumers: Pareto-tailed welfare draws, Beta-distributed quality
//! discounts, and utility-maximizing choice over known firms.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Beta, Distribution};
use slotmap::{SecondaryMap, SlotMap};

use crate::config::AwarenessParams;
use crate::demand::DemandModel;
use crate::types::{ConsumerId, FirmId, Offer};

// ============================================================================
// Consumer
// ============================================================================

#[derive(Debug, Clone)]
pub struct Consumer {
    /// Raw welfare parameter (marginal utility of quality), Pareto-tailed.
    pub welfare_param: f64,
    /// Discount applied to quality the consumer has not verified, in (0, 1).
    pub quality_discount: f64,
    /// Quality factor per known firm: `quality_discount` until tried, 1 after.
    pub known: BTreeMap<FirmId, f64>,
    /// Firm bought from this period, if any.
    pub chosen: Option<FirmId>,
}

impl Consumer {
    /// Pick the known firm with the highest positive utility. The running
    /// maximum starts at zero, so nothing is bought unless some offer beats
    /// not buying, and ties go to the earliest id.
    pub fn choose(
        &self,
        offers: &SecondaryMap<FirmId, Offer>,
        demand: &DemandModel,
    ) -> Option<FirmId> {
        let mut best = None;
        let mut max_utility = 0.0;
        for (&firm, &factor) in &self.known {
            let Some(&offer) = offers.get(firm) else {
                continue;
            };
            let utility = demand.consumer_utility(self.welfare_param, offer, factor);
            if utility > max_utility {
                best = Some(firm);
                max_utility = utility;
            }
        }
        best
    }

    /// Record a purchase. Returns true the first time this firm is tried,
    /// after which its quality factor is locked at 1.
    pub fn record_purchase(&mut self, firm: FirmId) -> bool {
        self.chosen = Some(firm);
        // choice only ever lands on a known firm
        let factor = self.known.get_mut(&firm).unwrap();
        let first_time = *factor < 1.0;
        *factor = 1.0;
        first_time
    }
}

// ============================================================================
// Consumers - the population
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Consumers {
    pool: SlotMap<ConsumerId, Consumer>,
}

impl Consumers {
    /// Sample a population of `count` consumers. Welfare parameters come from
    /// the market's Pareto tail, quality discounts from the configured Beta;
    /// a discount draw of exactly 1.0 is nudged down, 1.0 means "tried".
    pub fn spawn<R: Rng + ?Sized>(
        demand: &DemandModel,
        awareness: &AwarenessParams,
        count: u32,
        rng: &mut R,
    ) -> Self {
        let (alpha, beta) = awareness.discount_beta_params();
        let discount = Beta::new(alpha, beta).unwrap();
        let mut pool = SlotMap::with_key();
        for _ in 0..count {
            let welfare_param = demand.sample_welfare_param(rng);
            let mut quality_discount: f64 = discount.sample(rng);
            if quality_discount >= 1.0 {
                quality_discount = quality_discount.next_down();
            }
            pool.insert(Consumer {
                welfare_param,
                quality_discount,
                known: BTreeMap::new(),
                chosen: None,
            });
        }
        Self { pool }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn get(&self, id: ConsumerId) -> Option<&Consumer> {
        self.pool.get(id)
    }

    pub fn get_mut(&mut self, id: ConsumerId) -> Option<&mut Consumer> {
        self.pool.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConsumerId, &Consumer)> {
        self.pool.iter()
    }

    /// Ids collected so callers can mutate the pool while walking them.
    pub fn ids(&self) -> Vec<ConsumerId> {
        self.pool.keys().collect()
    }

    /// Remove every trace of a dead firm from the population.
    pub fn purge_firm(&mut self, firm: FirmId) {
        for consumer in self.pool.values_mut() {
            consumer.known.remove(&firm);
            if consumer.chosen == Some(firm) {
                consumer.chosen = None;
            }
        }
    }
}
