//! Expected demand over a Pareto-tailed welfare distribution.
//!
//! Consumers value an offer at `w * quality^gamma - price`, where `w` is a
//! welfare parameter drawn once per consumer from a Pareto tail. Firms never
//! enumerate consumers: they price against the expected number of welfare
//! parameters falling between the indifference limits that separate an offer
//! from its quality neighbors. Everything here is closed-form and free of
//! grid rounding; callers snap prices to the offer grid afterwards.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::config::MarketParams;
use crate::types::{Offer, Price, Quality, Quantity};

/// Market-wide demand parameters, frozen for one period.
///
/// A recession discounts every welfare parameter by `1 - magnitude`, so a
/// per-period copy is taken with [`DemandModel::with_recession`] rather than
/// mutating shared state.
#[derive(Debug, Clone, Copy)]
pub struct DemandModel {
    pub market_size: f64,
    /// Pareto shape, strictly above 1.
    pub lambda: f64,
    /// Pareto location: the poorest consumer's raw welfare parameter.
    pub min_welfare_param: f64,
    /// Exponent applied to quality inside consumer utility.
    pub quality_exponent: f64,
    /// Probability level defining the richest-consumer price ceiling.
    pub richest_consumer_prob: f64,
    /// Active demand-shock magnitude, 0 outside recessions.
    pub recession_magnitude: f64,
}

impl DemandModel {
    pub fn new(market: &MarketParams) -> Self {
        Self {
            market_size: market.market_size as f64,
            lambda: market.lambda(),
            min_welfare_param: market.min_welfare_param,
            quality_exponent: market.quality_exponent,
            richest_consumer_prob: market.richest_consumer_prob,
            recession_magnitude: 0.0,
        }
    }

    /// Copy of the model with a demand shock applied.
    pub fn with_recession(mut self, magnitude: f64) -> Self {
        self.recession_magnitude = magnitude;
        self
    }

    /// A raw welfare parameter as firms and consumers perceive it while a
    /// recession is active.
    pub fn perceived(&self, raw: f64) -> f64 {
        raw * (1.0 - self.recession_magnitude)
    }

    pub fn min_welfare_param_perceived(&self) -> f64 {
        self.perceived(self.min_welfare_param)
    }

    /// Quality as it enters utility: `quality^gamma`.
    pub fn quality_utility(&self, quality: Quality) -> f64 {
        quality.powf(self.quality_exponent)
    }

    /// Utility a consumer assigns to an offer. `quality_factor` discounts
    /// quality for products the consumer has not tried yet (1.0 once tried).
    pub fn consumer_utility(&self, raw_welfare: f64, offer: Offer, quality_factor: f64) -> f64 {
        self.perceived(raw_welfare) * self.quality_utility(offer.quality * quality_factor)
            - offer.price
    }

    /// Welfare parameter separating the buyers of two quality-adjacent
    /// offers: consumers below the limit prefer `lo`, consumers above it
    /// prefer `hi`.
    ///
    /// - no `hi`: nothing pulls consumers upward, the limit is infinite
    /// - no `lo`: `hi` competes only with not buying, limit is `price/quality^gamma`
    /// - `hi` at most as expensive as `lo`: `hi` dominates, limit collapses
    ///   to the poorest consumer
    /// - equal qualities with `hi` dearer: `lo` dominates, limit is infinite
    /// - otherwise: `(hiP - loP) / (hiQ^gamma - loQ^gamma)`
    ///
    /// Finite limits are floored at the raw minimum welfare parameter and
    /// then uniformly discounted by the active recession.
    ///
    /// Panics if both offers are absent.
    pub fn limit(&self, lo: Option<Offer>, hi: Option<Offer>) -> f64 {
        let hi = match (lo, hi) {
            (None, None) => panic!("welfare limit requires at least one offer"),
            (Some(_), None) => return f64::INFINITY,
            (None, Some(hi)) => {
                let raw = hi.price / self.quality_utility(hi.quality);
                return self.perceived(raw.max(self.min_welfare_param));
            }
            (Some(_), Some(hi)) => hi,
        };
        let lo = lo.unwrap();
        debug_assert!(
            lo.quality <= hi.quality,
            "offers out of order: lo quality {} above hi quality {}",
            lo.quality,
            hi.quality
        );

        if lo.price >= hi.price {
            // hi is at least as good and no dearer, nobody stays below
            self.perceived(self.min_welfare_param)
        } else {
            let delta_qu = self.quality_utility(hi.quality) - self.quality_utility(lo.quality);
            if delta_qu <= 0.0 {
                // same quality at a higher price, nobody moves up
                f64::INFINITY
            } else {
                let raw = (hi.price - lo.price) / delta_qu;
                self.perceived(raw.max(self.min_welfare_param))
            }
        }
    }

    /// Expected number of consumers whose welfare parameter exceeds `limit`.
    ///
    /// Pareto tail: `N * (min / limit)^lambda` once the limit clears the raw
    /// minimum; the whole market below it.
    pub fn expected_above(&self, limit: f64) -> Quantity {
        if limit <= self.min_welfare_param {
            self.market_size
        } else if limit == f64::INFINITY {
            0.0
        } else {
            self.market_size * (self.min_welfare_param / limit).powf(self.lambda)
        }
    }

    /// Expected demand for `offer` when squeezed between its quality
    /// neighbors `lo` and `hi` (either may be absent).
    pub fn expected_quantity(&self, offer: Offer, lo: Option<Offer>, hi: Option<Offer>) -> Quantity {
        let above_lo = self.expected_above(self.limit(lo, Some(offer)));
        let above_hi = self.expected_above(self.limit(Some(offer), hi));
        (above_lo - above_hi).max(0.0)
    }

    /// Highest price at which, with probability `richest_consumer_prob`, at
    /// least one of the N welfare draws still affords the given quality.
    ///
    /// Inverting `P(max of N draws > w) = prob` gives
    /// `w = min / (1 - (1 - prob)^(1/N))^(1/lambda)`; the price ceiling is
    /// `w * quality^gamma` after the recession discount.
    pub fn max_price_richest_consumer(&self, quality: Quality) -> Price {
        let tail = 1.0 - (1.0 - self.richest_consumer_prob).powf(1.0 / self.market_size);
        let raw = self.min_welfare_param / tail.powf(1.0 / self.lambda);
        self.perceived(raw) * self.quality_utility(quality)
    }

    /// Draw a raw welfare parameter. If `X ~ Exp(lambda)` then
    /// `min * e^X` is Pareto with shape `lambda` and location `min`.
    pub fn sample_welfare_param<R: Rng>(&self, rng: &mut R) -> f64 {
        let exp = Exp::new(self.lambda).unwrap();
        self.min_welfare_param * exp.sample(rng).exp()
    }
}
