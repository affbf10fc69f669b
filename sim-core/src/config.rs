use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::OfferGrid;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
    #[error("recession shocks overlap or are out of order")]
    RecessionOverlap,
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// ============================================================================
// Market - consumer population and taste distribution
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketParams {
    /// Number of consumers in the market.
    pub market_size: u32,
    /// Gini index of the welfare-parameter distribution, in (0, 1).
    pub gini: f64,
    /// Welfare parameter of the poorest consumer (Pareto location).
    pub min_welfare_param: f64,
    /// Exponent applied to quality inside consumer utility.
    pub quality_exponent: f64,
    /// Probability used to place the richest-consumer price ceiling.
    pub richest_consumer_prob: f64,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            market_size: 1000,
            gini: 0.5,
            min_welfare_param: 1.0,
            quality_exponent: 1.0,
            richest_consumer_prob: 0.5,
        }
    }
}

impl MarketParams {
    /// Pareto shape implied by the Gini index: lambda = (1 + G) / (2 G).
    ///
    /// Gini 0.5 gives lambda 1.5; lambda must stay above 1 or expected
    /// quantities diverge.
    pub fn lambda(&self) -> f64 {
        (1.0 + self.gini) / (2.0 * self.gini)
    }
}

// ============================================================================
// Costs - unit cost curve and fixed-cost draw
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParams {
    /// Quality at which one unit costs exactly 1.
    pub cost_scale: f64,
    /// Convexity of the unit-cost curve in quality.
    pub cost_exponent: f64,
    /// Mean of the per-period fixed cost (Gamma distributed per firm).
    pub fixed_cost_mean: f64,
    /// Std dev of the fixed cost as a fraction of the mean.
    pub fixed_cost_std_dev_pct: f64,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            cost_scale: 5.0,
            cost_exponent: 2.0,
            fixed_cost_mean: 20.0,
            fixed_cost_std_dev_pct: 0.1,
        }
    }
}

impl CostParams {
    /// Cost of producing one unit at the given quality.
    pub fn unit_cost(&self, quality: f64) -> f64 {
        (quality / self.cost_scale).powf(self.cost_exponent)
    }
}

// ============================================================================
// Awareness - product diffusion and untried-quality discounting
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AwarenessParams {
    /// Fraction of consumers who know an entrant at birth.
    pub initially_known_by_pct: f64,
    /// Word-of-mouth diffusion speed (logistic growth coefficient).
    pub diffusion_speed: f64,
    /// Mean of the Beta-distributed quality discount for untried products.
    pub quality_discount_mean: f64,
    /// Mode of the Beta-distributed quality discount.
    pub quality_discount_mode: f64,
}

impl Default for AwarenessParams {
    fn default() -> Self {
        Self {
            initially_known_by_pct: 0.05,
            diffusion_speed: 0.3,
            quality_discount_mean: 0.6,
            quality_discount_mode: 0.65,
        }
    }
}

impl AwarenessParams {
    /// Beta shape parameters matching the configured mean and mode.
    pub fn discount_beta_params(&self) -> (f64, f64) {
        let mean = self.quality_discount_mean;
        let mode = self.quality_discount_mode;
        let alpha = mean * (1.0 - 2.0 * mode) / (mean - mode);
        let beta = alpha * (1.0 - mean) / mean;
        (alpha, beta)
    }
}

// ============================================================================
// Firms - entry, exit, and quality-move policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStrategy {
    /// May keep, raise, or lower quality each period.
    Standard,
    /// Never moves off its initial quality.
    NoChange,
    /// May keep or raise quality, never lower.
    NoReduction,
    /// May keep or lower quality, never raise.
    NoIncrease,
    /// Must attempt a quality increase every period.
    AlwaysIncrease,
}

impl Default for QualityStrategy {
    fn default() -> Self {
        Self::Standard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmParams {
    /// New firms attempting entry each period.
    pub entrants_per_period: u32,
    /// If true, entrants only appear in period 0.
    pub entry_only_at_start: bool,
    /// Upper bound for an entrant's initial quality draw.
    pub max_initial_quality: f64,
    /// Hard cap on quality moves.
    pub max_quality: f64,
    /// Autoregressive profit below this level triggers exit.
    pub minimum_profit: f64,
    /// Weight of the current period in the autoregressive profit.
    pub profit_weight: f64,
    /// Periods of immunity before the exit rule applies.
    pub grace_periods: u32,
    /// Strategies assigned round-robin to entrants.
    pub strategies: Vec<QualityStrategy>,
}

impl Default for FirmParams {
    fn default() -> Self {
        Self {
            entrants_per_period: 1,
            entry_only_at_start: false,
            max_initial_quality: 10.0,
            max_quality: 50.0,
            minimum_profit: 0.0,
            profit_weight: 0.5,
            grace_periods: 5,
            strategies: vec![QualityStrategy::Standard],
        }
    }
}

// ============================================================================
// Solver - bounded maximizer controls
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Absolute convergence tolerance on the price interval.
    pub tolerance: f64,
    /// Iteration cap; hitting it falls back to the interval midpoint.
    pub max_iterations: u32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 100,
        }
    }
}

// ============================================================================
// Recessions - scheduled demand shocks
// ============================================================================

/// A demand shock active over the half-open period range [start, end).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecessionShock {
    pub start: u64,
    pub end: u64,
    /// Fraction by which every welfare parameter is discounted, in [0, 1).
    pub magnitude: f64,
}

// ============================================================================
// SimConfig - the complete simulation configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub market: MarketParams,
    pub grid: OfferGrid,
    pub cost: CostParams,
    pub awareness: AwarenessParams,
    pub firms: FirmParams,
    pub solver: SolverParams,
    pub recessions: Vec<RecessionShock>,
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.market.market_size == 0 {
            return Err(invalid("market.market_size", "must be positive"));
        }
        if !(self.market.gini > 0.0 && self.market.gini < 1.0) {
            return Err(invalid(
                "market.gini",
                format!("must lie in (0, 1), got {}", self.market.gini),
            ));
        }
        if self.market.min_welfare_param <= 0.0 {
            return Err(invalid("market.min_welfare_param", "must be positive"));
        }
        if self.market.quality_exponent <= 0.0 {
            return Err(invalid("market.quality_exponent", "must be positive"));
        }
        if !(self.market.richest_consumer_prob > 0.0 && self.market.richest_consumer_prob < 1.0) {
            return Err(invalid(
                "market.richest_consumer_prob",
                "must lie in (0, 1)",
            ));
        }
        if self.cost.cost_scale <= 0.0 {
            return Err(invalid("cost.cost_scale", "must be positive"));
        }
        if self.cost.cost_exponent <= 1.0 {
            return Err(invalid(
                "cost.cost_exponent",
                "must exceed 1 so marginal cost rises with quality",
            ));
        }
        if self.cost.fixed_cost_mean < 0.0 {
            return Err(invalid("cost.fixed_cost_mean", "must be non-negative"));
        }
        if self.cost.fixed_cost_std_dev_pct <= 0.0 {
            return Err(invalid("cost.fixed_cost_std_dev_pct", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.awareness.initially_known_by_pct) {
            return Err(invalid(
                "awareness.initially_known_by_pct",
                "must lie in [0, 1]",
            ));
        }
        let (mean, mode) = (
            self.awareness.quality_discount_mean,
            self.awareness.quality_discount_mode,
        );
        if !(mean > 0.0 && mean < 1.0) {
            return Err(invalid("awareness.quality_discount_mean", "must lie in (0, 1)"));
        }
        if !(mode > 0.0 && mode < 1.0) {
            return Err(invalid("awareness.quality_discount_mode", "must lie in (0, 1)"));
        }
        let (alpha, beta) = self.awareness.discount_beta_params();
        if alpha <= 0.0 || beta <= 0.0 {
            return Err(invalid(
                "awareness.quality_discount_mode",
                format!(
                    "mean {} and mode {} imply a degenerate Beta ({}, {})",
                    mean, mode, alpha, beta
                ),
            ));
        }
        if self.firms.max_initial_quality <= 0.0 {
            return Err(invalid("firms.max_initial_quality", "must be positive"));
        }
        if self.firms.max_quality < self.firms.max_initial_quality {
            return Err(invalid(
                "firms.max_quality",
                "must be at least max_initial_quality",
            ));
        }
        if !(0.0..=1.0).contains(&self.firms.profit_weight) {
            return Err(invalid("firms.profit_weight", "must lie in [0, 1]"));
        }
        if self.firms.strategies.is_empty() {
            return Err(invalid("firms.strategies", "must name at least one strategy"));
        }
        if self.solver.tolerance <= 0.0 {
            return Err(invalid("solver.tolerance", "must be positive"));
        }
        if self.solver.max_iterations == 0 {
            return Err(invalid("solver.max_iterations", "must be positive"));
        }

        let mut prev_end = 0u64;
        for (i, shock) in self.recessions.iter().enumerate() {
            if shock.end <= shock.start {
                return Err(ConfigError::Invalid {
                    field: "recessions",
                    reason: format!("shock {} has empty range [{}, {})", i, shock.start, shock.end),
                });
            }
            if !(0.0..1.0).contains(&shock.magnitude) {
                return Err(ConfigError::Invalid {
                    field: "recessions",
                    reason: format!("shock {} magnitude {} outside [0, 1)", i, shock.magnitude),
                });
            }
            if i > 0 && shock.start < prev_end {
                return Err(ConfigError::RecessionOverlap);
            }
            prev_end = shock.end;
        }

        Ok(())
    }
}
