//! Simulation of a vertically differentiated market.
//!
//! Firms place price/quality offers on a discrete grid and compete for
//! consumers whose willingness to pay follows a Pareto welfare distribution.
//! Each period firms reprice optimally against their quality neighbors,
//! product awareness spreads by word of mouth, unprofitable firms exit, and
//! new firms attempt entry.
//!
//! ```ignore
//! let mut sim = Simulation::new(SimConfig::default(), 42)?;
//! let stats = sim.run(200);
//! ```

use rand::SeedableRng;
use rand::rngs::StdRng;

mod config;
mod consumers;
mod demand;
mod firms;
mod pricing;
mod recession;
mod segment;
mod tick;
mod types;

pub use config::*;
pub use consumers::*;
pub use demand::*;
pub use firms::*;
pub use pricing::*;
pub use recession::*;
pub use segment::*;
pub use tick::*;
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;

// ============================================================================
// Simulation - seeded facade over the period loop
// ============================================================================

pub struct Simulation {
    config: SimConfig,
    demand: DemandModel,
    recessions: RecessionSchedule,
    firms: FirmBook,
    consumers: Consumers,
    rng: StdRng,
    period: u64,
}

impl Simulation {
    pub fn new(config: SimConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let demand = DemandModel::new(&config.market);
        let recessions = RecessionSchedule::new(config.recessions.clone());
        let mut rng = StdRng::seed_from_u64(seed);
        let consumers = Consumers::spawn(
            &demand,
            &config.awareness,
            config.market.market_size,
            &mut rng,
        );
        let firms = FirmBook::new(config.grid);
        Ok(Self {
            config,
            demand,
            recessions,
            firms,
            consumers,
            rng,
            period: 0,
        })
    }

    pub fn from_json(json: &str, seed: u64) -> Result<Self, ConfigError> {
        Self::new(SimConfig::from_json(json)?, seed)
    }

    /// Advance the simulation by one period.
    pub fn step(&mut self) -> PeriodStats {
        let stats = run_period(
            self.period,
            &self.config,
            &self.demand,
            &self.recessions,
            &mut self.firms,
            &mut self.consumers,
            &mut self.rng,
        );
        self.period += 1;
        stats
    }

    /// Run `periods` consecutive periods and collect their stats.
    pub fn run(&mut self, periods: u64) -> Vec<PeriodStats> {
        (0..periods).map(|_| self.step()).collect()
    }

    /// Periods completed so far.
    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn firms(&self) -> &FirmBook {
        &self.firms
    }

    pub fn consumers(&self) -> &Consumers {
        &self.consumers
    }
}

// ============================================================================
// Tests
// ============================================================================
