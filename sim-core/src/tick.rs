//! The per-period scheduler: entry, repricing, diffusion, consumer choice,
//! settlement, and exits, in a fixed deterministic order.

use std::collections::HashSet;

use rand::Rng;
use slotmap::SecondaryMap;

use crate::config::SimConfig;
use crate::consumers::Consumers;
use crate::demand::DemandModel;
use crate::firms::{Firm, FirmBook, sample_fixed_cost};
use crate::pricing::optimal_price;
use crate::recession::RecessionSchedule;
use crate::segment::CompetitiveSegment;
use crate::types::{ConsumerId, FirmId, Offer};
#[cfg(feature = "instrument")]
use crate::types::KeyToU64;

/// Per-period aggregates returned by `run_period` (also emitted on the
/// "period" instrument target).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodStats {
    pub period: u64,
    pub live_firms: u32,
    pub served_demand: u32,
    pub mean_price: f64,
    pub entries: u32,
    pub exits: u32,
    pub recession_magnitude: f64,
}

/// Run one simulated period.
///
/// Phases:
/// 1. recession view of demand
/// 2. reset per-period counters
/// 3. firm entry
/// 4. offer decisions (evaluated against committed offers, then applied)
/// 5. awareness diffusion
/// 6. consumer choice
/// 7. settlement
/// 8. exits
pub fn run_period<R: Rng + ?Sized>(
    period: u64,
    config: &SimConfig,
    base_demand: &DemandModel,
    recessions: &RecessionSchedule,
    firms: &mut FirmBook,
    consumers: &mut Consumers,
    rng: &mut R,
) -> PeriodStats {
    let n = config.market.market_size;

    // 1. RECESSION VIEW
    let magnitude = recessions.magnitude_at(period);
    let demand = base_demand.with_recession(magnitude);

    // 2. RESET COUNTERS
    for (_, firm) in firms.iter_mut() {
        firm.demand = 0;
    }

    // 3. ENTRY
    let mut entries = 0u32;
    if period == 0 || !config.firms.entry_only_at_start {
        for _ in 0..config.firms.entrants_per_period {
            if try_spawn_entrant(period, config, &demand, firms, consumers, rng).is_some() {
                entries += 1;
            }
        }
    }

    // 4. OFFER DECISIONS
    // Every firm is priced against the other firms' committed offers; moves
    // apply afterwards so evaluation order cannot leak into the results.
    // Entrants already priced themselves this period.
    let mut decisions: Vec<(FirmId, Offer)> = Vec::new();
    for id in firms.ids_by_quality() {
        if firms.get(id).is_some_and(|f| f.born == period) {
            continue;
        }
        if let Some(offer) = best_offer(id, config, &demand, firms) {
            decisions.push((id, offer));
        }
    }
    for (id, offer) in decisions {
        if firms.occupant(offer.quality).is_some_and(|other| other != id) {
            // lost a same-period race for the level; the price was computed
            // for that quality, so keep the committed offer instead
            continue;
        }
        firms.set_offer(id, offer);
    }

    // 5. AWARENESS DIFFUSION
    // Bass-style word of mouth: each firm reaches a logistic-growth slice of
    // the consumers who do not know it yet, at least one per period.
    for id in firms.ids_by_quality() {
        let Some(firm) = firms.get_mut(id) else {
            continue;
        };
        if firm.born == period {
            continue; // seeded at entry
        }
        let remaining = firm.not_yet_known_by.len();
        if remaining == 0 {
            continue;
        }
        let known = firm.known_by(n) as f64;
        let raw = (config.awareness.diffusion_speed * known * (1.0 - known / n as f64)).round();
        let increment = (raw.max(1.0) as usize).min(remaining);
        let mut picked = rand::seq::index::sample(rng, remaining, increment).into_vec();
        picked.sort_unstable();
        // descending so swap_remove neither shifts pending indices nor pulls
        // a picked element out from under us
        let newly: Vec<ConsumerId> = picked
            .iter()
            .rev()
            .map(|&i| firm.not_yet_known_by.swap_remove(i))
            .collect();
        for consumer_id in newly {
            if let Some(consumer) = consumers.get_mut(consumer_id) {
                consumer.known.insert(id, consumer.quality_discount);
            }
        }
    }

    // 6. CONSUMER CHOICE
    let mut offers: SecondaryMap<FirmId, Offer> = SecondaryMap::new();
    for (id, firm) in firms.iter() {
        offers.insert(id, firm.offer);
    }
    let mut served = 0u32;
    for consumer_id in consumers.ids() {
        let Some(consumer) = consumers.get_mut(consumer_id) else {
            continue;
        };
        let Some(choice) = consumer.choose(&offers, &demand) else {
            consumer.chosen = None;
            continue;
        };
        let first_time = consumer.record_purchase(choice);
        served += 1;
        if let Some(firm) = firms.get_mut(choice) {
            firm.demand += 1;
            if first_time {
                firm.tried_by += 1;
            }
        }
    }

    // 7. SETTLEMENT
    let mut failing = Vec::new();
    for id in firms.ids_by_quality() {
        let Some(firm) = firms.get_mut(id) else {
            continue;
        };
        firm.settle_period(&config.cost, config.firms.profit_weight, period);
        if firm.is_failing(period, &config.firms) {
            failing.push(id);
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "firm_period",
            period = period,
            firm_id = id.to_u64(),
            price = firm.offer.price,
            quality = firm.offer.quality,
            perceived_quality = firm.perceived_quality(n, &config.awareness, config.grid),
            demand = firm.demand,
            profit = firm.profit,
            autoregressive_profit = firm.autoregressive_profit,
            age = firm.age(period),
            tried_by_share = firm.tried_by_share(n),
            known_by_share = firm.known_by_share(n),
        );
    }

    // 8. EXITS
    let exits = failing.len() as u32;
    for id in failing {
        firms.remove(id);
        consumers.purge_firm(id);
    }

    let live_firms = firms.len() as u32;
    let mean_price = if live_firms == 0 {
        0.0
    } else {
        firms.iter().map(|(_, f)| f.offer.price).sum::<f64>() / live_firms as f64
    };

    #[cfg(feature = "instrument")]
    tracing::info!(
        target: "period",
        period = period,
        live_firms = live_firms,
        served_demand = served,
        mean_price = mean_price,
        entries = entries,
        exits = exits,
        recession_magnitude = magnitude,
    );

    PeriodStats {
        period,
        live_firms,
        served_demand: served,
        mean_price,
        entries,
        exits,
        recession_magnitude: magnitude,
    }
}

/// Attempt one firm entry: draw a quality on the grid, take the closest free
/// level, and post at its optimal price. `None` when the grid is full or no
/// market segment can hold the offer profitably (the entrant is shelved).
fn try_spawn_entrant<R: Rng + ?Sized>(
    period: u64,
    config: &SimConfig,
    demand: &DemandModel,
    firms: &mut FirmBook,
    consumers: &mut Consumers,
    rng: &mut R,
) -> Option<FirmId> {
    let grid = config.grid;
    let n = config.market.market_size;

    let draw: f64 = rng.random_range(0.0..config.firms.max_initial_quality);
    let strategy = firms.next_strategy(&config.firms);
    let fixed_cost = sample_fixed_cost(&config.cost, rng);

    let snapped = grid.quality_at_tick(grid.quality_tick(draw).max(1));
    let quality = firms.closest_available_quality(snapped, config.firms.max_quality)?;

    // price against everyone already posted; nobody has tried the entrant,
    // so the whole market discounts its quality
    let members = firms.snapshots_excluding(None, n, &config.awareness);
    let segment = CompetitiveSegment::build(*demand, grid, members);
    let perceived = grid.round_quality(quality * config.awareness.quality_discount_mean);
    let unit_cost = config.cost.unit_cost(quality);
    let result = optimal_price(&segment, perceived, unit_cost, &config.solver).ok()?;

    // seed initial awareness in a uniform random slice of the population
    let all_consumers = consumers.ids();
    let seed_count = ((config.awareness.initially_known_by_pct * all_consumers.len() as f64)
        .ceil() as usize)
        .min(all_consumers.len());
    let picked = rand::seq::index::sample(rng, all_consumers.len(), seed_count).into_vec();
    let picked_set: HashSet<usize> = picked.iter().copied().collect();
    let not_yet_known_by = all_consumers
        .iter()
        .enumerate()
        .filter(|(i, _)| !picked_set.contains(i))
        .map(|(_, &id)| id)
        .collect();

    let firm = Firm::new(
        Offer::new(result.price, quality),
        strategy,
        fixed_cost,
        period,
        not_yet_known_by,
    );
    let id = firms.insert(firm);
    for i in picked {
        if let Some(consumer) = consumers.get_mut(all_consumers[i]) {
            consumer.known.insert(id, consumer.quality_discount);
        }
    }
    Some(id)
}

/// Best (price, quality) decision for a firm: evaluate each strategy-allowed
/// quality against the committed segment and keep the feasible candidate with
/// the highest expected gross margin. `None` keeps the posted offer.
fn best_offer(
    id: FirmId,
    config: &SimConfig,
    demand: &DemandModel,
    firms: &FirmBook,
) -> Option<Offer> {
    let members = firms.snapshots_excluding(Some(id), config.market.market_size, &config.awareness);
    let segment = CompetitiveSegment::build(*demand, config.grid, members);
    let firm = firms.get(id)?;

    let mut best: Option<(Offer, f64)> = None;
    for quality in firms.quality_options(id, &config.firms) {
        let perceived = firm.perceived_quality_of(
            quality,
            config.market.market_size,
            &config.awareness,
            config.grid,
        );
        let unit_cost = config.cost.unit_cost(quality);
        let Ok(result) = optimal_price(&segment, perceived, unit_cost, &config.solver) else {
            continue;
        };
        if best
            .as_ref()
            .map_or(true, |(_, margin)| result.expected_gross_margin > *margin)
        {
            best = Some((Offer::new(result.price, quality), result.expected_gross_margin));
        }
    }
    best.map(|(offer, _)| offer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FirmParams, MarketParams};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup(config: &SimConfig, seed: u64) -> (DemandModel, FirmBook, Consumers, StdRng) {
        let demand = DemandModel::new(&config.market);
        let mut rng = StdRng::seed_from_u64(seed);
        let consumers = Consumers::spawn(&demand, &config.awareness, config.market.market_size, &mut rng);
        let firms = FirmBook::new(config.grid);
        (demand, firms, consumers, rng)
    }

    #[test]
    fn test_first_period_monopolist_sells() {
        // every consumer is rich enough that the monopolist's markup price
        // still clears plenty of positive-utility buyers
        let config = SimConfig {
            market: MarketParams {
                min_welfare_param: 10.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let (demand, mut firms, mut consumers, mut rng) = setup(&config, 7);
        let schedule = RecessionSchedule::default();

        let stats = run_period(0, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);

        assert_eq!(stats.period, 0);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.exits, 0);
        assert_eq!(stats.live_firms, 1);
        assert!(stats.served_demand > 0);
        assert!(stats.served_demand <= config.market.market_size);

        let (_, firm) = firms.iter().next().unwrap();
        assert_eq!(firm.demand, stats.served_demand);
        assert!(firm.tried_by > 0);
    }

    #[test]
    fn test_entry_only_at_start_blocks_later_entries() {
        let config = SimConfig {
            firms: FirmParams {
                entry_only_at_start: true,
                grace_periods: 50,
                minimum_profit: -1e12,
                ..Default::default()
            },
            ..Default::default()
        };
        let (demand, mut firms, mut consumers, mut rng) = setup(&config, 7);
        let schedule = RecessionSchedule::default();

        let first = run_period(0, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);
        assert_eq!(first.entries, 1);

        let second = run_period(1, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);
        assert_eq!(second.entries, 0);
        assert_eq!(second.live_firms, first.live_firms);
    }

    #[test]
    fn test_unprofitable_firm_exits_and_is_purged() {
        // no grace and an unreachable survival threshold: whoever enters in
        // period 0 is gone by the end of it
        let config = SimConfig {
            firms: FirmParams {
                grace_periods: 0,
                minimum_profit: 1e12,
                ..Default::default()
            },
            ..Default::default()
        };
        let (demand, mut firms, mut consumers, mut rng) = setup(&config, 7);
        let schedule = RecessionSchedule::default();

        let stats = run_period(0, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);

        assert_eq!(stats.entries, 1);
        assert_eq!(stats.exits, 1);
        assert_eq!(stats.live_firms, 0);
        assert!(firms.is_empty());
        assert!(consumers.iter().all(|(_, c)| c.known.is_empty()));
        assert!(consumers.iter().all(|(_, c)| c.chosen.is_none()));
    }

    #[test]
    fn test_diffusion_grows_awareness() {
        let config = SimConfig {
            firms: FirmParams {
                entry_only_at_start: true,
                grace_periods: 50,
                minimum_profit: -1e12,
                ..Default::default()
            },
            ..Default::default()
        };
        let (demand, mut firms, mut consumers, mut rng) = setup(&config, 7);
        let schedule = RecessionSchedule::default();

        run_period(0, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);
        let n = config.market.market_size;
        let after_entry = firms.iter().next().map(|(_, f)| f.known_by(n)).unwrap();
        // ceil(5% of 1000)
        assert_eq!(after_entry, 50);

        run_period(1, &config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);
        let after_diffusion = firms.iter().next().map(|(_, f)| f.known_by(n)).unwrap();
        assert!(
            after_diffusion > after_entry,
            "awareness stuck at {after_diffusion}"
        );
    }

    #[test]
    fn test_recession_dampens_served_demand() {
        let base_config = SimConfig {
            market: MarketParams {
                min_welfare_param: 10.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let schedule = RecessionSchedule::default();
        let (demand, mut firms, mut consumers, mut rng) = setup(&base_config, 11);
        let calm = run_period(0, &base_config, &demand, &schedule, &mut firms, &mut consumers, &mut rng);

        let shock = RecessionSchedule::new(vec![crate::config::RecessionShock {
            start: 0,
            end: 1,
            magnitude: 0.9,
        }]);
        let (demand, mut firms, mut consumers, mut rng) = setup(&base_config, 11);
        let shocked = run_period(0, &base_config, &demand, &shock, &mut firms, &mut consumers, &mut rng);

        assert_eq!(shocked.recession_magnitude, 0.9);
        assert!(
            shocked.served_demand <= calm.served_demand,
            "recession served {} vs calm {}",
            shocked.served_demand,
            calm.served_demand
        );
    }
}
