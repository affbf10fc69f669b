//! Property-based tests for the pricing engine
//!
//! Deterministic displacement scenarios first, then proptest invariants
//! that must hold across randomly drawn offers, niches and costs.

use proptest::prelude::*;
use slotmap::SlotMap;

use sim_core::{
    CompetitiveSegment, DemandModel, FirmId, FirmSnapshot, MarketParams, Offer, OfferGrid, Price,
    PricingError, Quality, SolverParams, optimal_price,
};

// === TEST FIXTURES ===

/// Demand with lambda = 1.5 and a welfare floor of 1.0, the same shape
/// every manual expectation below is computed against.
fn demand() -> DemandModel {
    DemandModel::new(&MarketParams {
        market_size: 1000,
        gini: 0.5,
        min_welfare_param: 1.0,
        quality_exponent: 1.0,
        richest_consumer_prob: 0.5,
    })
}

fn firm_ids(n: usize) -> Vec<FirmId> {
    let mut sm: SlotMap<FirmId, ()> = SlotMap::with_key();
    (0..n).map(|_| sm.insert(())).collect()
}

fn snap(id: FirmId, price: Price, quality: Quality) -> FirmSnapshot {
    FirmSnapshot {
        id,
        price,
        real_quality: quality,
        perceived_quality: quality,
    }
}

/// A budget incumbent and a premium incumbent with a wide quality gap
/// between them: room for a mid-market challenger.
fn two_incumbent_segment() -> (CompetitiveSegment, Vec<FirmId>) {
    let ids = firm_ids(2);
    let segment = CompetitiveSegment::build(
        demand(),
        OfferGrid::default(),
        vec![snap(ids[0], 4.5, 5.0), snap(ids[1], 20.0, 20.0)],
    );
    (segment, ids)
}

fn three_firm_segment() -> (CompetitiveSegment, Vec<FirmId>) {
    let ids = firm_ids(4);
    let segment = CompetitiveSegment::build(
        demand(),
        OfferGrid::default(),
        vec![
            snap(ids[0], 2.0, 5.0),
            snap(ids[1], 8.0, 10.0),
            snap(ids[2], 20.0, 15.0),
        ],
    );
    (segment, ids)
}

// === DISPLACEMENT SCENARIOS ===

#[test]
fn mid_market_challenger_prices_out_the_budget_incumbent() {
    let (segment, ids) = two_incumbent_segment();
    let d = *segment.demand();

    // Between the incumbents the challenger is squeezed into a sliver
    // above the budget firm's expulsion threshold; the winning window is
    // the one where that firm is priced out of the segment entirely.
    let threshold = segment
        .price_to_expel(12.0, ids[0])
        .unwrap()
        .finite()
        .unwrap();
    assert_eq!(threshold, 11.5);

    let result = optimal_price(&segment, 12.0, 3.0, &SolverParams::default()).unwrap();

    assert!(result.price > 3.01, "price {} below cost floor", result.price);
    assert!(
        result.price <= threshold,
        "price {} does not displace the budget incumbent",
        result.price
    );
    assert!(result.price > 8.4 && result.price < 8.6, "price = {}", result.price);

    // with the budget firm gone the whole welfare floor buys in
    assert_eq!(result.lo_welfare_limit, 1.0);
    let hi = d.limit(
        Some(Offer::new(result.price, 12.0)),
        Some(Offer::new(20.0, 20.0)),
    );
    assert_eq!(result.hi_welfare_limit, hi);

    assert!(result.expected_quantity > 418.0 && result.expected_quantity < 420.0);
    assert!(result.expected_gross_margin > 2300.0 && result.expected_gross_margin < 2315.0);
}

#[test]
fn solved_quantity_matches_the_reported_limits() {
    let (segment, _) = two_incumbent_segment();
    let d = *segment.demand();

    let result = optimal_price(&segment, 12.0, 3.0, &SolverParams::default()).unwrap();

    let quantity =
        d.expected_above(result.lo_welfare_limit) - d.expected_above(result.hi_welfare_limit);
    assert!((quantity - result.expected_quantity).abs() < 1e-9);
    assert!(result.expected_quantity <= d.market_size);

    let margin = (result.price - 3.0) * result.expected_quantity;
    assert!((margin - result.expected_gross_margin).abs() < 1e-9);
}

#[test]
fn cost_above_every_entry_ceiling_finds_no_segment() {
    let (segment, _) = two_incumbent_segment();

    // At quality 12 the premium firm caps entry at 12.0 even after the
    // budget firm is hypothetically evicted, so a unit cost of 12 leaves
    // no window open.
    let result = optimal_price(&segment, 12.0, 12.0, &SolverParams::default());
    assert_eq!(
        result,
        Err(PricingError::NoMarketSegmentForFirm {
            perceived_quality: 12.0
        })
    );
}

#[test]
fn add_then_remove_restores_membership_exactly() {
    let (mut segment, ids) = three_firm_segment();
    let before = segment.members().to_vec();

    // the aggressive entrant expels the middle firm on admission
    assert!(segment.try_add(snap(ids[3], 9.5, 12.0)));
    assert!(!segment.contains(ids[1]));

    // removing it re-admits the exclusion pool, restoring the old order
    assert!(segment.remove(ids[3]));
    assert_eq!(segment.members(), &before[..]);
}

// === DEMAND PROPERTIES ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Widening the price gap between quality neighbors pushes the welfare
    /// limit separating their buyers strictly upward.
    #[test]
    fn wider_price_gap_raises_the_welfare_limit(
        price in 7.0..30.0f64,
        bump in 0.01..10.0f64,
    ) {
        let d = demand();
        let lo = Offer::new(2.0, 5.0);
        let cheap = Offer::new(price, 10.0);
        let dear = Offer::new(price + bump, 10.0);

        prop_assert!(d.limit(Some(lo), Some(cheap)) < d.limit(Some(lo), Some(dear)));
    }

    /// Fewer consumers sit above a higher welfare limit, and the count
    /// never leaves [0, market size].
    #[test]
    fn tail_counts_fall_as_limits_rise(
        limit in 0.1..100.0f64,
        bump in 0.0..100.0f64,
    ) {
        let d = demand();
        let near = d.expected_above(limit);
        let far = d.expected_above(limit + bump);

        prop_assert!(far <= near);
        prop_assert!(far >= 0.0);
        prop_assert!(near <= d.market_size);
    }

    /// Expected demand stays within the market whatever the neighbor
    /// configuration, dominated offers included.
    #[test]
    fn quantities_stay_within_the_market(
        lo_price in 0.1..40.0f64,
        price in 0.1..40.0f64,
        hi_price in 0.1..40.0f64,
        lo_quality in 1.0..10.0f64,
        quality_step in 0.0..10.0f64,
        hi_step in 0.0..10.0f64,
    ) {
        let d = demand();
        let quality = lo_quality + quality_step;
        let lo = Offer::new(lo_price, lo_quality);
        let offer = Offer::new(price, quality);
        let hi = Offer::new(hi_price, quality + hi_step);

        let q = d.expected_quantity(offer, Some(lo), Some(hi));
        prop_assert!(q >= 0.0);
        prop_assert!(q <= d.market_size);
    }

    /// With its neighbors held fixed, a dearer offer never captures more
    /// demand: the lower limit rises while the upper one falls.
    #[test]
    fn dearer_offers_capture_no_more_demand(
        price in 2.0..25.0f64,
        bump in 0.0..5.0f64,
    ) {
        let d = demand();
        let lo = Offer::new(2.0, 5.0);
        let hi = Offer::new(20.0, 15.0);

        let q_cheap = d.expected_quantity(Offer::new(price, 10.0), Some(lo), Some(hi));
        let q_dear = d.expected_quantity(Offer::new(price + bump, 10.0), Some(lo), Some(hi));
        prop_assert!(q_dear <= q_cheap + 1e-9);
    }

    /// As the higher neighbor cuts price toward the offer's own, it siphons
    /// demand away: expected quantity never rises.
    #[test]
    fn cheaper_upper_neighbors_erode_demand(
        hi_price in 6.0..30.0f64,
        cut in 0.0..5.9f64,
    ) {
        let d = demand();
        let lo = Offer::new(2.0, 5.0);
        let offer = Offer::new(6.0, 10.0);

        let before = d.expected_quantity(offer, Some(lo), Some(Offer::new(hi_price, 15.0)));
        let after = d.expected_quantity(offer, Some(lo), Some(Offer::new(hi_price - cut, 15.0)));
        prop_assert!(after <= before + 1e-9);
    }
}

// === SOLVER PROPERTIES ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Whatever the niche and cost, a solved price clears the cost floor
    /// and reports quantity and margin consistent with its own limits.
    #[test]
    fn solved_prices_are_internally_consistent(
        quality in 1.0..25.0f64,
        cost in 0.1..30.0f64,
    ) {
        let (segment, _) = three_firm_segment();
        let d = *segment.demand();

        match optimal_price(&segment, quality, cost, &SolverParams::default()) {
            Ok(r) => {
                prop_assert!(r.price > cost);
                prop_assert!(r.expected_quantity >= 0.0);
                prop_assert!(r.expected_quantity <= d.market_size);

                let q = (d.expected_above(r.lo_welfare_limit)
                    - d.expected_above(r.hi_welfare_limit))
                .max(0.0);
                prop_assert!((q - r.expected_quantity).abs() < 1e-9);

                let margin = (r.price - cost) * r.expected_quantity;
                prop_assert!((margin - r.expected_gross_margin).abs() < 1e-9);

                if r.expected_quantity > 0.0 {
                    prop_assert!(r.lo_welfare_limit < r.hi_welfare_limit);
                }
            }
            Err(PricingError::NoMarketSegmentForFirm { perceived_quality }) => {
                prop_assert_eq!(perceived_quality, quality);
            }
        }
    }
}
