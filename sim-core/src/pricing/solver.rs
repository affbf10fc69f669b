//! Optimal-price search across neighbor windows.
//!
//! Expected profit is smooth only while the offer keeps the same quality
//! neighbors, so the search is windowed: maximize inside the current
//! neighbor pair, then hypothetically evict the easiest-to-expel member,
//! rebuild the window, and repeat. The best window wins. Evictions
//! accumulate: each candidate's window is bounded above by the expulsion
//! threshold that opened it, keeping price and membership consistent.

use thiserror::Error;

use crate::config::SolverParams;
use crate::demand::DemandModel;
use crate::pricing::maximize::maximize;
use crate::pricing::window::NeighborWindow;
use crate::segment::{CompetitiveSegment, FirmSnapshot};
use crate::types::{Money, Offer, OfferGrid, Price, Quality, Quantity};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    /// Every candidate neighbor configuration prices the firm out: the
    /// cost floor sits above each window's entry ceiling.
    #[error("no market segment can hold an offer at perceived quality {perceived_quality}")]
    NoMarketSegmentForFirm { perceived_quality: f64 },
}

/// The winning price and the demand picture at that price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalPriceResult {
    pub price: Price,
    pub expected_quantity: Quantity,
    /// Expected (price - unit cost) * quantity, gross of fixed costs.
    pub expected_gross_margin: Money,
    /// Welfare parameter separating the offer from its lower neighbor at
    /// the chosen price (consumers above it buy up from the neighbor).
    pub lo_welfare_limit: f64,
    /// Welfare parameter above which consumers defect to the higher
    /// neighbor; infinite when the offer tops the segment.
    pub hi_welfare_limit: f64,
}

/// Price an offer at `perceived_quality` against the segment, maximizing
/// expected gross margin over every reachable neighbor window.
///
/// Windows are visited from the cheapest hypothetical eviction to the
/// dearest: members whose expulsion threshold clears the cost floor are
/// taken in descending threshold order (ties to the cheaper member), each
/// removed from an accumulating working copy. A later window replaces the
/// incumbent best only on strictly greater margin.
pub fn optimal_price(
    segment: &CompetitiveSegment,
    perceived_quality: Quality,
    unit_cost: Money,
    params: &SolverParams,
) -> Result<OptimalPriceResult, PricingError> {
    let grid = segment.grid();
    let floor_price = grid.ceil_price(unit_cost + grid.min_delta_price());

    let mut best: Option<OptimalPriceResult> = None;
    if let Some(window) = NeighborWindow::try_build(segment, perceived_quality, floor_price, None)
    {
        best = Some(window_optimum(
            segment.demand(),
            grid,
            perceived_quality,
            unit_cost,
            &window,
            params,
        ));
    }

    let mut candidates: Vec<(FirmSnapshot, Price)> = segment
        .members()
        .iter()
        .filter_map(|m| {
            let threshold = segment
                .price_to_expel(perceived_quality, m.id)
                .and_then(|pte| pte.finite())?;
            (threshold >= floor_price).then_some((*m, threshold))
        })
        .collect();
    candidates.sort_by(|(a, ta), (b, tb)| {
        tb.total_cmp(ta)
            .then(a.price.total_cmp(&b.price))
            .then(a.id.cmp(&b.id))
    });

    let mut working = segment.clone();
    for (candidate, threshold) in candidates {
        working.evict(candidate.id);
        let Some(window) =
            NeighborWindow::try_build(&working, perceived_quality, floor_price, Some(threshold))
        else {
            continue;
        };
        let result = window_optimum(
            working.demand(),
            grid,
            perceived_quality,
            unit_cost,
            &window,
            params,
        );
        if best.map_or(true, |b| {
            result.expected_gross_margin > b.expected_gross_margin
        }) {
            best = Some(result);
        }
    }

    best.ok_or(PricingError::NoMarketSegmentForFirm { perceived_quality })
}

/// Best price within one window, with demand evaluated at the final
/// grid-snapped, window-clipped price.
fn window_optimum(
    demand: &DemandModel,
    grid: OfferGrid,
    quality: Quality,
    unit_cost: Money,
    window: &NeighborWindow,
    params: &SolverParams,
) -> OptimalPriceResult {
    let (lo_offer, hi_offer) = window.neighbor_offers();

    let raw_price = if hi_offer.is_none() {
        // Topping the segment, profit (p - c) * K * (p - loP)^-lambda has a
        // closed-form stationary point; no numeric search needed.
        monopoly_side_price(
            demand.lambda,
            unit_cost,
            window.lo.as_ref().map_or(0.0, |lo| lo.price),
        )
    } else {
        let profit = |price: f64| {
            let offer = Offer::new(price, quality);
            (price - unit_cost) * demand.expected_quantity(offer, lo_offer, hi_offer)
        };
        maximize(
            window.min_price,
            window.max_price,
            params.tolerance,
            params.max_iterations,
            profit,
        )
        .x
    };

    // Snap to the grid first, clip into the window last.
    let price = grid
        .round_price(raw_price)
        .clamp(window.min_price, window.max_price);

    let offer = Offer::new(price, quality);
    let lo_welfare_limit = demand.limit(lo_offer, Some(offer));
    let hi_welfare_limit = demand.limit(Some(offer), hi_offer);
    let expected_quantity = (demand.expected_above(lo_welfare_limit)
        - demand.expected_above(hi_welfare_limit))
    .max(0.0);

    OptimalPriceResult {
        price,
        expected_quantity,
        expected_gross_margin: (price - unit_cost) * expected_quantity,
        lo_welfare_limit,
        hi_welfare_limit,
    }
}

/// Stationary point of `(p - cost) * (p - lo_price)^-lambda`: the profit
/// shape when no higher neighbor caps the window. `lambda > 1` or expected
/// profit has no interior maximum.
fn monopoly_side_price(lambda: f64, unit_cost: Money, lo_price: Price) -> Price {
    debug_assert!(lambda > 1.0, "lambda {} must exceed 1", lambda);
    (lambda * unit_cost - lo_price) / (lambda - 1.0)
}
