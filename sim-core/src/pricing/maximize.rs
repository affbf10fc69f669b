//! Bounded univariate maximization for the per-window price search.
//!
//! Profit across one neighbor window is smooth and single-peaked, so a
//! golden-section bracket converges without derivatives in O(log(width/tol))
//! evaluations. The iteration cap is a soft budget: exhausting it degrades
//! to the midpoint of the original interval instead of failing the search.

const INV_PHI: f64 = 0.618_033_988_749_894_9; // (sqrt(5) - 1) / 2

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaximizeResult {
    pub x: f64,
    /// False when the bracket never shrank below tolerance; `x` is then
    /// the midpoint of the original interval.
    pub converged: bool,
}

/// Find the maximizer of `f` over `[lo, hi]` by golden-section search.
pub fn maximize<F>(lo: f64, hi: f64, tolerance: f64, max_iterations: u32, f: F) -> MaximizeResult
where
    F: Fn(f64) -> f64,
{
    debug_assert!(lo <= hi, "inverted interval [{}, {}]", lo, hi);

    let mut a = lo;
    let mut b = hi;
    let mut x1 = b - INV_PHI * (b - a);
    let mut x2 = a + INV_PHI * (b - a);
    let mut f1 = f(x1);
    let mut f2 = f(x2);

    for _ in 0..max_iterations {
        if b - a <= tolerance {
            return MaximizeResult {
                x: 0.5 * (a + b),
                converged: true,
            };
        }
        if f1 < f2 {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + INV_PHI * (b - a);
            f2 = f(x2);
        } else {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - INV_PHI * (b - a);
            f1 = f(x1);
        }
    }

    MaximizeResult {
        x: 0.5 * (lo + hi),
        converged: false,
    }
}
