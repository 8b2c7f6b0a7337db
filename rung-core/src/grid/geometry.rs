//! Price-anchored pair index calculation
//!
//! Grid structure for anchor `A` and spread `D`:
//!
//! ```text
//! B(n) = A + n*D
//! S(n) = B(n) - D
//! ```
//!
//! A buy price maps directly to its pair index; a sell price sits one spread
//! below the buy of the same pair, hence the `+ 1` on the sell mapping. The
//! mapping is total and deterministic, which is what keeps ladder position
//! invariant across restarts, re-entries and slippage.

use crate::core::Side;

/// Buy/sell levels for one pair index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairPrices {
    pub buy: f64,
    pub sell: f64,
}

impl PairPrices {
    /// The level for one side of the pair
    pub fn side(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// Canonical pair index for an execution price
///
/// `direction` is the leg the price belongs to: a sell executed at `S(n)`
/// lands one spread below `B(n)`, so its index is shifted by one.
pub fn pair_index_for_price(anchor: f64, spread: f64, price: f64, direction: Side) -> i32 {
    debug_assert!(spread > 0.0, "spread must be positive");
    let steps = (price - anchor) / spread;
    match direction {
        Side::Buy => steps.round() as i32,
        Side::Sell => steps.round() as i32 + 1,
    }
}

/// Grid levels for pair `n`
pub fn prices_for_index(anchor: f64, spread: f64, n: i32) -> PairPrices {
    let buy = anchor + (n as f64) * spread;
    PairPrices {
        buy,
        sell: buy - spread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn buy_price_maps_to_own_index() {
        // B(2) at anchor 1000, spread 20 -> 1040
        let p = prices_for_index(1000.0, 20.0, 2);
        assert_relative_eq!(p.buy, 1040.0);
        assert_relative_eq!(p.sell, 1020.0);
        assert_eq!(pair_index_for_price(1000.0, 20.0, p.buy, Side::Buy), 2);
    }

    #[test]
    fn sell_price_maps_one_index_up() {
        // S(1) sits at the anchor itself
        let p = prices_for_index(1000.0, 20.0, 1);
        assert_relative_eq!(p.sell, 1000.0);
        assert_eq!(pair_index_for_price(1000.0, 20.0, p.sell, Side::Sell), 1);
    }

    #[test]
    fn negative_indices_below_anchor() {
        let p = prices_for_index(1000.0, 20.0, -3);
        assert_relative_eq!(p.buy, 940.0);
        assert_eq!(pair_index_for_price(1000.0, 20.0, 940.0, Side::Buy), -3);
        assert_eq!(pair_index_for_price(1000.0, 20.0, 920.0, Side::Sell), -3);
    }

    #[test]
    fn slippage_within_half_spread_keeps_index() {
        // Execution 4.9 points above the grid level still lands on index 1
        assert_eq!(pair_index_for_price(1000.0, 20.0, 1024.9, Side::Buy), 1);
        assert_eq!(pair_index_for_price(1000.0, 20.0, 1015.5, Side::Buy), 1);
    }

    proptest! {
        // Round-trip law: index -> price -> index is the identity for both legs
        #[test]
        fn roundtrip_buy(
            anchor in 10.0f64..100_000.0,
            spread in 0.5f64..500.0,
            n in -300i32..300,
        ) {
            let p = prices_for_index(anchor, spread, n);
            prop_assert_eq!(pair_index_for_price(anchor, spread, p.buy, Side::Buy), n);
        }

        #[test]
        fn roundtrip_sell(
            anchor in 10.0f64..100_000.0,
            spread in 0.5f64..500.0,
            n in -300i32..300,
        ) {
            let p = prices_for_index(anchor, spread, n);
            prop_assert_eq!(pair_index_for_price(anchor, spread, p.sell, Side::Sell), n);
        }
    }
}
