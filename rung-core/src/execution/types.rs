//! Wire types for the broker adapter contract

use crate::core::Side;
use serde::{Deserialize, Serialize};

/// Static symbol properties reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Smallest price increment
    pub point: f64,
    /// Minimum TP/SL distance from the market, in points
    pub stops_level_points: u32,
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
    /// Filling modes the venue accepts, preferred first
    pub filling_modes: FillingMode,
}

impl SymbolSpec {
    /// Minimum stop distance in price units, with the safety floor applied
    pub fn min_stop_distance(&self) -> f64 {
        self.stops_level_points
            .max(crate::config::MIN_STOPS_LEVEL_POINTS) as f64
            * self.point
    }

    /// Round a volume down onto the venue's lot step, clamped to limits
    pub fn normalize_lot(&self, volume: f64) -> f64 {
        let stepped = (volume / self.lot_step).floor() * self.lot_step;
        stepped.clamp(self.min_lot, self.max_lot)
    }
}

/// Order filling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillingMode {
    FillOrKill,
    ImmediateOrCancel,
    Return,
}

/// One open position as the broker reports it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub magic: i64,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
}

/// Why a historical deal closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealReason {
    TakeProfit,
    StopLoss,
    Other,
}

/// One closed deal from the broker's history (optional audit channel)
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerDeal {
    pub ticket: u64,
    pub position_id: u64,
    pub side: Side,
    pub reason: DealReason,
    pub profit: f64,
    pub magic: i64,
    /// Close time, unix seconds
    pub time: i64,
}

/// Market order submission
#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    /// Intended execution price; the venue may fill within `deviation`
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    pub magic: i64,
    pub comment: String,
    /// Max accepted slippage, in points
    pub deviation: u32,
    pub filling: FillingMode,
}

/// Pending order kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    BuyStop,
    SellStop,
    BuyLimit,
    SellLimit,
}

impl PendingKind {
    pub fn side(&self) -> Side {
        match self {
            PendingKind::BuyStop | PendingKind::BuyLimit => Side::Buy,
            PendingKind::SellStop | PendingKind::SellLimit => Side::Sell,
        }
    }
}

/// Pending order submission
#[derive(Debug, Clone)]
pub struct PendingOrderRequest {
    pub symbol: String,
    pub kind: PendingKind,
    pub price: f64,
    pub volume: f64,
    pub magic: i64,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SymbolSpec {
        SymbolSpec {
            point: 0.01,
            stops_level_points: 5,
            min_lot: 0.01,
            max_lot: 50.0,
            lot_step: 0.01,
            filling_modes: FillingMode::FillOrKill,
        }
    }

    #[test]
    fn min_stop_distance_applies_floor() {
        // stops_level 5 is below the safety floor of 10 points
        assert!((spec().min_stop_distance() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn lot_normalization_steps_and_clamps() {
        let s = spec();
        assert!((s.normalize_lot(0.017) - 0.01).abs() < 1e-12);
        assert!((s.normalize_lot(0.0) - 0.01).abs() < 1e-12);
        assert!((s.normalize_lot(500.0) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn pending_kind_sides() {
        assert_eq!(PendingKind::BuyStop.side(), Side::Buy);
        assert_eq!(PendingKind::SellLimit.side(), Side::Sell);
    }
}
