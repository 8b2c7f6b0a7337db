//! Runtime configuration
//!
//! Rung is configured from a JSON file: process-level paths and monitoring
//! settings plus a per-symbol table of grid parameters. Settings load once at
//! startup; a config update re-syncs the orchestrator's symbol set.
//!
//! ```json
//! {
//!   "data_dir": "./data",
//!   "log_dir": "./logs",
//!   "monitoring": { "enabled": true, "listen_addr": "127.0.0.1:9090" },
//!   "logging": { "level": "info", "json": false },
//!   "symbols": {
//!     "Volatility 75 Index": {
//!       "enabled": true,
//!       "spread": 20.0,
//!       "lot_sizes": [0.01, 0.02, 0.03, 0.04, 0.05],
//!       "max_positions": 5,
//!       "buy_tp_pips": 20.0, "buy_sl_pips": 20.0,
//!       "sell_tp_pips": 20.0, "sell_sl_pips": 20.0
//!     }
//!   }
//! }
//! ```

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::{Config, LoggingConfig, MonitoringConfig, SymbolSettings};

use anyhow::{Context, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a JSON file, then validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {}", path.as_ref().display())
        })?;
        let cfg: Config =
            serde_json::from_str(&raw).context("failed to parse config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Symbols flagged enabled, in deterministic order
    pub fn enabled_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .symbols
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        out.sort();
        out
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (symbol, s) in &self.symbols {
            if s.spread <= 0.0 {
                anyhow::bail!("{symbol}: spread must be positive");
            }
            if s.lot_sizes.is_empty() {
                anyhow::bail!("{symbol}: lot_sizes must not be empty");
            }
            if s.lot_sizes.iter().any(|l| *l <= 0.0) {
                anyhow::bail!("{symbol}: lot sizes must be positive");
            }
            if s.max_positions == 0 {
                anyhow::bail!("{symbol}: max_positions must be >= 1");
            }
            if (s.max_positions as usize) > s.lot_sizes.len() {
                anyhow::bail!(
                    "{symbol}: max_positions {} exceeds lot ladder length {}",
                    s.max_positions,
                    s.lot_sizes.len()
                );
            }
            if s.buy_tp_pips <= 0.0
                || s.buy_sl_pips <= 0.0
                || s.sell_tp_pips <= 0.0
                || s.sell_sl_pips <= 0.0
            {
                anyhow::bail!("{symbol}: tp/sl pip distances must be positive");
            }
            if s.tolerance < 0.0 {
                anyhow::bail!("{symbol}: tolerance must be non-negative");
            }
            if s.hedge_enabled && s.hedge_lot_size <= 0.0 {
                anyhow::bail!("{symbol}: hedge_lot_size must be positive when hedging");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sim_profile_is_valid_and_enabled() {
        let cfg = Config::sim_profile("VIX75");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.enabled_symbols(), vec!["VIX75".to_string()]);
    }

    #[test]
    fn rejects_empty_lot_ladder() {
        let mut cfg = Config::sim_profile("VIX75");
        cfg.symbols.get_mut("VIX75").unwrap().lot_sizes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_max_positions_beyond_ladder() {
        let mut cfg = Config::sim_profile("VIX75");
        cfg.symbols.get_mut("VIX75").unwrap().max_positions = 9;
        assert!(cfg.validate().is_err());
    }
}
