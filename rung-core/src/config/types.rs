use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for per-symbol SQLite registries
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for group log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Delete any stale registry file on start instead of resuming from it
    #[serde(default)]
    pub fresh_session: bool,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-symbol grid settings, keyed by broker symbol name
    #[serde(default)]
    pub symbols: BTreeMap<String, SymbolSettings>,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit flat JSON events (for a collector) instead of the console format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Metrics exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address for the /metrics + /healthz HTTP listener
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_metrics_addr(),
        }
    }
}

/// Grid parameters for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Grid spread: distance between a pair's buy and sell leg
    pub spread: f64,

    /// Sequential lot ladder, indexed by a pair's trade_count
    pub lot_sizes: Vec<f64>,

    /// Trades permitted per pair before the hedge fires
    pub max_positions: u32,

    /// TP/SL pip distances per direction, measured from execution price
    #[serde(default = "default_pips")]
    pub buy_tp_pips: f64,
    #[serde(default = "default_pips")]
    pub buy_sl_pips: f64,
    #[serde(default = "default_pips")]
    pub sell_tp_pips: f64,
    #[serde(default = "default_pips")]
    pub sell_sl_pips: f64,

    /// Step-trigger tolerance; 0 means "derive spread/4 at runtime"
    #[serde(default)]
    pub tolerance: f64,

    #[serde(default = "default_true")]
    pub hedge_enabled: bool,

    #[serde(default = "default_hedge_lot")]
    pub hedge_lot_size: f64,

    /// Max price deviation accepted on market orders, in points
    #[serde(default = "default_deviation")]
    pub deviation: u32,
}

impl SymbolSettings {
    /// Effective step-trigger tolerance
    pub fn step_tolerance(&self) -> f64 {
        if self.tolerance > 0.0 {
            self.tolerance
        } else {
            self.spread / 4.0
        }
    }

    /// Pip distances for a direction as (tp, sl)
    pub fn pips_for(&self, side: crate::core::Side) -> (f64, f64) {
        match side {
            crate::core::Side::Buy => (self.buy_tp_pips, self.buy_sl_pips),
            crate::core::Side::Sell => (self.sell_tp_pips, self.sell_sl_pips),
        }
    }
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            spread: 20.0,
            lot_sizes: vec![0.01, 0.02, 0.03, 0.04, 0.05],
            max_positions: 5,
            buy_tp_pips: default_pips(),
            buy_sl_pips: default_pips(),
            sell_tp_pips: default_pips(),
            sell_sl_pips: default_pips(),
            tolerance: 5.0,
            hedge_enabled: true,
            hedge_lot_size: default_hedge_lot(),
            deviation: default_deviation(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            fresh_session: false,
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
            symbols: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Simulation profile: one enabled symbol with the default grid settings
    pub fn sim_profile(symbol: &str) -> Self {
        let mut cfg = Config::default();
        cfg.symbols
            .insert(symbol.to_string(), SymbolSettings::default());
        cfg
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pips() -> f64 {
    20.0
}

fn default_hedge_lot() -> f64 {
    0.01
}

fn default_deviation() -> u32 {
    200
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
