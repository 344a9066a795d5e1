//! Configuration management
//!
//! Loads JSON configuration files holding a default per-symbol policy plus
//! per-pair overrides. Overrides merge shallowly onto the default policy;
//! unknown fields are rejected at load time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Per-symbol trading policy. Every field has a default so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Policy {
    // Spread
    pub use_dynamic_spread: bool,
    pub fixed_spread_pct: f64,

    // Band thresholds (ATR%)
    pub band_near_threshold: f64,
    pub band_mid_threshold: f64,

    // Spread by band
    pub spread_near_pct: f64,
    pub spread_mid_pct: f64,
    pub spread_far_pct: f64,

    // RSI adjustment of the base spread
    pub rsi_adjust_enabled: bool,
    pub rsi_adjust_factor: f64,

    // Grid
    pub grid_enabled: bool,
    pub grid_levels_per_side: usize,
    pub grid_kill_replace_threshold_pct: f64,
    pub grid_min_seconds_between: i64,

    // DCA
    pub dca_enabled: bool,
    pub dca_rsi_threshold: f64,
    pub dca_use_ema_gate: bool,
    pub dca_cooldown_bars: u64,
    pub dca_min_distance_from_last_fill_pct: f64,
    pub dca_price_offset_pct: f64,

    // Take-profit
    pub tp_enabled: bool,
    pub tp_rsi_threshold: f64,
    pub tp_spread_near_pct: f64,
    pub tp_spread_mid_pct: f64,
    pub tp_spread_far_pct: f64,

    // PnL gate (negative percentages)
    pub gate_degraded_gap_pct: f64,
    pub gate_paused_gap_pct: f64,
    pub gate_degraded_daily_pnl_pct: f64,
    pub gate_paused_daily_pnl_pct: f64,

    // Hard stop
    pub hard_stop_daily_pnl_pct: f64,
    pub hard_stop_gap_pct: f64,

    // Auto-resume
    pub auto_resume_enabled: bool,
    pub resume_rsi_threshold: f64,
    pub resume_price_recovery_pct: f64,
    pub resume_cooldown_bars: u64,

    // Order lifecycle
    pub order_max_age_seconds: i64,
    pub order_price_drift_threshold_pct: f64,
    pub order_cancel_on_volatility_spike: bool,
    pub order_volatility_spike_threshold: f64,
    pub order_cancel_on_rsi_reversal: bool,
    pub order_rsi_reversal_threshold: f64,

    // Fees
    pub maker_fee_pct: f64,
    pub taker_fee_pct: f64,
    pub use_bnb_discount: bool,
    pub bnb_discount_pct: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            use_dynamic_spread: true,
            fixed_spread_pct: 0.5,
            band_near_threshold: 1.0,
            band_mid_threshold: 2.0,
            spread_near_pct: 0.3,
            spread_mid_pct: 0.5,
            spread_far_pct: 0.8,
            rsi_adjust_enabled: true,
            rsi_adjust_factor: 0.1,
            grid_enabled: true,
            grid_levels_per_side: 3,
            grid_kill_replace_threshold_pct: 1.0,
            grid_min_seconds_between: 300,
            dca_enabled: true,
            dca_rsi_threshold: 35.0,
            dca_use_ema_gate: true,
            dca_cooldown_bars: 5,
            dca_min_distance_from_last_fill_pct: 1.0,
            dca_price_offset_pct: 0.1,
            tp_enabled: true,
            tp_rsi_threshold: 65.0,
            tp_spread_near_pct: 0.5,
            tp_spread_mid_pct: 0.8,
            tp_spread_far_pct: 1.2,
            gate_degraded_gap_pct: -3.0,
            gate_paused_gap_pct: -5.0,
            gate_degraded_daily_pnl_pct: -2.0,
            gate_paused_daily_pnl_pct: -4.0,
            hard_stop_daily_pnl_pct: -5.0,
            hard_stop_gap_pct: -8.0,
            auto_resume_enabled: true,
            resume_rsi_threshold: 40.0,
            resume_price_recovery_pct: 2.0,
            resume_cooldown_bars: 60,
            order_max_age_seconds: 300,
            order_price_drift_threshold_pct: 2.0,
            order_cancel_on_volatility_spike: true,
            order_volatility_spike_threshold: 1.5,
            order_cancel_on_rsi_reversal: true,
            order_rsi_reversal_threshold: 20.0,
            maker_fee_pct: 0.1,
            taker_fee_pct: 0.1,
            use_bnb_discount: false,
            bnb_discount_pct: 25.0,
        }
    }
}

/// Per-symbol overrides. Only the named fields replace the defaults; the
/// merge is shallow and there is no inheritance chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyOverrides {
    pub use_dynamic_spread: Option<bool>,
    pub fixed_spread_pct: Option<f64>,
    pub band_near_threshold: Option<f64>,
    pub band_mid_threshold: Option<f64>,
    pub spread_near_pct: Option<f64>,
    pub spread_mid_pct: Option<f64>,
    pub spread_far_pct: Option<f64>,
    pub rsi_adjust_enabled: Option<bool>,
    pub rsi_adjust_factor: Option<f64>,
    pub grid_enabled: Option<bool>,
    pub grid_levels_per_side: Option<usize>,
    pub grid_kill_replace_threshold_pct: Option<f64>,
    pub grid_min_seconds_between: Option<i64>,
    pub dca_enabled: Option<bool>,
    pub dca_rsi_threshold: Option<f64>,
    pub dca_use_ema_gate: Option<bool>,
    pub dca_cooldown_bars: Option<u64>,
    pub dca_min_distance_from_last_fill_pct: Option<f64>,
    pub dca_price_offset_pct: Option<f64>,
    pub tp_enabled: Option<bool>,
    pub tp_rsi_threshold: Option<f64>,
    pub tp_spread_near_pct: Option<f64>,
    pub tp_spread_mid_pct: Option<f64>,
    pub tp_spread_far_pct: Option<f64>,
    pub gate_degraded_gap_pct: Option<f64>,
    pub gate_paused_gap_pct: Option<f64>,
    pub gate_degraded_daily_pnl_pct: Option<f64>,
    pub gate_paused_daily_pnl_pct: Option<f64>,
    pub hard_stop_daily_pnl_pct: Option<f64>,
    pub hard_stop_gap_pct: Option<f64>,
    pub auto_resume_enabled: Option<bool>,
    pub resume_rsi_threshold: Option<f64>,
    pub resume_price_recovery_pct: Option<f64>,
    pub resume_cooldown_bars: Option<u64>,
    pub order_max_age_seconds: Option<i64>,
    pub order_price_drift_threshold_pct: Option<f64>,
    pub order_cancel_on_volatility_spike: Option<bool>,
    pub order_volatility_spike_threshold: Option<f64>,
    pub order_cancel_on_rsi_reversal: Option<bool>,
    pub order_rsi_reversal_threshold: Option<f64>,
    pub maker_fee_pct: Option<f64>,
    pub taker_fee_pct: Option<f64>,
    pub use_bnb_discount: Option<bool>,
    pub bnb_discount_pct: Option<f64>,
}

macro_rules! merge_fields {
    ($policy:expr, $overrides:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $overrides.$field {
                $policy.$field = v;
            }
        )+
    };
}

impl Policy {
    /// Shallow-merge per-symbol overrides onto this policy
    pub fn apply(&mut self, overrides: &PolicyOverrides) {
        merge_fields!(
            self,
            overrides,
            use_dynamic_spread,
            fixed_spread_pct,
            band_near_threshold,
            band_mid_threshold,
            spread_near_pct,
            spread_mid_pct,
            spread_far_pct,
            rsi_adjust_enabled,
            rsi_adjust_factor,
            grid_enabled,
            grid_levels_per_side,
            grid_kill_replace_threshold_pct,
            grid_min_seconds_between,
            dca_enabled,
            dca_rsi_threshold,
            dca_use_ema_gate,
            dca_cooldown_bars,
            dca_min_distance_from_last_fill_pct,
            dca_price_offset_pct,
            tp_enabled,
            tp_rsi_threshold,
            tp_spread_near_pct,
            tp_spread_mid_pct,
            tp_spread_far_pct,
            gate_degraded_gap_pct,
            gate_paused_gap_pct,
            gate_degraded_daily_pnl_pct,
            gate_paused_daily_pnl_pct,
            hard_stop_daily_pnl_pct,
            hard_stop_gap_pct,
            auto_resume_enabled,
            resume_rsi_threshold,
            resume_price_recovery_pct,
            resume_cooldown_bars,
            order_max_age_seconds,
            order_price_drift_threshold_pct,
            order_cancel_on_volatility_spike,
            order_volatility_spike_threshold,
            order_cancel_on_rsi_reversal,
            order_rsi_reversal_threshold,
            maker_fee_pct,
            taker_fee_pct,
            use_bnb_discount,
            bnb_discount_pct,
        );
    }
}

/// Execution-boundary settings: tick sizes, order sizing, exchange minimums
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutionConfig {
    /// Exchange minimum notional in quote currency
    pub min_notional: f64,
    /// Fraction of equity committed per order intent
    pub order_equity_fraction: f64,
    /// Tick size used when no per-symbol tick is configured
    pub default_tick_size: f64,
    /// Per-symbol tick sizes
    pub tick_sizes: HashMap<String, f64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            min_notional: 11.0,
            order_equity_fraction: 0.01,
            default_tick_size: 0.01,
            tick_sizes: HashMap::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn tick_size(&self, symbol: &str) -> f64 {
        self.tick_sizes
            .get(symbol)
            .copied()
            .unwrap_or(self.default_tick_size)
    }
}

/// Backtest driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub results_dir: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            results_dir: "results".to_string(),
        }
    }
}

/// Top-level configuration: one default policy plus per-pair overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub default_policy: Policy,
    pub pairs: HashMap<String, PolicyOverrides>,
    pub execution: ExecutionConfig,
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Resolve the effective policy for a symbol
    pub fn policy_for(&self, symbol: &str) -> Policy {
        let mut policy = self.default_policy.clone();
        if let Some(overrides) = self.pairs.get(symbol) {
            policy.apply(overrides);
            info!(symbol, "Using pair-specific policy overrides");
        } else {
            info!(symbol, "Using default policy");
        }
        policy
    }
}
