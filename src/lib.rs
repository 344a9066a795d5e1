//! Hybrid Market Maker
//!
//! A bar-synchronous market-making and accumulation engine for spot
//! crypto markets. Each bar flows through the indicator pipeline, the
//! band/spread resolver, the PnL gate, and the hard-stop controller, and
//! comes out as a complete trading plan (grid, DCA, and TP intents) that
//! the order lifecycle manager applies against the live-order set.

pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod gate;
pub mod indicators;
pub mod oms;
pub mod planner;
pub mod report;
pub mod spread;
pub mod stop;
pub mod types;

pub use config::{Config, ExecutionConfig, Policy, PolicyOverrides};
pub use engine::{EngineState, HybridEngine};
pub use planner::{OrderIntent, Plan, SlAction};
pub use types::*;
