//! PnL gate
//!
//! Tracks the day frame (open price and equity at the first bar of each
//! calendar date) and classifies the trading regime from the day-relative
//! gap and PnL. Classification is pure: no hysteresis on this layer.
//! Hysteresis belongs to the hard-stop controller, where a cooldown and a
//! multi-signal resume are required.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::{Bar, GateState, Policy};

/// Day-open anchors. Set exactly once per calendar date, at the first bar
/// whose date differs from the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayFrame {
    pub date: NaiveDate,
    pub open_price: f64,
    pub open_equity: f64,
}

/// Inputs to classification for one bar
#[derive(Debug, Clone, Copy)]
pub struct GateInputs {
    pub gap_pct: f64,
    pub daily_pnl_pct: f64,
    /// Whether this bar opened a new calendar date
    pub rolled: bool,
}

/// Day-frame tracker plus gate classification
#[derive(Debug, Default)]
pub struct PnlGate {
    frame: Option<DayFrame>,
}

impl PnlGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll the day frame if needed, then compute gap% and daily PnL%.
    /// The roll happens before any classification uses the new bar.
    pub fn observe(&mut self, bar: &Bar, equity: f64) -> GateInputs {
        let date = bar.timestamp.date_naive();
        let rolled = self.frame.map(|f| f.date) != Some(date);

        let frame = match self.frame {
            Some(f) if !rolled => f,
            _ => {
                let f = DayFrame {
                    date,
                    open_price: bar.open,
                    open_equity: equity,
                };
                self.frame = Some(f);
                info!(
                    date = %date,
                    open_price = bar.open,
                    open_equity = equity,
                    "New trading day"
                );
                f
            }
        };

        let gap_pct = if frame.open_price > 0.0 {
            (bar.close - frame.open_price) / frame.open_price * 100.0
        } else {
            0.0
        };
        let daily_pnl_pct = if frame.open_equity > 0.0 {
            (equity - frame.open_equity) / frame.open_equity * 100.0
        } else {
            0.0
        };

        debug!(gap_pct, daily_pnl_pct, "Gate inputs");

        GateInputs {
            gap_pct,
            daily_pnl_pct,
            rolled,
        }
    }

    /// Classify the regime. Recovery is instantaneous when either metric
    /// crosses back above its threshold.
    pub fn classify(policy: &Policy, inputs: &GateInputs) -> GateState {
        if inputs.gap_pct <= policy.gate_paused_gap_pct
            || inputs.daily_pnl_pct <= policy.gate_paused_daily_pnl_pct
        {
            GateState::Paused
        } else if inputs.gap_pct <= policy.gate_degraded_gap_pct
            || inputs.daily_pnl_pct <= policy.gate_degraded_daily_pnl_pct
        {
            GateState::Degraded
        } else {
            GateState::Run
        }
    }

    /// Current day frame, if a bar has been observed
    pub fn frame(&self) -> Option<&DayFrame> {
        self.frame.as_ref()
    }
}
