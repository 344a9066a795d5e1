//! Hard stop and auto-resume
//!
//! A latched global block on catastrophic loss. Unlike the PnL gate, this
//! layer carries hysteresis: once tripped it stays down across day
//! rollovers and only lifts when the cooldown, RSI recovery, and price
//! recovery conditions all hold on the same bar (and auto-resume is
//! enabled). A process restart is the only other way out.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::gate::GateInputs;
use crate::{Bar, Policy};

/// A live hard stop
#[derive(Debug, Clone)]
pub struct ActiveStop {
    pub stop_price: f64,
    pub stop_timestamp: DateTime<Utc>,
    pub bars_since_stop: u64,
    pub reason: String,
}

/// What the controller decided for this bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// No stop in effect
    Clear,
    /// Stop tripped on this bar
    Triggered,
    /// Stop still holding
    Holding,
    /// Resume conditions all held; stop lifted this bar
    Resumed,
}

/// Hard-stop controller. One per engine instance.
#[derive(Debug, Default)]
pub struct HardStopController {
    active: Option<ActiveStop>,
}

impl HardStopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> Option<&ActiveStop> {
        self.active.as_ref()
    }

    /// Evaluate the controller for one bar. Runs before the plan is built.
    ///
    /// While active, the bar counter advances and the resume conditions are
    /// checked; after a resume the trigger conditions are re-checked on the
    /// same bar so a still-breached day re-trips immediately.
    pub fn evaluate(
        &mut self,
        policy: &Policy,
        bar: &Bar,
        inputs: &GateInputs,
        rsi: Option<f64>,
    ) -> StopDecision {
        let mut resumed = false;
        if let Some(stop) = self.active.as_mut() {
            stop.bars_since_stop += 1;

            if policy.auto_resume_enabled && Self::can_resume(policy, stop, bar.close, rsi) {
                info!(
                    bars_since_stop = stop.bars_since_stop,
                    stop_price = stop.stop_price,
                    close = bar.close,
                    "Auto-resume conditions met; lifting hard stop"
                );
                self.active = None;
                resumed = true;
                // Fall through to the trigger check so a still-breached
                // day re-trips on this same bar
            } else {
                return StopDecision::Holding;
            }
        }

        if inputs.daily_pnl_pct <= policy.hard_stop_daily_pnl_pct {
            self.trip(
                bar,
                format!(
                    "daily PnL {:.2}% <= {:.2}%",
                    inputs.daily_pnl_pct, policy.hard_stop_daily_pnl_pct
                ),
            );
            return StopDecision::Triggered;
        }

        if inputs.gap_pct <= policy.hard_stop_gap_pct {
            self.trip(
                bar,
                format!(
                    "gap {:.2}% <= {:.2}%",
                    inputs.gap_pct, policy.hard_stop_gap_pct
                ),
            );
            return StopDecision::Triggered;
        }

        if resumed {
            StopDecision::Resumed
        } else {
            StopDecision::Clear
        }
    }

    fn trip(&mut self, bar: &Bar, reason: String) {
        warn!(price = bar.close, %reason, "Hard stop activated");
        self.active = Some(ActiveStop {
            stop_price: bar.close,
            stop_timestamp: bar.timestamp,
            bars_since_stop: 0,
            reason,
        });
    }

    fn can_resume(policy: &Policy, stop: &ActiveStop, close: f64, rsi: Option<f64>) -> bool {
        if stop.bars_since_stop < policy.resume_cooldown_bars {
            debug!(
                bars = stop.bars_since_stop,
                required = policy.resume_cooldown_bars,
                "Resume cooldown not elapsed"
            );
            return false;
        }

        let rsi = match rsi {
            Some(r) => r,
            None => return false,
        };
        if rsi < policy.resume_rsi_threshold {
            debug!(rsi, threshold = policy.resume_rsi_threshold, "Resume RSI check failed");
            return false;
        }

        if stop.stop_price > 0.0 {
            let recovery_pct = (close - stop.stop_price) / stop.stop_price * 100.0;
            if recovery_pct < policy.resume_price_recovery_pct {
                debug!(
                    recovery_pct,
                    required = policy.resume_price_recovery_pct,
                    "Resume price recovery check failed"
                );
                return false;
            }
        }

        true
    }
}
