//! Hybrid strategy engine
//!
//! The bar-atomic core. Each call to [`HybridEngine::on_bar`] consumes one
//! bar and the current equity, updates the indicator pipeline, rolls the
//! day frame, evaluates the hard stop, classifies the gate, and emits a
//! complete trading plan. One engine instance per symbol; all mutable
//! state (day frame, stop latch, grid timestamps) lives here.
//!
//! The engine never sends orders. The lifecycle manager applies the plan
//! and reports DCA fills back via [`HybridEngine::notify_dca_fill`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::gate::{DayFrame, PnlGate};
use crate::indicators::{IndicatorConfig, IndicatorPipeline, Snapshot};
use crate::planner::{OrderPlanner, Plan, SlAction};
use crate::spread::{self, SpreadResolution};
use crate::stop::HardStopController;
use crate::{Band, Bar, GateState, Policy, Symbol};

/// Introspectable engine state, for driver logging and crash diagnostics
#[derive(Debug, Clone)]
pub struct EngineState {
    pub symbol: Symbol,
    pub last_grid_ref_price: Option<f64>,
    pub bars_since_dca_fill: Option<u64>,
    pub last_dca_fill_price: Option<f64>,
    pub day_frame: Option<DayFrame>,
    pub hard_stop_active: bool,
    pub hard_stop_reason: Option<String>,
}

/// The hybrid grid + DCA strategy engine
pub struct HybridEngine {
    symbol: Symbol,
    policy: Policy,
    indicators: IndicatorPipeline,
    gate: PnlGate,
    stop: HardStopController,
    planner: OrderPlanner,
    last_timestamp: Option<DateTime<Utc>>,
    last_plan: Option<Plan>,
}

impl HybridEngine {
    pub fn new(symbol: Symbol, policy: Policy) -> Result<Self> {
        Self::with_indicator_config(symbol, policy, IndicatorConfig::default())
    }

    pub fn with_indicator_config(
        symbol: Symbol,
        policy: Policy,
        indicator_config: IndicatorConfig,
    ) -> Result<Self> {
        Ok(Self {
            symbol,
            policy,
            indicators: IndicatorPipeline::new(indicator_config)?,
            gate: PnlGate::new(),
            stop: HardStopController::new(),
            planner: OrderPlanner::new(),
            last_timestamp: None,
            last_plan: None,
        })
    }

    /// Process one bar and emit the trading plan.
    ///
    /// Stale or malformed bars are dropped: state is retained and the
    /// previous plan is returned unchanged, so replaying a timestamp is a
    /// no-op.
    pub fn on_bar(&mut self, bar: &Bar, equity: f64) -> Plan {
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                debug!(
                    symbol = %self.symbol,
                    timestamp = %bar.timestamp,
                    "Dropping stale bar"
                );
                return self.previous_plan(bar.close);
            }
        }

        if let Err(e) = bar.validate() {
            warn!(symbol = %self.symbol, error = %e, "Skipped bar");
            return self.previous_plan(bar.close);
        }

        self.planner.tick();
        self.indicators.update(bar);
        let inputs = self.gate.observe(bar, equity);

        // update() always leaves a snapshot behind
        let snapshot = match self.indicators.latest() {
            Some(s) => s.clone(),
            None => return self.previous_plan(bar.close),
        };

        let resolution = match (snapshot.atr_pct, snapshot.rsi) {
            (Some(atr_pct), Some(rsi)) => Some(spread::resolve(&self.policy, atr_pct, rsi)),
            _ => None,
        };
        let (band, spread_pct) = match resolution {
            Some(r) => (r.band, r.spread_pct),
            None => (Band::Mid, self.policy.fixed_spread_pct),
        };

        self.stop.evaluate(&self.policy, bar, &inputs, snapshot.rsi);

        let plan = if let Some(stop) = self.stop.state() {
            // The stop supersedes the gate: no orders of any kind
            let mut plan = Plan::inert(GateState::Paused, bar.close, spread_pct, band);
            plan.sl_action = SlAction::stop(format!("hard stop active: {}", stop.reason));
            plan
        } else {
            let gate_state = PnlGate::classify(&self.policy, &inputs);
            self.build_plan(gate_state, bar, &snapshot, resolution, band, spread_pct)
        };

        self.last_timestamp = Some(bar.timestamp);
        self.last_plan = Some(plan.clone());
        plan
    }

    fn build_plan(
        &mut self,
        gate_state: GateState,
        bar: &Bar,
        snapshot: &Snapshot,
        resolution: Option<SpreadResolution>,
        band: Band,
        spread_pct: f64,
    ) -> Plan {
        let ref_price = bar.close;
        let mut plan = Plan::inert(gate_state, ref_price, spread_pct, band);

        // PAUSED blocks everything; DEGRADED blocks the grid only. An
        // unresolved spread (indicators still warming up) suppresses all
        // dependent order kinds.
        let resolution = match resolution {
            Some(r) => r,
            None => return plan,
        };

        match gate_state {
            GateState::Paused => {}
            GateState::Degraded => {
                plan.dca_orders =
                    self.planner
                        .plan_dca(&self.policy, snapshot, ref_price, bar.timestamp);
                plan.tp_orders = self.planner.plan_tp(
                    &self.policy,
                    snapshot,
                    ref_price,
                    band,
                    resolution.tp_spread_pct,
                );
            }
            GateState::Run => {
                let (grid_orders, kill_replace) =
                    self.planner
                        .plan_grid(&self.policy, ref_price, spread_pct, bar.timestamp);
                plan.grid_orders = grid_orders;
                plan.kill_replace = kill_replace;
                plan.dca_orders =
                    self.planner
                        .plan_dca(&self.policy, snapshot, ref_price, bar.timestamp);
                plan.tp_orders = self.planner.plan_tp(
                    &self.policy,
                    snapshot,
                    ref_price,
                    band,
                    resolution.tp_spread_pct,
                );
            }
        }

        plan
    }

    fn previous_plan(&self, fallback_ref_price: f64) -> Plan {
        self.last_plan.clone().unwrap_or_else(|| {
            Plan::inert(
                GateState::Run,
                fallback_ref_price,
                self.policy.fixed_spread_pct,
                Band::Mid,
            )
        })
    }

    /// Forward a DCA fill from the lifecycle manager
    pub fn notify_dca_fill(&mut self, fill_price: f64) {
        self.planner.notify_dca_fill(fill_price);
    }

    /// Latest indicator snapshot
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.indicators.latest()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Current engine state for introspection
    pub fn state(&self) -> EngineState {
        EngineState {
            symbol: self.symbol.clone(),
            last_grid_ref_price: self.planner.last_grid_ref_price(),
            bars_since_dca_fill: self.planner.bars_since_dca_fill(),
            last_dca_fill_price: self.planner.last_dca_fill_price(),
            day_frame: self.gate.frame().copied(),
            hard_stop_active: self.stop.is_active(),
            hard_stop_reason: self.stop.state().map(|s| s.reason.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn flat_bar(minute: i64, close: f64) -> Bar {
        Bar::new_unchecked(
            t0() + Duration::minutes(minute),
            close,
            close * 1.002,
            close * 0.998,
            close,
            1_000.0,
        )
    }

    /// Warm the engine with enough gently oscillating bars for every
    /// indicator, keeping the gate in RUN
    fn warmed_engine(policy: Policy) -> (HybridEngine, i64) {
        let mut engine = HybridEngine::new(Symbol::new("BTCUSDT"), policy).unwrap();
        let mut minute = 0;
        for i in 0..60 {
            let close = 100.0 + (i % 5) as f64 * 0.2;
            engine.on_bar(&flat_bar(minute, close), 10_000.0);
            minute += 1;
        }
        (engine, minute)
    }

    #[test]
    fn test_warmup_suppresses_orders() {
        let mut engine = HybridEngine::new(Symbol::new("BTCUSDT"), Policy::default()).unwrap();
        for minute in 0..10 {
            let plan = engine.on_bar(&flat_bar(minute, 100.0), 10_000.0);
            assert!(plan.is_empty(), "no orders before indicator warmup");
            assert!(!plan.sl_action.stop);
        }
    }

    #[test]
    fn test_grid_emitted_when_warm() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        let plan = engine.on_bar(&flat_bar(minute, 103.0), 10_000.0);

        assert_eq!(plan.gate_state, GateState::Run);
        assert!(plan.kill_replace);
        assert_eq!(plan.grid_orders.len(), 6);
        let buys = plan
            .grid_orders
            .iter()
            .filter(|o| o.side == crate::Side::Buy)
            .count();
        assert_eq!(buys, 3);
        for order in &plan.grid_orders {
            match order.side {
                crate::Side::Buy => assert!(order.price < plan.ref_price),
                crate::Side::Sell => assert!(order.price > plan.ref_price),
            }
        }
    }

    #[test]
    fn test_stale_bar_is_noop() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        let bar = flat_bar(minute, 103.0);
        let first = engine.on_bar(&bar, 10_000.0);
        let state_before = engine.state();

        let replay = engine.on_bar(&bar, 10_000.0);
        let state_after = engine.state();

        assert_eq!(first.grid_orders.len(), replay.grid_orders.len());
        assert_eq!(first.gate_state, replay.gate_state);
        assert_eq!(
            state_before.last_grid_ref_price,
            state_after.last_grid_ref_price
        );
        assert_eq!(
            state_before.bars_since_dca_fill,
            state_after.bars_since_dca_fill
        );
    }

    #[test]
    fn test_invalid_bar_skipped() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        let state_before = engine.state();

        let bad = Bar::new_unchecked(
            t0() + Duration::minutes(minute),
            100.0,
            f64::NAN,
            99.0,
            100.0,
            10.0,
        );
        engine.on_bar(&bad, 10_000.0);
        let state_after = engine.state();
        assert_eq!(
            state_before.last_grid_ref_price,
            state_after.last_grid_ref_price
        );

        // The timestamp was not consumed; a valid bar at it still processes
        let plan = engine.on_bar(&flat_bar(minute, 103.0), 10_000.0);
        assert_eq!(plan.grid_orders.len(), 6);
    }

    #[test]
    fn test_paused_gate_blocks_all_orders() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        // Daily PnL -4.5%: PAUSED without a hard stop
        let plan = engine.on_bar(&flat_bar(minute, 100.0), 9_550.0);

        assert_eq!(plan.gate_state, GateState::Paused);
        assert!(!plan.sl_action.stop);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_degraded_gate_blocks_grid_only() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        // Daily PnL -2.5%: DEGRADED
        let plan = engine.on_bar(&flat_bar(minute, 100.0), 9_750.0);

        assert_eq!(plan.gate_state, GateState::Degraded);
        assert!(plan.grid_orders.is_empty());
        assert!(!plan.kill_replace);
    }

    #[test]
    fn test_hard_stop_fires_and_latches() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        // Daily PnL -5.1%
        let plan = engine.on_bar(&flat_bar(minute, 100.0), 9_490.0);

        assert!(plan.sl_action.stop);
        assert!(plan
            .sl_action
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("daily PnL"));
        assert!(plan.is_empty());
        assert!(engine.state().hard_stop_active);

        // Equity recovery alone does not lift the stop
        let plan = engine.on_bar(&flat_bar(minute + 1, 100.0), 10_000.0);
        assert!(plan.sl_action.stop);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_hard_stop_survives_day_rollover() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        engine.on_bar(&flat_bar(minute, 100.0), 9_490.0);
        assert!(engine.state().hard_stop_active);

        // Next calendar day: gate inputs reset but the stop holds
        let next_day = Bar::new_unchecked(
            t0() + Duration::days(1),
            100.0,
            100.2,
            99.8,
            100.0,
            1_000.0,
        );
        let plan = engine.on_bar(&next_day, 10_000.0);
        assert!(plan.sl_action.stop);
        assert!(engine.state().hard_stop_active);
    }

    #[test]
    fn test_auto_resume_lifts_stop() {
        let (mut engine, minute) = warmed_engine(Policy::default());
        engine.on_bar(&flat_bar(minute, 100.0), 9_490.0);
        assert!(engine.state().hard_stop_active);

        // Cooldown passes with the price flat; equity held above the
        // trigger so the stop does not re-trip on resume
        for m in 1..=60 {
            let plan = engine.on_bar(&flat_bar(minute + m, 100.0), 9_700.0);
            assert!(plan.sl_action.stop, "stop must hold during cooldown");
        }

        // Recovery bar: price up 2.1% from the stop, RSI pushed high by
        // the jump
        let plan = engine.on_bar(&flat_bar(minute + 61, 102.1), 9_700.0);
        assert!(!plan.sl_action.stop);
        assert!(!engine.state().hard_stop_active);
    }

    #[test]
    fn test_dca_fill_resets_cooldown() {
        let (mut engine, _) = warmed_engine(Policy::default());
        engine.notify_dca_fill(95.0);
        assert_eq!(engine.state().bars_since_dca_fill, Some(0));
        assert_eq!(engine.state().last_dca_fill_price, Some(95.0));
    }
}
