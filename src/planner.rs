//! Order planner
//!
//! Builds the per-bar trading plan: a symmetric grid ladder around the
//! reference price, an opportunistic DCA buy on oversold conditions, and a
//! TP sell suggestion on overbought conditions. The planner owns the grid
//! and DCA cooldown bookkeeping; it emits intents only, and quantities are
//! resolved by the lifecycle manager against equity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::indicators::Snapshot;
use crate::{Band, GateState, Policy, Side};

/// A priced order intent. No quantity; the execution side sizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: Side,
    pub price: f64,
    pub tag: String,
}

/// Stop-loss action carried by every plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlAction {
    pub stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SlAction {
    pub fn none() -> Self {
        Self {
            stop: false,
            reason: None,
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            stop: true,
            reason: Some(reason.into()),
        }
    }
}

/// The complete per-bar trading plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub gate_state: GateState,
    pub sl_action: SlAction,
    pub grid_orders: Vec<OrderIntent>,
    pub dca_orders: Vec<OrderIntent>,
    pub tp_orders: Vec<OrderIntent>,
    pub band: Band,
    pub spread_pct: f64,
    pub ref_price: f64,
    pub kill_replace: bool,
}

impl Plan {
    /// A plan with no orders
    pub fn inert(gate_state: GateState, ref_price: f64, spread_pct: f64, band: Band) -> Self {
        Self {
            gate_state,
            sl_action: SlAction::none(),
            grid_orders: Vec::new(),
            dca_orders: Vec::new(),
            tp_orders: Vec::new(),
            band,
            spread_pct,
            ref_price,
            kill_replace: false,
        }
    }

    /// True when no order kind carries any intent
    pub fn is_empty(&self) -> bool {
        self.grid_orders.is_empty() && self.dca_orders.is_empty() && self.tp_orders.is_empty()
    }
}

/// Grid and DCA bookkeeping plus the planning rules. One per engine.
#[derive(Debug, Default)]
pub struct OrderPlanner {
    last_grid_ref_price: Option<f64>,
    last_grid_at: Option<DateTime<Utc>>,
    last_dca_emit_at: Option<DateTime<Utc>>,
    /// Bars elapsed since the last DCA fill; None until the first fill
    bars_since_dca_fill: Option<u64>,
    last_dca_fill_price: Option<f64>,
}

impl OrderPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance per-bar counters. Called once per accepted bar, before
    /// planning.
    pub fn tick(&mut self) {
        if let Some(bars) = self.bars_since_dca_fill.as_mut() {
            *bars += 1;
        }
    }

    /// Record a DCA fill reported by the lifecycle manager. Restarts the
    /// bar cooldown and anchors the minimum-distance gate.
    pub fn notify_dca_fill(&mut self, fill_price: f64) {
        self.bars_since_dca_fill = Some(0);
        self.last_dca_fill_price = Some(fill_price);
        info!(fill_price, "DCA fill recorded");
    }

    /// Plan the grid ladder. Returns the intents and the kill-replace flag;
    /// both are empty/false when the refresh conditions do not hold.
    pub fn plan_grid(
        &mut self,
        policy: &Policy,
        ref_price: f64,
        spread_pct: f64,
        now: DateTime<Utc>,
    ) -> (Vec<OrderIntent>, bool) {
        if !policy.grid_enabled {
            return (Vec::new(), false);
        }

        if let Some(last_at) = self.last_grid_at {
            let elapsed = (now - last_at).num_seconds();
            if elapsed < policy.grid_min_seconds_between {
                debug!(
                    elapsed,
                    min = policy.grid_min_seconds_between,
                    "Grid refresh interval not elapsed"
                );
                return (Vec::new(), false);
            }
        }

        if let Some(last_ref) = self.last_grid_ref_price {
            let drift_pct = (ref_price - last_ref).abs() / last_ref * 100.0;
            if drift_pct < policy.grid_kill_replace_threshold_pct {
                debug!(
                    drift_pct,
                    threshold = policy.grid_kill_replace_threshold_pct,
                    "Grid drift below kill-replace threshold"
                );
                return (Vec::new(), false);
            }
            info!(
                drift_pct,
                threshold = policy.grid_kill_replace_threshold_pct,
                "Grid kill-replace triggered"
            );
        }

        let mut orders = Vec::with_capacity(policy.grid_levels_per_side * 2);
        for k in 1..=policy.grid_levels_per_side {
            let offset = spread_pct / 100.0 * k as f64;
            orders.push(OrderIntent {
                side: Side::Buy,
                price: ref_price * (1.0 - offset),
                tag: format!("grid_buy_{}", k),
            });
            orders.push(OrderIntent {
                side: Side::Sell,
                price: ref_price * (1.0 + offset),
                tag: format!("grid_sell_{}", k),
            });
        }

        self.last_grid_ref_price = Some(ref_price);
        self.last_grid_at = Some(now);

        debug!(
            levels = policy.grid_levels_per_side,
            spread_pct, ref_price, "Grid planned"
        );

        (orders, true)
    }

    /// Plan a DCA buy. Four gates: oversold RSI, optional price-below-EMA,
    /// bar cooldown since the last DCA fill, and minimum distance from the
    /// last fill price. At most one intent per bar.
    pub fn plan_dca(
        &mut self,
        policy: &Policy,
        snapshot: &Snapshot,
        ref_price: f64,
        now: DateTime<Utc>,
    ) -> Vec<OrderIntent> {
        if !policy.dca_enabled {
            return Vec::new();
        }

        let rsi = match snapshot.rsi {
            Some(r) => r,
            None => return Vec::new(),
        };
        if rsi >= policy.dca_rsi_threshold {
            return Vec::new();
        }

        if policy.dca_use_ema_gate {
            match snapshot.ema_fast {
                Some(ema_fast) if ref_price < ema_fast => {}
                _ => return Vec::new(),
            }
        }

        if let Some(bars) = self.bars_since_dca_fill {
            if bars < policy.dca_cooldown_bars {
                debug!(bars, cooldown = policy.dca_cooldown_bars, "DCA cooldown active");
                return Vec::new();
            }
        }

        if let Some(last_fill) = self.last_dca_fill_price {
            let distance_pct = (ref_price - last_fill).abs() / last_fill * 100.0;
            if distance_pct < policy.dca_min_distance_from_last_fill_pct {
                debug!(
                    distance_pct,
                    min = policy.dca_min_distance_from_last_fill_pct,
                    "DCA too close to last fill"
                );
                return Vec::new();
            }
        }

        // One intent per bar: a replayed planning pass within the same bar
        // timestamp emits nothing
        if self.last_dca_emit_at == Some(now) {
            return Vec::new();
        }
        self.last_dca_emit_at = Some(now);

        let price = ref_price * (1.0 - policy.dca_price_offset_pct / 100.0);
        info!(rsi, price, "DCA triggered");

        vec![OrderIntent {
            side: Side::Buy,
            price,
            tag: format!("dca_rsi{:.0}", rsi),
        }]
    }

    /// Plan a TP sell suggestion on overbought conditions
    pub fn plan_tp(
        &self,
        policy: &Policy,
        snapshot: &Snapshot,
        ref_price: f64,
        band: Band,
        tp_spread_pct: f64,
    ) -> Vec<OrderIntent> {
        if !policy.tp_enabled {
            return Vec::new();
        }

        let rsi = match snapshot.rsi {
            Some(r) => r,
            None => return Vec::new(),
        };
        if rsi <= policy.tp_rsi_threshold {
            return Vec::new();
        }

        match snapshot.ema_fast {
            Some(ema_fast) if ref_price > ema_fast => {}
            _ => return Vec::new(),
        }

        let price = ref_price * (1.0 + tp_spread_pct / 100.0);
        info!(rsi, %band, price, "TP triggered");

        vec![OrderIntent {
            side: Side::Sell,
            price,
            tag: format!("tp_rsi{:.0}_band{}", rsi, band),
        }]
    }

    /// Bars since the last DCA fill, if one has happened
    pub fn bars_since_dca_fill(&self) -> Option<u64> {
        self.bars_since_dca_fill
    }

    pub fn last_grid_ref_price(&self) -> Option<f64> {
        self.last_grid_ref_price
    }

    pub fn last_dca_fill_price(&self) -> Option<f64> {
        self.last_dca_fill_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn snapshot(rsi: f64, ema_fast: f64) -> Snapshot {
        Snapshot {
            close: 0.0,
            rsi: Some(rsi),
            atr: Some(1.0),
            atr_pct: Some(1.2),
            ema_fast: Some(ema_fast),
            ema_mid: Some(ema_fast),
            ema_slow: Some(ema_fast),
            bb_upper: None,
            bb_lower: None,
            prev_atr_pct: Some(1.2),
        }
    }

    #[test]
    fn test_initial_grid_ladder() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();

        let (orders, kill_replace) = planner.plan_grid(&policy, 100.0, 0.5, t0());
        assert!(kill_replace);
        assert_eq!(orders.len(), 6);

        let buys: Vec<f64> = orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .collect();
        let sells: Vec<f64> = orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .collect();

        assert_eq!(buys.len(), 3);
        assert_eq!(sells.len(), 3);
        for (price, expected) in buys.iter().zip([99.5, 99.0, 98.5]) {
            assert!((price - expected).abs() < 1e-9, "buy {} != {}", price, expected);
        }
        for (price, expected) in sells.iter().zip([100.5, 101.0, 101.5]) {
            assert!((price - expected).abs() < 1e-9, "sell {} != {}", price, expected);
        }

        let tags: Vec<&str> = orders.iter().map(|o| o.tag.as_str()).collect();
        assert!(tags.contains(&"grid_buy_1"));
        assert!(tags.contains(&"grid_sell_3"));
    }

    #[test]
    fn test_grid_min_interval() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.plan_grid(&policy, 100.0, 0.5, t0());

        // Large drift but interval not elapsed: nothing
        let (orders, kr) = planner.plan_grid(&policy, 105.0, 0.5, t0() + Duration::seconds(120));
        assert!(orders.is_empty());
        assert!(!kr);

        // Interval elapsed and drift above threshold: refresh
        let (orders, kr) = planner.plan_grid(&policy, 105.0, 0.5, t0() + Duration::seconds(300));
        assert_eq!(orders.len(), 6);
        assert!(kr);
    }

    #[test]
    fn test_grid_requires_drift() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.plan_grid(&policy, 100.0, 0.5, t0());

        // Interval elapsed but drift below 1%
        let (orders, kr) = planner.plan_grid(&policy, 100.5, 0.5, t0() + Duration::seconds(600));
        assert!(orders.is_empty());
        assert!(!kr);
        assert_eq!(planner.last_grid_ref_price(), Some(100.0));
    }

    #[test]
    fn test_grid_disabled() {
        let policy = Policy {
            grid_enabled: false,
            ..Policy::default()
        };
        let mut planner = OrderPlanner::new();
        let (orders, kr) = planner.plan_grid(&policy, 100.0, 0.5, t0());
        assert!(orders.is_empty());
        assert!(!kr);
    }

    #[test]
    fn test_dca_trigger_price_and_tag() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();

        let orders = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 95.0, t0());
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.side, Side::Buy);
        assert!((order.price - 94.905).abs() < 1e-9);
        assert_eq!(order.tag, "dca_rsi30");
    }

    #[test]
    fn test_dca_rsi_gate() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let orders = planner.plan_dca(&policy, &snapshot(35.0, 96.0), 95.0, t0());
        assert!(orders.is_empty());
    }

    #[test]
    fn test_dca_ema_gate() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        // Price above fast EMA: suppressed
        let orders = planner.plan_dca(&policy, &snapshot(30.0, 94.0), 95.0, t0());
        assert!(orders.is_empty());

        // Gate disabled: emitted
        let policy = Policy {
            dca_use_ema_gate: false,
            ..Policy::default()
        };
        let orders = planner.plan_dca(&policy, &snapshot(30.0, 94.0), 95.0, t0());
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn test_dca_cooldown_counts_bars_since_fill() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();

        planner.notify_dca_fill(95.0);
        for bar in 0..5 {
            planner.tick();
            let now = t0() + Duration::minutes(bar + 1);
            let orders = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 93.0, now);
            if bar < 4 {
                assert!(orders.is_empty(), "cooldown must hold at bar {}", bar);
            } else {
                assert_eq!(orders.len(), 1, "cooldown elapsed at bar {}", bar);
            }
        }
    }

    #[test]
    fn test_dca_min_distance_from_last_fill() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        planner.notify_dca_fill(95.0);
        for _ in 0..10 {
            planner.tick();
        }

        // 0.5% away: too close
        let orders = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 95.475, t0());
        assert!(orders.is_empty());

        // 2% away: allowed
        let orders = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 93.1, t0());
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn test_dca_single_intent_per_bar() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();

        let first = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 95.0, t0());
        assert_eq!(first.len(), 1);
        let replay = planner.plan_dca(&policy, &snapshot(30.0, 96.0), 95.0, t0());
        assert!(replay.is_empty());
    }

    #[test]
    fn test_dca_requires_rsi() {
        let policy = Policy::default();
        let mut planner = OrderPlanner::new();
        let mut snap = snapshot(30.0, 96.0);
        snap.rsi = None;
        let orders = planner.plan_dca(&policy, &snap, 95.0, t0());
        assert!(orders.is_empty());
    }

    #[test]
    fn test_tp_trigger() {
        let policy = Policy::default();
        let planner = OrderPlanner::new();

        let orders = planner.plan_tp(&policy, &snapshot(72.0, 104.0), 105.0, Band::Mid, 0.8);
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.side, Side::Sell);
        assert!((order.price - 105.0 * 1.008).abs() < 1e-9);
        assert_eq!(order.tag, "tp_rsi72_bandmid");
    }

    #[test]
    fn test_tp_gates() {
        let policy = Policy::default();
        let planner = OrderPlanner::new();

        // RSI at the threshold does not trigger
        assert!(planner
            .plan_tp(&policy, &snapshot(65.0, 104.0), 105.0, Band::Mid, 0.8)
            .is_empty());

        // Price below fast EMA does not trigger
        assert!(planner
            .plan_tp(&policy, &snapshot(72.0, 106.0), 105.0, Band::Mid, 0.8)
            .is_empty());
    }

    #[test]
    fn test_plan_is_empty() {
        let plan = Plan::inert(GateState::Run, 100.0, 0.5, Band::Mid);
        assert!(plan.is_empty());
        assert!(!plan.sl_action.stop);
    }
}
