//! Backtest driver
//!
//! Replays historical bars through the engine and the lifecycle manager.
//! Per bar: mark equity, emit the plan, apply it, and feed DCA fills back
//! into the engine's cooldown bookkeeping. Records the equity curve and
//! the per-bar state history, and produces a summary report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::engine::HybridEngine;
use crate::oms::{ManagerConfig, OrderManager, OrderReason};
use crate::planner::Plan;
use crate::report::SessionReporter;
use crate::{Bar, Policy, Side, Symbol};

/// One equity-curve sample
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub price: f64,
}

/// One per-bar state sample
#[derive(Debug, Clone, Serialize)]
pub struct StateRecord {
    pub timestamp: DateTime<Utc>,
    pub gate_state: String,
    pub band: String,
    pub spread_pct: f64,
    pub stop_active: bool,
    pub grid_orders: usize,
    pub dca_orders: usize,
    pub tp_orders: usize,
}

/// Backtest summary
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub bars_processed: usize,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub total_fills: usize,
    pub closing_trades: usize,
    pub winning_trades: usize,
    pub win_rate_pct: f64,
    pub cumulative_pnl: f64,
    pub total_fees: f64,
    pub orders_placed: usize,
    pub orders_cancelled: usize,
    /// Bars spent in each gate state
    pub state_distribution: BTreeMap<String, usize>,
}

/// Drives one symbol's engine and lifecycle manager over a bar series
pub struct HybridBacktester {
    engine: HybridEngine,
    manager: OrderManager,
    reporter: Option<SessionReporter>,
    initial_capital: f64,
    equity_curve: Vec<EquityPoint>,
    state_history: Vec<StateRecord>,
}

impl HybridBacktester {
    pub fn new(
        symbol: Symbol,
        policy: Policy,
        manager_config: ManagerConfig,
        initial_capital: f64,
    ) -> Result<Self> {
        let engine = HybridEngine::new(symbol.clone(), policy.clone())?;
        let manager = OrderManager::new(symbol, policy, manager_config, initial_capital);
        Ok(Self {
            engine,
            manager,
            reporter: None,
            initial_capital,
            equity_curve: Vec::new(),
            state_history: Vec::new(),
        })
    }

    /// Attach a CSV session reporter
    pub fn with_reporter(mut self, reporter: SessionReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Replay the bars and produce the report
    pub fn run(&mut self, bars: &[Bar]) -> Result<BacktestReport> {
        info!(
            symbol = %self.engine.symbol(),
            bars = bars.len(),
            capital = self.initial_capital,
            "Starting backtest"
        );

        let mut total_fills = 0usize;
        let mut closing_trades = 0usize;
        let mut winning_trades = 0usize;
        let mut orders_placed = 0usize;
        let mut orders_cancelled = 0usize;
        let mut state_distribution: BTreeMap<String, usize> = BTreeMap::new();

        for (i, bar) in bars.iter().enumerate() {
            // Equity is marked before the gate sees the bar
            let equity = self.manager.equity(bar.close);
            let plan = self.engine.on_bar(bar, equity);

            let snapshot = self.engine.snapshot().cloned();
            let outcome = self
                .manager
                .on_bar(bar, snapshot.as_ref(), &plan)
                .context("lifecycle manager refused bar")?;

            // DCA fills feed the planner's cooldown and distance gates
            for fill in &outcome.fills {
                if fill.reason == OrderReason::Dca && fill.side == Side::Buy {
                    self.engine.notify_dca_fill(fill.fill_price);
                }
            }

            total_fills += outcome.fills.len();
            orders_placed += outcome.placed.len();
            orders_cancelled += outcome.cancellations.len();
            for fill in &outcome.fills {
                if let Some(pnl) = fill.realized_pnl {
                    closing_trades += 1;
                    if pnl > 0.0 {
                        winning_trades += 1;
                    }
                }
            }

            if let Some(reporter) = self.reporter.as_mut() {
                for order in &outcome.placed {
                    reporter.log_placed(order, bar.timestamp)?;
                }
                for (order, reason) in &outcome.cancellations {
                    reporter.log_cancelled(order, reason, bar.timestamp)?;
                }
                for (order, reason) in &outcome.rejections {
                    reporter.log_rejected(order, reason, bar.timestamp)?;
                }
                for fill in &outcome.fills {
                    reporter.log_fill(fill)?;
                }
            }

            self.record(bar, &plan);
            *state_distribution
                .entry(plan.gate_state.to_string())
                .or_insert(0) += 1;

            if i % 1000 == 0 && i > 0 {
                info!(
                    bar = i,
                    price = bar.close,
                    equity = self.manager.equity(bar.close),
                    state = %plan.gate_state,
                    open_orders = self.manager.book().len(),
                    "Backtest progress"
                );
            }
        }

        let final_price = bars.last().map(|b| b.close).unwrap_or(0.0);
        let final_equity = self.manager.equity(final_price);
        let cumulative_pnl = self.manager.account().cumulative_pnl();
        let total_fees = self.manager.account().fees_paid();

        if let Some(reporter) = self.reporter.take() {
            let summary = reporter.finalize(cumulative_pnl, final_equity)?;
            info!(session = %summary.session_id, "Session summary written");
        }

        if bars.is_empty() {
            warn!("No bars processed");
        }

        let report = BacktestReport {
            symbol: self.engine.symbol().to_string(),
            bars_processed: bars.len(),
            initial_capital: self.initial_capital,
            final_equity,
            total_return_pct: if self.initial_capital > 0.0 {
                (final_equity - self.initial_capital) / self.initial_capital * 100.0
            } else {
                0.0
            },
            total_fills,
            closing_trades,
            winning_trades,
            win_rate_pct: if closing_trades > 0 {
                winning_trades as f64 / closing_trades as f64 * 100.0
            } else {
                0.0
            },
            cumulative_pnl,
            total_fees,
            orders_placed,
            orders_cancelled,
            state_distribution,
        };

        info!(
            final_equity = report.final_equity,
            total_return_pct = report.total_return_pct,
            fills = report.total_fills,
            "Backtest completed"
        );

        Ok(report)
    }

    fn record(&mut self, bar: &Bar, plan: &Plan) {
        self.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: self.manager.equity(bar.close),
            cash: self.manager.account().cash(),
            price: bar.close,
        });
        self.state_history.push(StateRecord {
            timestamp: bar.timestamp,
            gate_state: plan.gate_state.to_string(),
            band: plan.band.to_string(),
            spread_pct: plan.spread_pct,
            stop_active: plan.sl_action.stop,
            grid_orders: plan.grid_orders.len(),
            dca_orders: plan.dca_orders.len(),
            tp_orders: plan.tp_orders.len(),
        });
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn state_history(&self) -> &[StateRecord] {
        &self.state_history
    }

    pub fn manager(&self) -> &OrderManager {
        &self.manager
    }

    pub fn engine(&self) -> &HybridEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn oscillating_bars(count: usize, base: f64, amplitude: f64) -> Vec<Bar> {
        let start = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let phase = (i % 20) as f64 / 20.0 * std::f64::consts::TAU;
                let close = base + amplitude * phase.sin();
                let high = close + amplitude * 0.3;
                let low = close - amplitude * 0.3;
                Bar::new_unchecked(
                    start + Duration::minutes(i as i64),
                    close,
                    high,
                    low,
                    close,
                    1_000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_backtest_runs_and_reports() {
        let mut backtester = HybridBacktester::new(
            Symbol::new("BTCUSDT"),
            Policy::default(),
            ManagerConfig::default(),
            10_000.0,
        )
        .unwrap();

        let bars = oscillating_bars(400, 100.0, 1.5);
        let report = backtester.run(&bars).unwrap();

        assert_eq!(report.bars_processed, 400);
        assert_eq!(backtester.equity_curve().len(), 400);
        assert_eq!(backtester.state_history().len(), 400);
        assert!(report.orders_placed > 0, "oscillation should place orders");
        assert!(report.total_fills > 0, "oscillation should fill orders");
        assert_eq!(
            report.state_distribution.values().sum::<usize>(),
            report.bars_processed
        );
    }

    #[test]
    fn test_equity_identity_holds_throughout() {
        let mut backtester = HybridBacktester::new(
            Symbol::new("BTCUSDT"),
            Policy::default(),
            ManagerConfig::default(),
            10_000.0,
        )
        .unwrap();

        let bars = oscillating_bars(300, 100.0, 1.2);
        backtester.run(&bars).unwrap();

        for point in backtester.equity_curve() {
            assert!(point.equity.is_finite());
            assert!(point.equity > 0.0);
        }
        // The recorded curve ends where the ledger says it should
        let last = backtester.equity_curve().last().unwrap();
        let ledger = backtester.manager().equity(last.price);
        assert!((last.equity - ledger).abs() < 1e-6);
    }
}
