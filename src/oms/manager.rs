//! Bar-synchronous order lifecycle manager
//!
//! Applies one bar in a fixed order: drain collaborator events, detect
//! fills on the existing order set, run the cancellation sweep, then apply
//! the new plan. Fills must settle against the old grid before a
//! kill-replace wipes it, so plan application always comes last.
//!
//! Quantities are resolved here, against equity, at placement time. An
//! equity-identity check runs after every fill; a violation poisons the
//! manager and it refuses further bars.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::indicators::Snapshot;
use crate::oms::account::Account;
use crate::oms::book::LiveBook;
use crate::oms::types::{
    next_order_id, ExchangeEvent, OrderFill, OrderReason, OrderStatus, PendingOrder,
};
use crate::planner::{OrderIntent, Plan};
use crate::{Bar, EngineError, Policy, Side, Symbol};

/// Tolerance for the post-fill equity identity
const EQUITY_EPSILON: f64 = 1e-6;

/// Quantity below this is treated as nothing to trade
const DUST_QTY: f64 = 1e-12;

/// Execution-boundary settings for one symbol
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub tick_size: f64,
    pub min_notional: f64,
    pub order_equity_fraction: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            min_notional: 11.0,
            order_equity_fraction: 0.01,
        }
    }
}

impl ManagerConfig {
    pub fn from_execution(exec: &ExecutionConfig, symbol: &str) -> Self {
        Self {
            tick_size: exec.tick_size(symbol),
            min_notional: exec.min_notional,
            order_equity_fraction: exec.order_equity_fraction,
        }
    }
}

/// An intent the manager declined to place, with the reason
#[derive(Debug, Clone)]
pub struct SkippedIntent {
    pub intent: OrderIntent,
    pub note: String,
}

/// Everything that happened while applying one bar
#[derive(Debug, Default)]
pub struct BarOutcome {
    pub fills: Vec<OrderFill>,
    pub cancellations: Vec<(PendingOrder, String)>,
    pub rejections: Vec<(PendingOrder, String)>,
    pub placed: Vec<PendingOrder>,
    pub skipped: Vec<SkippedIntent>,
}

/// Owns the live orders, the cash/position ledger, and the collaborator
/// event queue for one symbol
pub struct OrderManager {
    symbol: Symbol,
    policy: Policy,
    config: ManagerConfig,
    book: LiveBook,
    account: Account,
    events: VecDeque<ExchangeEvent>,
    fills_ledger: Vec<OrderFill>,
    last_timestamp: Option<DateTime<Utc>>,
    poisoned: bool,
}

impl OrderManager {
    pub fn new(symbol: Symbol, policy: Policy, config: ManagerConfig, initial_cash: f64) -> Self {
        Self {
            symbol,
            policy,
            config,
            book: LiveBook::new(),
            account: Account::new(initial_cash),
            events: VecDeque::new(),
            fills_ledger: Vec::new(),
            last_timestamp: None,
            poisoned: false,
        }
    }

    /// Queue a collaborator event for the next bar
    pub fn push_event(&mut self, event: ExchangeEvent) {
        self.events.push_back(event);
    }

    /// Apply one bar: events, fills, cancellations, then the plan
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        snapshot: Option<&Snapshot>,
        plan: &Plan,
    ) -> Result<BarOutcome, EngineError> {
        if self.poisoned {
            return Err(EngineError::Poisoned);
        }

        // Bars never reorder across a bar boundary; a replayed or older
        // bar is dropped so the second application is a no-op
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                debug!(timestamp = %bar.timestamp, "Dropping stale bar");
                return Ok(BarOutcome::default());
            }
        }
        self.last_timestamp = Some(bar.timestamp);

        let mut outcome = BarOutcome::default();
        self.drain_events(&mut outcome);
        self.detect_fills(bar, &mut outcome)?;
        self.cancellation_sweep(bar, snapshot, &mut outcome);
        self.apply_plan(bar, snapshot, plan, &mut outcome)?;
        Ok(outcome)
    }

    fn drain_events(&mut self, outcome: &mut BarOutcome) {
        while let Some(event) = self.events.pop_front() {
            match event {
                ExchangeEvent::PlacementAcked { order_id } => {
                    debug!(order_id, "Placement acknowledged");
                }
                ExchangeEvent::Rejected { order_id, reason } => {
                    if let Some(mut order) = self.book.remove(order_id) {
                        warn!(order_id, %reason, "Order rejected by exchange");
                        order.status = OrderStatus::Rejected;
                        outcome.rejections.push((order, reason));
                    }
                }
                // Idempotent: confirming a cancel for an order that is
                // already gone is a no-op
                ExchangeEvent::CancelConfirmed { order_id } => {
                    if let Some(mut order) = self.book.remove(order_id) {
                        order.status = OrderStatus::Cancelled;
                        outcome
                            .cancellations
                            .push((order, "exchange cancel confirmed".to_string()));
                    }
                }
            }
        }
    }

    fn detect_fills(&mut self, bar: &Bar, outcome: &mut BarOutcome) -> Result<(), EngineError> {
        for id in self.book.ids() {
            let filled = match self.book.get(id) {
                Some(order) => match order.side {
                    Side::Buy => bar.low <= order.price,
                    Side::Sell => bar.high >= order.price,
                },
                None => false,
            };
            if !filled {
                continue;
            }

            let mut order = match self.book.remove(id) {
                Some(o) => o,
                None => continue,
            };

            let fill_price = order.price;
            let fill_qty = match order.side {
                Side::Buy => order.quantity,
                // Inventory may have shrunk since placement
                Side::Sell => order.quantity.min(self.account.position_qty()),
            };
            if fill_qty <= DUST_QTY {
                order.status = OrderStatus::Cancelled;
                outcome
                    .cancellations
                    .push((order, "no inventory at fill".to_string()));
                continue;
            }

            let notional = fill_price * fill_qty;
            let (fee, fee_asset) = self.fee_for(notional);

            // Equity marked at the fill price must drop by exactly the fee
            let equity_before = self.account.equity(fill_price);
            let realized = match order.side {
                Side::Buy => {
                    self.account.apply_buy(fill_price, fill_qty, fee);
                    None
                }
                Side::Sell => Some(self.account.apply_sell(fill_price, fill_qty, fee)),
            };
            let equity_after = self.account.equity(fill_price);
            let expected = equity_before - fee;
            if (equity_after - expected).abs() > EQUITY_EPSILON {
                self.poisoned = true;
                return Err(EngineError::EquityMismatch {
                    ledger: equity_after,
                    expected,
                });
            }

            info!(
                order_id = order.id,
                side = %order.side,
                price = fill_price,
                qty = fill_qty,
                fee,
                tag = %order.tag,
                "Order filled"
            );

            let fill = OrderFill {
                order_id: order.id,
                symbol: self.symbol.clone(),
                side: order.side,
                reason: order.reason,
                tag: order.tag.clone(),
                fill_price,
                fill_qty,
                fee,
                fee_asset: fee_asset.to_string(),
                realized_pnl: realized,
                cumulative_pnl: self.account.cumulative_pnl(),
                timestamp: bar.timestamp,
            };
            self.fills_ledger.push(fill.clone());
            outcome.fills.push(fill);
        }
        Ok(())
    }

    fn cancellation_sweep(
        &mut self,
        bar: &Bar,
        snapshot: Option<&Snapshot>,
        outcome: &mut BarOutcome,
    ) {
        let current_rsi = snapshot.and_then(|s| s.rsi);

        // Spike condition is per bar, not per order; when it holds the
        // whole grid goes together
        let volatility_spike = self.policy.order_cancel_on_volatility_spike
            && snapshot
                .and_then(|s| Some((s.atr_pct?, s.prev_atr_pct?)))
                .map(|(atr_pct, prev)| {
                    atr_pct >= prev * self.policy.order_volatility_spike_threshold
                })
                .unwrap_or(false);

        for id in self.book.ids() {
            let order = match self.book.get(id) {
                Some(o) => o,
                None => continue,
            };

            let age_seconds = (bar.timestamp - order.placed_at).num_seconds();
            let drift_pct = (bar.close - order.price).abs() / order.price * 100.0;

            let reason = if age_seconds >= self.policy.order_max_age_seconds {
                Some(format!(
                    "order age {}s >= {}s",
                    age_seconds, self.policy.order_max_age_seconds
                ))
            } else if drift_pct >= self.policy.order_price_drift_threshold_pct {
                Some(format!(
                    "price drift {:.2}% >= {:.2}%",
                    drift_pct, self.policy.order_price_drift_threshold_pct
                ))
            } else if volatility_spike && order.reason == OrderReason::Grid {
                Some(format!(
                    "volatility spike: ATR% rose {:.1}x",
                    self.policy.order_volatility_spike_threshold
                ))
            } else if self.policy.order_cancel_on_rsi_reversal {
                self.rsi_reversal_reason(order, current_rsi)
            } else {
                None
            };

            if let Some(reason) = reason {
                self.cancel(id, reason, outcome);
            }
        }
    }

    fn rsi_reversal_reason(&self, order: &PendingOrder, current_rsi: Option<f64>) -> Option<String> {
        let initial = order.initial_rsi?;
        let current = current_rsi?;
        let change = (current - initial).abs();
        if change < self.policy.order_rsi_reversal_threshold {
            return None;
        }
        let reversed = match order.side {
            Side::Buy => initial < 40.0 && current > 60.0,
            Side::Sell => initial > 60.0 && current < 40.0,
        };
        reversed.then(|| format!("RSI reversal: {:.1} -> {:.1}", initial, current))
    }

    fn cancel(&mut self, id: u64, reason: String, outcome: &mut BarOutcome) {
        if let Some(mut order) = self.book.remove(id) {
            info!(
                order_id = order.id,
                side = %order.side,
                price = order.price,
                tag = %order.tag,
                %reason,
                "Order cancelled"
            );
            order.status = OrderStatus::Cancelled;
            outcome.cancellations.push((order, reason));
        }
    }

    fn apply_plan(
        &mut self,
        bar: &Bar,
        snapshot: Option<&Snapshot>,
        plan: &Plan,
        outcome: &mut BarOutcome,
    ) -> Result<(), EngineError> {
        if plan.sl_action.stop {
            return Ok(());
        }

        // Kill-replace wipes grid orders only; DCA and TP keep their own
        // cooldowns and survive the refresh
        if plan.kill_replace && !plan.grid_orders.is_empty() {
            for id in self.book.grid_ids() {
                self.cancel(id, "kill_replace".to_string(), outcome);
            }
        }

        let equity = self.account.equity(bar.close);
        let initial_rsi = snapshot.and_then(|s| s.rsi);

        let batches = [
            (&plan.grid_orders, OrderReason::Grid),
            (&plan.dca_orders, OrderReason::Dca),
            (&plan.tp_orders, OrderReason::Tp),
        ];
        for (intents, reason) in batches {
            for intent in intents.iter() {
                self.place(bar, intent, reason, equity, initial_rsi, outcome)?;
            }
        }
        Ok(())
    }

    fn place(
        &mut self,
        bar: &Bar,
        intent: &OrderIntent,
        reason: OrderReason,
        equity: f64,
        initial_rsi: Option<f64>,
        outcome: &mut BarOutcome,
    ) -> Result<(), EngineError> {
        let price = self.round_to_tick(intent.price);

        if self.book.occupies_level(intent.side, price) {
            outcome.skipped.push(SkippedIntent {
                intent: intent.clone(),
                note: "duplicate level".to_string(),
            });
            return Ok(());
        }

        let mut quantity = equity * self.config.order_equity_fraction / price;
        if intent.side == Side::Sell {
            // Sells are inventory-backed: never commit more than the
            // position not already reserved by other live sells
            let available = self.account.position_qty() - self.book.committed_sell_qty();
            quantity = quantity.min(available);
            if quantity <= DUST_QTY {
                debug!(tag = %intent.tag, "Skipping sell intent: no inventory");
                outcome.skipped.push(SkippedIntent {
                    intent: intent.clone(),
                    note: "no inventory".to_string(),
                });
                return Ok(());
            }
        }

        let value = quantity * price;
        if value < self.config.min_notional {
            debug!(
                tag = %intent.tag,
                value,
                min = self.config.min_notional,
                "Skipping intent: too small"
            );
            outcome.skipped.push(SkippedIntent {
                intent: intent.clone(),
                note: "too small".to_string(),
            });
            return Ok(());
        }

        let order = PendingOrder {
            id: next_order_id(),
            symbol: self.symbol.clone(),
            side: intent.side,
            price,
            quantity,
            value,
            placed_at: bar.timestamp,
            initial_rsi,
            reason,
            tag: intent.tag.clone(),
            status: OrderStatus::New,
        };

        debug!(
            order_id = order.id,
            side = %order.side,
            price,
            quantity,
            tag = %order.tag,
            "Order placed"
        );

        if let Err(e) = self.book.insert(order.clone()) {
            self.poisoned = true;
            return Err(e);
        }
        outcome.placed.push(order);
        Ok(())
    }

    fn round_to_tick(&self, price: f64) -> f64 {
        (price / self.config.tick_size).round() * self.config.tick_size
    }

    fn fee_for(&self, notional: f64) -> (f64, &'static str) {
        let base = notional * self.policy.taker_fee_pct / 100.0;
        if self.policy.use_bnb_discount {
            (base * (1.0 - self.policy.bnb_discount_pct / 100.0), "BNB")
        } else {
            (base, "USDT")
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn book(&self) -> &LiveBook {
        &self.book
    }

    pub fn equity(&self, mark_price: f64) -> f64 {
        self.account.equity(mark_price)
    }

    /// Append-only fill history
    pub fn fills_ledger(&self) -> &[OrderFill] {
        &self.fills_ledger
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
