//! Cash and position accounting
//!
//! Long-only single-symbol ledger: cash, position quantity at a weighted
//! average entry, cumulative realized PnL, and fee totals. Buys and sells
//! update cash and inventory atomically; equity is always
//! cash + quantity x mark price.

use serde::{Deserialize, Serialize};

/// Position below this quantity is treated as flat
const DUST_QTY: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    cash: f64,
    position_qty: f64,
    avg_entry_price: f64,
    cumulative_pnl: f64,
    fees_paid: f64,
}

impl Account {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            position_qty: 0.0,
            avg_entry_price: 0.0,
            cumulative_pnl: 0.0,
            fees_paid: 0.0,
        }
    }

    /// Settle a buy fill: cash down by notional plus fee, inventory up at
    /// a weighted average entry.
    pub fn apply_buy(&mut self, price: f64, qty: f64, fee: f64) {
        let notional = price * qty;
        self.cash -= notional + fee;
        self.fees_paid += fee;

        let total_qty = self.position_qty + qty;
        if total_qty > DUST_QTY {
            self.avg_entry_price =
                (self.avg_entry_price * self.position_qty + notional) / total_qty;
        }
        self.position_qty = total_qty;
    }

    /// Settle a sell fill against inventory: cash up by notional minus fee.
    /// Returns the realized PnL (gross minus the exit fee) for the closed
    /// quantity.
    pub fn apply_sell(&mut self, price: f64, qty: f64, fee: f64) -> f64 {
        let notional = price * qty;
        self.cash += notional - fee;
        self.fees_paid += fee;

        let realized = qty * (price - self.avg_entry_price) - fee;
        self.cumulative_pnl += realized;

        self.position_qty -= qty;
        if self.position_qty <= DUST_QTY {
            self.position_qty = 0.0;
            self.avg_entry_price = 0.0;
        }
        realized
    }

    /// Equity at a mark price
    pub fn equity(&self, mark_price: f64) -> f64 {
        self.cash + self.position_qty * mark_price
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position_qty(&self) -> f64 {
        self.position_qty
    }

    pub fn avg_entry_price(&self) -> f64 {
        self.avg_entry_price
    }

    pub fn cumulative_pnl(&self) -> f64 {
        self.cumulative_pnl
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        (mark_price - self.avg_entry_price) * self.position_qty
    }
}
