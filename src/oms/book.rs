//! Live-order set with price-level indexing
//!
//! Orders are keyed by id with per-side BTreeMap price levels on top, so
//! lookups by (side, tick-rounded price) and best-level queries are cheap.
//! Prices are rounded to the symbol tick before insertion, which makes the
//! level key the "same price" identity the dedupe invariant needs: no two
//! live orders ever share a (side, price) level.

use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};

use crate::oms::types::{OrderId, OrderReason, PendingOrder};
use crate::{EngineError, Side};

/// The set of live orders for one symbol
#[derive(Debug, Default)]
pub struct LiveBook {
    orders: HashMap<OrderId, PendingOrder>,
    /// Buy levels, ascending price; best bid is the last key
    bids: BTreeMap<OrderedFloat<f64>, OrderId>,
    /// Sell levels, ascending price; best ask is the first key
    asks: BTreeMap<OrderedFloat<f64>, OrderId>,
}

impl LiveBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live order. The price must already be tick-rounded.
    ///
    /// A duplicate id is an invariant breach; a duplicate (side, price)
    /// level should have been rejected by [`LiveBook::occupies_level`]
    /// before calling this and is also a breach.
    pub fn insert(&mut self, order: PendingOrder) -> Result<(), EngineError> {
        if self.orders.contains_key(&order.id) {
            return Err(EngineError::DuplicateOrderId(order.id));
        }
        let level = OrderedFloat(order.price);
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if levels.contains_key(&level) {
            return Err(EngineError::DuplicateOrderLevel {
                side: order.side,
                price: order.price,
            });
        }
        levels.insert(level, order.id);
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Whether a live order already sits at this (side, tick price)
    pub fn occupies_level(&self, side: Side, price: f64) -> bool {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.contains_key(&OrderedFloat(price))
    }

    /// Remove an order from the set. Idempotent.
    pub fn remove(&mut self, id: OrderId) -> Option<PendingOrder> {
        let order = self.orders.remove(&id)?;
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        levels.remove(&OrderedFloat(order.price));
        Some(order)
    }

    pub fn get(&self, id: OrderId) -> Option<&PendingOrder> {
        self.orders.get(&id)
    }

    /// Ids in ascending placement order, for deterministic sweeps
    pub fn ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.orders.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of live grid orders
    pub fn grid_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.reason == OrderReason::Grid)
            .map(|o| o.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Total quantity reserved by live SELL orders
    pub fn committed_sell_qty(&self) -> f64 {
        self.orders
            .values()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.quantity)
            .sum()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|p| p.into_inner())
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
