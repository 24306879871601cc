use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{OrderId, Price, Quantity, Side, Ticker, Username},
        order::Order,
    },
    error::EngineError,
};

/// One price level of an order book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// An order book snapshot as the engine reports it, best levels first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Best bid, or zero on an empty side.
    pub fn best_bid(&self) -> Price {
        self.bids.first().map(|l| l.price).unwrap_or(Price(0))
    }

    /// Best ask, or the maximum representable price on an empty side.
    pub fn best_ask(&self) -> Price {
        self.asks.first().map(|l| l.price).unwrap_or(Price(i64::MAX))
    }

    pub fn half_spread(&self) -> f64 {
        (self.best_ask().0 as f64 - self.best_bid().0 as f64) / 2.0
    }
}

/// The order fields the matching engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOrder {
    pub id: OrderId,
    pub username: Username,
    pub contract: Ticker,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl From<&Order> for EngineOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            username: order.username.clone(),
            contract: order.ticker.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            timestamp: order.timestamp,
        }
    }
}

/// Client seam to the per-contract matching engines, keyed by ticker.
pub trait Engine {
    fn place_order(&self, order: EngineOrder) -> LocalBoxFuture<'_, Result<(), EngineError>>;

    fn cancel_order<'a>(
        &'a self,
        ticker: &'a Ticker,
        id: OrderId,
    ) -> LocalBoxFuture<'a, Result<(), EngineError>>;

    fn order_book<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> LocalBoxFuture<'a, Result<OrderBook, EngineError>>;

    fn safe_price<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> LocalBoxFuture<'a, Result<Price, EngineError>>;
}
