use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::domain::{OrderId, Price, Quantity, Side, Ticker, Username};

/// A resting or historical order row.
///
/// Lifecycle: created, accepted (margin passed), dispatched (engine acked),
/// then filled down and/or cancelled. `quantity_left` only ever decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub username: Username,
    pub ticker: Ticker,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub quantity_left: Quantity,
    pub accepted: bool,
    pub dispatched: bool,
    pub is_cancelled: bool,
    pub timestamp: DateTime<Utc>,
}

impl Order {
    /// Still working in the book: not cancelled and not exhausted.
    pub fn is_open(&self) -> bool {
        !self.is_cancelled && self.quantity_left > Quantity::ZERO
    }
}

/// The fields of an order before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub username: Username,
    pub ticker: Ticker,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}
