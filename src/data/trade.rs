use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::domain::{OrderId, Price, Quantity, Ticker};

/// One fill, persisted by the shard owning the aggressive side.
///
/// `posted` flips once the trade's journal entry has been acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub aggressive_order: OrderId,
    pub passive_order: OrderId,
    pub ticker: Ticker,
    pub price: Price,
    pub quantity: Quantity,
    pub posted: bool,
    pub timestamp: DateTime<Utc>,
}
