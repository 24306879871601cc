use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::domain::{Price, Quantity, Ticker, Username};

/// One user's holding of one contract.
///
/// `pending_postings` counts in-flight postings naming this position; the
/// position is quiescent iff it is zero. While quiescent, `position` equals
/// `position_checkpoint` plus the replay of the acknowledged journal since
/// `cp_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub username: Username,
    pub ticker: Ticker,
    pub position: Quantity,
    /// The price this position was last marked at. Required for futures.
    pub reference_price: Option<Price>,
    pub pending_postings: i64,
    pub position_checkpoint: Quantity,
    pub cp_timestamp: Option<DateTime<Utc>>,
}

impl Position {
    /// A fresh zeroed row, created lazily on first reference.
    pub fn new(username: Username, ticker: Ticker) -> Self {
        Self {
            username,
            ticker,
            position: Quantity::ZERO,
            reference_price: None,
            pending_postings: 0,
            position_checkpoint: Quantity::ZERO,
            cp_timestamp: None,
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.pending_postings == 0
    }
}
