use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;

use crate::{
    data::domain::{Quantity, Ticker, Username},
    error::LedgerFault,
    posting::Posting,
};

/// Client seam to the external double-entry ledger.
///
/// The gateway ships complete batches and classifies replies; it never
/// retries. The accountant's posting protocol owns all state around a call.
pub trait LedgerGateway {
    /// Submit all postings of one `uid` as a single batch. Resolves once the
    /// ledger acknowledges or rejects the batch.
    fn post(&self, postings: Vec<Posting>) -> LocalBoxFuture<'_, Result<(), LedgerFault>>;

    /// Replay the acknowledged journal for `(username, ticker)` strictly
    /// after `since` (from the beginning when `None`) and return the signed
    /// position delta. Reconciliation derives the canonical position as
    /// `checkpoint + replay(since checkpoint timestamp)`.
    fn position_since<'a>(
        &'a self,
        username: &'a Username,
        ticker: &'a Ticker,
        since: Option<DateTime<Utc>>,
    ) -> LocalBoxFuture<'a, Result<Quantity, LedgerFault>>;
}
