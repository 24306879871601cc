use chrono::Utc;
use tracing::{debug, error, info};

use crate::{
    accountant::Accountant,
    data::domain::{
        Direction, JournalUid, PostingKind, Quantity, Ticker, Username, accounts,
    },
    error::{BursarResult, LedgerFault, SystemError},
    notify::TransactionNotice,
    posting::{Posting, make_posting, make_signed_posting, stamp_entry},
    store::PositionStore,
};

impl<S: PositionStore> Accountant<S> {
    /// The single gate through which any position is ever mutated.
    ///
    /// Protocol: reserve a pending posting on every named position, submit
    /// the journal entry, release the reservation on any outcome, and only
    /// on acknowledgement apply the position deltas and notify. A failed
    /// ledger call leaves every position exactly as it was.
    #[tracing::instrument(skip_all, fields(postings = postings.len(), uid = %postings.first().map(|p| p.uid.to_string()).unwrap_or_default()))]
    pub async fn post_or_fail(&self, postings: Vec<Posting>) -> BursarResult<()> {
        if postings.is_empty() {
            return Ok(());
        }

        let keys: Vec<(Username, Ticker)> = postings
            .iter()
            .map(|p| (p.username.clone(), p.contract.clone()))
            .collect();

        // Positions may be referenced here for the first time.
        for (username, ticker) in &keys {
            self.store
                .get_or_create_position(username, ticker, None)
                .await?;
        }

        if let Err(e) = self.store.bump_pending(&keys, 1).await {
            error!(error = %e, "could not reserve pending counters");
            self.services()
                .alerts
                .send_alert("Exception in position store. See logs.");
            return Err(e);
        }

        let result = self.services().ledger.post(postings.clone()).await;

        // The reservation is released whatever the ledger said.
        if let Err(e) = self.store.bump_pending(&keys, -1).await {
            error!(error = %e, "could not release pending counters");
            self.services()
                .alerts
                .send_alert("Exception in position store. See logs.");
        }

        match result {
            Ok(()) => {
                debug!("journal entry acknowledged");
                for posting in &postings {
                    let user = self.store.user(&posting.username).await?;
                    let delta = posting.delta_for(user.user_type);
                    debug!(
                        user = %posting.username,
                        contract = %posting.contract,
                        delta = delta.0,
                        "adjusting position"
                    );
                    self.store
                        .apply_delta(&posting.username, &posting.contract, delta)
                        .await?;
                    self.services()
                        .webserver
                        .transaction(&posting.username, TransactionNotice::from(posting));
                }
                Ok(())
            }
            Err(fault) => {
                match &fault {
                    LedgerFault::Rejected(reason) => {
                        error!(reason = %reason, "ledger rejected the entry");
                        self.services()
                            .alerts
                            .send_alert("Exception in ledger. See logs.");
                    }
                    LedgerFault::Timeout(after) => {
                        error!(?after, "ledger call timed out");
                        self.services()
                            .alerts
                            .send_alert("Ledger call timed out. Ledger may be overloaded.");
                    }
                    LedgerFault::Rpc(reason) => {
                        error!(reason = %reason, "improper ledger rpc invocation");
                    }
                }
                Err(fault.into())
            }
        }
    }

    /// Ship remote postings to their owning shards. Best-effort; the ledger
    /// closes the entry once every stamped member arrives.
    pub(crate) fn fan_out(&self, remote: &[Posting]) {
        for posting in remote {
            self.services().peers.remote_post(&posting.username, posting.clone());
        }
    }

    /// Receiving side of the peer seam: book postings some other shard
    /// stamped into a shared journal entry. Errors are logged, never
    /// propagated back to the sender.
    pub async fn remote_post(&self, postings: Vec<Posting>) {
        if let Err(e) = self.post_or_fail(postings).await {
            error!(error = %e, "remote posting failed");
        }
    }

    /// Debug-only direct position adjustment, offset against the
    /// adjustments account.
    pub async fn adjust_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        quantity: Quantity,
        admin_username: &Username,
    ) -> BursarResult<()> {
        if !self.config().debug {
            return Err(SystemError::AdjustmentNotAllowed.into());
        }

        info!(user = %username, contract = %ticker, quantity = quantity.0, admin = %admin_username, "adjusting position");
        let now = Utc::now();
        let note = format!("Adjustment ({admin_username})");
        let adjustments = Username::new(accounts::ADJUSTMENTS);

        let credit = make_signed_posting(
            PostingKind::Transfer,
            username,
            ticker,
            quantity,
            Direction::Credit,
            &note,
            now,
        );
        let debit = make_signed_posting(
            PostingKind::Transfer,
            &adjustments,
            ticker,
            quantity,
            Direction::Debit,
            &note,
            now,
        );

        let uid = JournalUid::generate();
        self.post_or_fail(stamp_entry(vec![credit, debit], &uid, 2)).await
    }

    /// One side of a two-sided transfer; the caller invokes it once per side
    /// with a shared uid and the ledger joins the halves.
    pub async fn transfer_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        direction: Direction,
        quantity: Quantity,
        note: &str,
        uid: &JournalUid,
    ) -> BursarResult<()> {
        info!(user = %username, contract = %ticker, %direction, quantity = quantity.0, "transferring position");
        let draft = make_posting(
            PostingKind::Transfer,
            username,
            ticker,
            quantity,
            direction,
            note,
            Utc::now(),
        );
        self.post_or_fail(stamp_entry(vec![draft], uid, 2)).await
    }
}
