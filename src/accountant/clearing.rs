use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    accountant::Accountant,
    data::{
        domain::{
            ContractType, Direction, JournalUid, PostingKind, Price, Quantity, Ticker, accounts,
        },
        position::Position,
    },
    error::{ApiError, BursarResult, SystemError},
    posting::{make_posting, make_signed_posting, stamp_entry},
    store::PositionStore,
};

impl<S: PositionStore> Accountant<S> {
    /// Run the clearing protocol for one contract.
    ///
    /// With a `price` this is settlement at expiry: positions are cashed out
    /// and zeroed. Without one it is a mark-to-market: positions are cashed
    /// out against the safe price and roll to a fresh reference price.
    ///
    /// While the ticker is marked as clearing, no new orders and no new
    /// trade postings are accepted for it.
    #[tracing::instrument(skip(self), fields(contract = %ticker, uid = %uid))]
    pub async fn clear_contract(
        &self,
        ticker: &Ticker,
        price: Option<Price>,
        uid: JournalUid,
    ) -> BursarResult<()> {
        if self.is_clearing(ticker) {
            return Err(ApiError::ContractClearing.into());
        }

        let contract = self.contract(ticker).await?;
        if !contract.active {
            return Err(ApiError::ContractNotActive.into());
        }
        if contract.expiration.is_none() {
            return Err(ApiError::NonClearingContract.into());
        }

        let expired = contract.expired(Utc::now());
        let (price, zero_out) = match price {
            Some(price) => {
                if !expired {
                    return Err(ApiError::ContractNotExpired.into());
                }
                (price, true)
            }
            None => {
                // Mark-to-market: clear to the safe price, keep positions.
                if expired {
                    return Err(ApiError::ContractExpired.into());
                }
                let safe = self
                    .safe_price(ticker)
                    .ok_or_else(|| SystemError::NoSafePrice(ticker.to_string()))?;
                (safe, false)
            }
        };

        info!(price = price.0, zero_out, "marking contract as clearing");
        self.clearing_contracts().borrow_mut().insert(ticker.clone());

        let my_users: Vec<_> = self
            .my_users()
            .await?
            .into_iter()
            .map(|u| u.username)
            .collect();

        // Pull every local resting order on the contract out of the book.
        info!("cancelling orders");
        let orders = self
            .store
            .open_orders(None, Some(ticker))
            .await?
            .into_iter()
            .filter(|o| my_users.contains(&o.username))
            .collect();
        self.cancel_many_orders(orders).await?;

        // Wait until every local position on the contract is quiescent.
        loop {
            let pending = self.store.pending_on_contract(ticker, &my_users).await?;
            if pending == 0 {
                break;
            }
            info!(pending, "waiting for posting quiescence");
            tokio::time::sleep(self.config().quiescence_poll()).await;
        }

        let all_positions = self.store.positions_on_contract(ticker).await?;
        let position_count = all_positions.len();
        let my_positions: Vec<_> = all_positions
            .into_iter()
            .filter(|p| my_users.contains(&p.username))
            .collect();

        info!(position_count, local = my_positions.len(), "clearing positions");
        let results = futures::future::join_all(my_positions.into_iter().map(|position| {
            let uid = uid.clone();
            async move {
                let username = position.username.clone();
                let outcome = self
                    .clear_position(position, price, position_count, &uid, zero_out)
                    .await;
                if let Err(e) = &outcome {
                    error!(user = %username, error = %e, "clearing a position failed");
                }
                outcome
            }
        }))
        .await;

        info!("unmarking contract");
        self.clearing_contracts().borrow_mut().remove(ticker);

        results.into_iter().collect::<BursarResult<Vec<_>>>()?;
        Ok(())
    }

    /// Cash out one position at the clearing price.
    ///
    /// `position_count` is the number of position rows on the contract
    /// across all shards; the zero-out legs of every holder share the outer
    /// `uid` and must sum to zero at the ledger.
    pub(crate) async fn clear_position(
        &self,
        position: Position,
        price: Price,
        position_count: usize,
        uid: &JournalUid,
        zero_out: bool,
    ) -> BursarResult<()> {
        let contract = self.contract(&position.ticker).await?;

        // Clear the canonical quantity, not the possibly-drifted row.
        let (quantity, _) = self.canonical_position(&position).await?;
        info!(user = %position.username, contract = %position.ticker, quantity = quantity.0, price = price.0, "clearing position");

        let now = Utc::now();
        match contract.contract_type {
            ContractType::Prediction => {
                let cash_spent = contract.cash_spent(price, quantity)?;
                let note = format!(
                    "Clearing transaction for {} at price: {}",
                    contract.ticker, price.0
                );

                let credit = make_signed_posting(
                    PostingKind::Clearing,
                    &position.username,
                    contract.denominated_ticker(),
                    cash_spent,
                    Direction::Credit,
                    &note,
                    now,
                );
                let debit = make_signed_posting(
                    PostingKind::Clearing,
                    &position.username,
                    &contract.ticker,
                    quantity,
                    Direction::Debit,
                    &note,
                    now,
                );

                let count = (position_count * 2) as u32;
                self.post_or_fail(stamp_entry(vec![credit, debit], uid, count))
                    .await
            }

            ContractType::Futures => {
                let Some(reference_price) = position.reference_price else {
                    warn!(user = %position.username, contract = %position.ticker, "position has no reference price, skipping");
                    return Ok(());
                };

                let cash_spent = contract.cash_spent(price - reference_price, quantity)?;
                let note = format!(
                    "Clearing transaction for {} at price: {} / reference_price: {}",
                    contract.ticker, price.0, reference_price.0
                );

                let credit = make_signed_posting(
                    PostingKind::Clearing,
                    &position.username,
                    contract.denominated_ticker(),
                    cash_spent,
                    Direction::Credit,
                    &note,
                    now,
                );
                let clearing = make_signed_posting(
                    PostingKind::Clearing,
                    &accounts::clearing(&contract.ticker),
                    contract.denominated_ticker(),
                    cash_spent,
                    Direction::Debit,
                    &note,
                    now,
                );
                // A zero-quantity leg on the contract itself, so clients see
                // a transaction and know to refresh the reference price.
                let zero = make_posting(
                    PostingKind::Clearing,
                    &position.username,
                    &contract.ticker,
                    Quantity::ZERO,
                    Direction::Credit,
                    &note,
                    now,
                );

                // The cashflow is its own small journal entry; only the
                // zero-out legs below join the contract-wide entry.
                let small_uid = JournalUid::generate();
                let entry = stamp_entry(vec![credit, clearing, zero], &small_uid, 3);
                let (clearing, local) = (entry[1].clone(), vec![entry[0].clone(), entry[2].clone()]);

                self.services()
                    .peers
                    .remote_post(&clearing.username.clone(), clearing);
                self.post_or_fail(local).await?;

                info!(user = %position.username, price = price.0, "rolling reference price");
                self.store
                    .set_reference_price(&position.username, &position.ticker, price)
                    .await?;

                if zero_out {
                    info!(user = %position.username, "zeroing out position");
                    let debit = make_signed_posting(
                        PostingKind::Clearing,
                        &position.username,
                        contract.payout_ticker(),
                        quantity,
                        Direction::Debit,
                        &note,
                        now,
                    );
                    self.post_or_fail(stamp_entry(vec![debit], uid, position_count as u32))
                        .await?;
                }
                Ok(())
            }

            ContractType::Cash | ContractType::CashPair => Err(ApiError::InvalidContractType.into()),
        }
    }
}
