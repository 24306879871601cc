use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    accountant::Accountant,
    data::{
        domain::{
            ContractType, Direction, JournalUid, OrderId, PostingKind, Price, Quantity, Side,
            Ticker, Username, accounts,
        },
        trade::Trade,
        user::{NotificationKind, NotificationMethod},
    },
    error::{ApiError, BursarResult, SystemError},
    fees,
    notify::{FillNotice, OrderNotice, TradeNotice},
    posting::{make_posting, make_signed_posting, stamp_entry},
    store::PositionStore,
};

/// One fill as the engine reports it to each side of the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub username: Username,
    pub aggressive: bool,
    pub contract: Ticker,
    pub order: OrderId,
    pub other_order: OrderId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
    /// Assigned by the engine; shared by both sides of the match so the
    /// ledger can join their postings into one entry.
    pub uid: JournalUid,
}

impl<S: PositionStore> Accountant<S> {
    /// Convert an engine fill into journal postings plus fees, and book it.
    #[tracing::instrument(skip(self, fill), fields(user = %username, contract = %fill.contract, uid = %fill.uid))]
    pub async fn post_transaction(&self, username: &Username, fill: FillEvent) -> BursarResult<()> {
        info!(
            order = fill.order.0,
            side = %fill.side,
            price = fill.price.0,
            quantity = fill.quantity.0,
            aggressive = fill.aggressive,
            "processing fill"
        );

        if username != &fill.username {
            return Err(
                SystemError::Protocol("username does not match transaction".to_string()).into(),
            );
        }

        if self.is_clearing(&fill.contract) {
            return Err(ApiError::ContractClearing.into());
        }

        let contract = self.contract(&fill.contract).await?;
        if !contract.active {
            return Err(ApiError::ContractNotActive.into());
        }

        let user = self.user(username).await?;

        let (denominated_direction, payout_direction) = match fill.side {
            Side::Buy => (Direction::Debit, Direction::Credit),
            Side::Sell => (Direction::Credit, Direction::Debit),
        };
        let note = format!(
            "{} order: {}",
            if fill.aggressive { "Aggressive" } else { "Passive" },
            fill.order.0
        );

        let denominated_ticker = contract.denominated_ticker().clone();
        let payout_ticker = contract.payout_ticker().clone();

        // Futures cashflows are relative to the position's reference price,
        // which is pinned to the fill price on first touch.
        let cash_spent = if contract.contract_type == ContractType::Futures {
            let position = self
                .store
                .get_or_create_position(username, &fill.contract, Some(fill.price))
                .await?;
            let reference = position.reference_price.unwrap_or(fill.price);
            contract.cash_spent(fill.price - reference, fill.quantity)?
        } else {
            contract.cash_spent(fill.price, fill.quantity)?
        };

        let mut my_postings = vec![
            make_signed_posting(
                PostingKind::Trade,
                username,
                &denominated_ticker,
                cash_spent,
                denominated_direction,
                &note,
                fill.timestamp,
            ),
            make_posting(
                PostingKind::Trade,
                username,
                &payout_ticker,
                fill.quantity,
                payout_direction,
                &note,
                fill.timestamp,
            ),
        ];

        let mut remote_postings = Vec::new();
        if contract.contract_type == ContractType::Futures {
            // The counterparty may carry a different reference price, so
            // their cashflow differs from ours; settle ours against the
            // contract's clearing account instead of against them.
            remote_postings.push(make_signed_posting(
                PostingKind::Trade,
                &accounts::clearing(&contract.ticker),
                &denominated_ticker,
                cash_spent,
                payout_direction,
                &note,
                fill.timestamp,
            ));
        }

        let trade_fees = fees::trade_fees(
            &contract,
            &user,
            cash_spent,
            fill.aggressive,
            self.config().trial_period,
        );
        let split = fees::split_fees(
            &trade_fees,
            &user,
            &self.config().vendor_shares,
            PostingKind::Trade,
            fill.timestamp,
        );
        my_postings.extend(split.user_postings);
        remote_postings.extend(split.vendor_postings);
        remote_postings.extend(split.remainder_postings);

        // The mirror shard of the match contributes the symmetric half of
        // this entry under the same uid, so the ledger expects double our
        // local total.
        let count = 2 * (my_postings.len() + remote_postings.len()) as u32;
        let my_postings = stamp_entry(my_postings, &fill.uid, count);
        let remote_postings = stamp_entry(remote_postings, &fill.uid, count);

        self.fan_out(&remote_postings);

        if fill.aggressive {
            let trade = Trade {
                aggressive_order: fill.order,
                passive_order: fill.other_order,
                ticker: fill.contract.clone(),
                price: fill.price,
                quantity: fill.quantity,
                posted: false,
                timestamp: fill.timestamp,
            };
            self.store.insert_trade(trade).await?;
            debug!(
                aggressive = fill.order.0,
                passive = fill.other_order.0,
                "trade saved with posted = false"
            );
        }

        self.post_or_fail(my_postings).await?;

        // The ledger acknowledged: fill down the order and fan out the
        // notifications.
        let order = self
            .store
            .reduce_order_quantity(fill.order, fill.quantity)
            .await?;
        self.services()
            .webserver
            .order(username, OrderNotice::from(&order));

        let fill_notice = FillNotice {
            contract: fill.contract.clone(),
            id: fill.order,
            quantity: fill.quantity,
            price: fill.price,
            side: fill.side,
            timestamp: fill.timestamp,
            fees: trade_fees,
        };
        self.services().webserver.fill(username, fill_notice.clone());

        if user.wants(NotificationKind::Fill, NotificationMethod::Email) {
            let (subject, body) = crate::notify::fill_mail(&user, &fill_notice);
            self.services()
                .mailer
                .send_mail(&body, &user.mail_to(), &subject);
        }

        if fill.aggressive {
            self.store
                .mark_trade_posted(fill.order, fill.other_order)
                .await?;
            self.services().webserver.trade(
                &fill.contract,
                TradeNotice {
                    contract: fill.contract.clone(),
                    price: fill.price,
                    quantity: fill.quantity,
                    timestamp: fill.timestamp,
                },
            );
        }

        Ok(())
    }
}
