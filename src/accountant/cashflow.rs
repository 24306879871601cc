use std::collections::HashMap;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    accountant::Accountant,
    data::domain::{
        Direction, JournalUid, PostingKind, Quantity, Ticker, Username, accounts,
    },
    error::{ApiError, BursarResult},
    fees,
    margin::Overrides,
    notify,
    posting::{make_posting, make_signed_posting, stamp_entry},
    store::PositionStore,
};

impl<S: PositionStore> Accountant<S> {
    /// Admit a withdrawal against margin, book it into `pendingwithdrawal`,
    /// and hand the net amount to the cashier for on-chain settlement.
    #[tracing::instrument(skip(self), fields(user = %username, contract = %ticker, amount = amount.0))]
    pub async fn request_withdrawal(
        &self,
        username: &Username,
        ticker: &Ticker,
        amount: Quantity,
        address: &str,
    ) -> BursarResult<bool> {
        info!(address, "withdrawal requested");
        let contract = self.contract(ticker).await?;

        if self.config().trial_period {
            error!("withdrawals not permitted during trial period");
            return Err(ApiError::WithdrawNotPermitted.into());
        }

        let user = self.user(username).await?;
        if !user.permissions.withdraw {
            error!("user has no withdraw permission");
            return Err(ApiError::WithdrawNotPermitted.into());
        }

        if amount.0 % contract.lot_size != 0 {
            error!("withdrawal quantity not lot-aligned");
            return Err(ApiError::InvalidCurrencyQuantity.into());
        }

        if !self.is_user_enabled(username) {
            error!("user is disabled");
            return Err(ApiError::DisabledUser.into());
        }

        let overrides = Overrides {
            withdrawals: HashMap::from([(ticker.clone(), amount)]),
            ..Overrides::default()
        };
        let outcome = self.margin_for(username, &overrides).await?;
        if !self.check_margin(username, &outcome).await? {
            info!(
                low_margin = outcome.low_margin.0,
                high_margin = outcome.high_margin.0,
                "insufficient margin for withdrawal"
            );
            return Err(ApiError::InsufficientMargin.into());
        }

        let withdraw_fees = fees::withdraw_fees(&contract, &user, self.config().trial_period);
        let net = amount - withdraw_fees.get(ticker).copied().unwrap_or(Quantity::ZERO);
        if net <= Quantity::ZERO {
            return Err(ApiError::WithdrawalTooSmall.into());
        }

        let now = Utc::now();
        let pending_withdrawal = Username::new(accounts::PENDING_WITHDRAWAL);

        let mut my_postings = vec![make_posting(
            PostingKind::Withdrawal,
            &pending_withdrawal,
            ticker,
            net,
            Direction::Credit,
            address,
            now,
        )];
        let mut remote_postings = vec![make_posting(
            PostingKind::Withdrawal,
            username,
            ticker,
            net,
            Direction::Debit,
            address,
            now,
        )];

        let split = fees::split_fees(
            &withdraw_fees,
            &user,
            &self.config().vendor_shares,
            PostingKind::Withdrawal,
            now,
        );
        my_postings.extend(split.user_postings);
        remote_postings.extend(split.vendor_postings);
        remote_postings.extend(split.remainder_postings);

        let count = (my_postings.len() + remote_postings.len()) as u32;
        let uid = JournalUid::generate();
        let my_postings = stamp_entry(my_postings, &uid, count);
        let remote_postings = stamp_entry(remote_postings, &uid, count);

        self.fan_out(&remote_postings);
        self.post_or_fail(my_postings).await?;

        self.services()
            .cashier
            .request_withdrawal(username, ticker, address, net);
        Ok(true)
    }

    /// Book cash that arrived at a deposit address, enforcing the deposit
    /// limit by spilling any excess into the overflow account.
    ///
    /// `total = true` means `received` is the lifetime total seen at the
    /// address; otherwise it is one fresh receipt. Admin-initiated deposits
    /// source from offline cash.
    #[tracing::instrument(skip(self), fields(user = %username, address))]
    pub async fn deposit_cash(
        &self,
        username: &Username,
        address: &str,
        received: Quantity,
        total: bool,
        admin_username: Option<&Username>,
    ) -> BursarResult<()> {
        info!(received = received.0, total, "deposit received");

        let row = self.store.deposit_address(address).await?;
        if &row.username != username {
            warn!(owner = %row.username, "deposit caller does not own the address; booking to the owner");
        }

        let contract = self.contract(&row.ticker).await?;
        let user = self.user(&row.username).await?;
        let user_cash = self
            .store
            .position_value(&row.username, &row.ticker)
            .await?;

        // Compute the deposit before marking the amount accounted for.
        let (deposit, accounted_for) = if total {
            (received - row.accounted_for, received)
        } else {
            (received, row.accounted_for + received)
        };
        self.store.set_accounted_for(address, accounted_for).await?;

        let now = Utc::now();
        let (note, cash_account) = match admin_username {
            Some(admin) => (
                format!("{address} ({admin})"),
                Username::new(accounts::OFFLINE_CASH),
            ),
            None => (address.to_string(), Username::new(accounts::ONLINE_CASH)),
        };

        let mut my_postings = vec![make_signed_posting(
            PostingKind::Deposit,
            &row.username,
            &row.ticker,
            deposit,
            Direction::Credit,
            &note,
            now,
        )];
        let mut remote_postings = vec![make_signed_posting(
            PostingKind::Deposit,
            &cash_account,
            &row.ticker,
            deposit,
            Direction::Debit,
            &note,
            now,
        )];

        // Deposit limit enforcement. Without deposit permission the entire
        // amount is excess.
        let limit = self.config().deposit_limits.get(&row.ticker).copied();
        let potential = user_cash + deposit;
        let excess = if !user.permissions.deposit {
            error!(deposit = deposit.0, "user is not permitted to deposit; the whole amount overflows");
            deposit
        } else if let Some(limit) = limit
            && potential > limit
        {
            error!(deposit = deposit.0, limit = limit.0, "deposit exceeds the limit");
            potential - limit
        } else {
            Quantity::ZERO
        };

        if excess > Quantity::ZERO {
            let excess_note = match admin_username {
                Some(admin) => format!("Excess Deposit: {address} ({admin})"),
                None => format!("Excess Deposit: {address}"),
            };
            my_postings.push(make_posting(
                PostingKind::Deposit,
                &row.username,
                &row.ticker,
                excess,
                Direction::Debit,
                &excess_note,
                now,
            ));
            remote_postings.push(make_posting(
                PostingKind::Deposit,
                &Username::new(accounts::DEPOSIT_OVERFLOW),
                &row.ticker,
                excess,
                Direction::Credit,
                &excess_note,
                now,
            ));

            let (subject, body) = notify::deposit_overflow_mail(&user, &row.ticker, excess);
            self.services()
                .mailer
                .send_mail(&body, &user.mail_to(), &subject);
        }

        let deposit_fees =
            fees::deposit_fees(&contract, &user, deposit, self.config().trial_period);
        let split = fees::split_fees(
            &deposit_fees,
            &user,
            &self.config().vendor_shares,
            PostingKind::Deposit,
            now,
        );
        my_postings.extend(split.user_postings);
        remote_postings.extend(split.vendor_postings);
        remote_postings.extend(split.remainder_postings);

        let count = (my_postings.len() + remote_postings.len()) as u32;
        let uid = JournalUid::generate();
        let my_postings = stamp_entry(my_postings, &uid, count);
        let remote_postings = stamp_entry(remote_postings, &uid, count);

        self.fan_out(&remote_postings);
        self.post_or_fail(my_postings).await
    }
}
