use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    config::VendorShare,
    data::{
        contract::Contract,
        domain::{Direction, PostingKind, Quantity, Ticker, accounts},
        user::User,
    },
    posting::{Draft, make_posting},
};

/// Fees owed for one fill, keyed by the contract they are charged in.
///
/// Trade fees are basis points of the cash moved, scaled by the user's fee
/// group factor for their role in the match. Trial deployments charge
/// nothing.
pub fn trade_fees(
    contract: &Contract,
    user: &User,
    cash_spent: Quantity,
    aggressive: bool,
    trial_period: bool,
) -> HashMap<Ticker, Quantity> {
    if trial_period {
        return HashMap::new();
    }

    let factor = if aggressive {
        user.fee_group.aggressive_factor
    } else {
        user.fee_group.passive_factor
    };

    let base = cash_spent.abs().0 * contract.trade_fee_bps / 10_000;
    let fee = base * factor / 100;
    if fee <= 0 {
        return HashMap::new();
    }

    HashMap::from([(contract.denominated_ticker().clone(), Quantity(fee))])
}

/// The flat withdrawal fee, scaled by the user's withdraw factor.
pub fn withdraw_fees(contract: &Contract, user: &User, trial_period: bool) -> HashMap<Ticker, Quantity> {
    if trial_period {
        return HashMap::new();
    }

    let fee = contract.withdraw_fee * user.fee_group.withdraw_factor / 100;
    if fee <= 0 {
        return HashMap::new();
    }

    HashMap::from([(contract.ticker.clone(), Quantity(fee))])
}

/// Deposit fees in basis points of the deposited amount.
pub fn deposit_fees(
    contract: &Contract,
    user: &User,
    deposit: Quantity,
    trial_period: bool,
) -> HashMap<Ticker, Quantity> {
    if trial_period {
        return HashMap::new();
    }

    let base = deposit.abs().0 * contract.deposit_fee_bps / 10_000;
    let fee = base * user.fee_group.deposit_factor / 100;
    if fee <= 0 {
        return HashMap::new();
    }

    HashMap::from([(contract.ticker.clone(), Quantity(fee))])
}

/// The three posting groups a fee charge decomposes into.
#[derive(Debug, Default)]
pub struct FeeSplit {
    /// Debits against the charged user. Local to the user's shard.
    pub user_postings: Vec<Draft>,
    /// Credits to the configured vendor accounts, floored per share.
    pub vendor_postings: Vec<Draft>,
    /// Credits of whatever flooring left over, to the remainder account.
    pub remainder_postings: Vec<Draft>,
}

/// Split collected fees between the user, the vendors, and the remainder
/// account.
///
/// Precondition (enforced at config validation): vendor shares sum to at
/// most 1, so the remainder is never negative and
/// `user debit = vendor credits + remainder credit` holds per contract.
pub fn split_fees(
    fees: &HashMap<Ticker, Quantity>,
    user: &User,
    vendor_shares: &[VendorShare],
    kind: PostingKind,
    timestamp: DateTime<Utc>,
) -> FeeSplit {
    let mut split = FeeSplit::default();
    let remainder_account = accounts::REMAINDER.into();

    for (ticker, &fee) in fees {
        split.user_postings.push(make_posting(
            kind,
            &user.username,
            ticker,
            fee,
            Direction::Debit,
            "Fee",
            timestamp,
        ));

        let mut remaining = fee;
        for vendor in vendor_shares {
            let credit = Quantity((fee.0 as f64 * vendor.share).floor() as i64);
            remaining -= credit;

            split.vendor_postings.push(make_posting(
                kind,
                &vendor.account,
                ticker,
                credit,
                Direction::Credit,
                "Vendor Credit",
                timestamp,
            ));
        }

        split.remainder_postings.push(make_posting(
            kind,
            &remainder_account,
            ticker,
            remaining,
            Direction::Credit,
            "Fee remainder",
            timestamp,
        ));
    }

    split
}

#[cfg(test)]
mod tests {
    use crate::data::{
        domain::{ContractType, Username},
        user::{FeeGroup, Permissions},
    };

    use super::*;

    fn btc_usd() -> Contract {
        Contract {
            ticker: Ticker::new("BTC/USD"),
            contract_type: ContractType::CashPair,
            active: true,
            tick_size: 1,
            lot_size: 1,
            denominator: 1,
            denominated_ticker: Some(Ticker::new("USD")),
            payout_ticker: Some(Ticker::new("BTC")),
            expiration: None,
            trade_fee_bps: 20,
            withdraw_fee: 500,
            deposit_fee_bps: 0,
            margin_high_bps: 0,
            margin_low_bps: 0,
        }
    }

    fn trader(aggressive_factor: i64) -> User {
        User {
            username: Username::new("alice"),
            user_type: crate::data::domain::UserType::Asset,
            permissions: Permissions::all(),
            permission_group_id: 0,
            fee_group: FeeGroup {
                aggressive_factor,
                ..FeeGroup::default()
            },
            locale: "en".to_string(),
            email: "alice@example.com".to_string(),
            nickname: "Alice".to_string(),
            notifications: vec![],
        }
    }

    fn shares(a: f64, b: f64) -> Vec<VendorShare> {
        vec![
            VendorShare {
                account: Username::new("m2"),
                share: a,
            },
            VendorShare {
                account: Username::new("customer"),
                share: b,
            },
        ]
    }

    #[test]
    fn test_trade_fee_is_bps_of_cash_spent() {
        let fees = trade_fees(&btc_usd(), &trader(100), Quantity(1_000_000), true, false);
        assert_eq!(fees[&Ticker::new("USD")], Quantity(2_000));
    }

    #[test]
    fn test_trade_fee_scales_with_fee_group() {
        let fees = trade_fees(&btc_usd(), &trader(50), Quantity(1_000_000), true, false);
        assert_eq!(fees[&Ticker::new("USD")], Quantity(1_000));
    }

    #[test]
    fn test_trial_period_charges_nothing() {
        assert!(trade_fees(&btc_usd(), &trader(100), Quantity(1_000_000), true, true).is_empty());
        assert!(withdraw_fees(&btc_usd(), &trader(100), true).is_empty());
    }

    #[test]
    fn test_withdraw_fee_is_flat() {
        let fees = withdraw_fees(&btc_usd(), &trader(100), false);
        assert_eq!(fees[&Ticker::new("BTC/USD")], Quantity(500));
    }

    #[test]
    fn test_fee_conservation_with_rounding() {
        // 0.33 / 0.33 shares of 100: vendors get 33 + 33, remainder gets 34.
        let fees = HashMap::from([(Ticker::new("USD"), Quantity(100))]);
        let split = split_fees(
            &fees,
            &trader(100),
            &shares(0.33, 0.33),
            PostingKind::Trade,
            Utc::now(),
        );

        let user_debit: i64 = split.user_postings.iter().map(|p| p.quantity.0).sum();
        let vendor_credits: i64 = split.vendor_postings.iter().map(|p| p.quantity.0).sum();
        let remainder: i64 = split.remainder_postings.iter().map(|p| p.quantity.0).sum();

        assert_eq!(user_debit, 100);
        assert_eq!(vendor_credits, 66);
        assert_eq!(remainder, 34);
        assert_eq!(user_debit, vendor_credits + remainder);
    }

    #[test]
    fn test_fee_split_directions() {
        let fees = HashMap::from([(Ticker::new("USD"), Quantity(100))]);
        let split = split_fees(
            &fees,
            &trader(100),
            &shares(0.5, 0.5),
            PostingKind::Withdrawal,
            Utc::now(),
        );

        assert!(split
            .user_postings
            .iter()
            .all(|p| p.direction == Direction::Debit));
        assert!(split
            .vendor_postings
            .iter()
            .chain(&split.remainder_postings)
            .all(|p| p.direction == Direction::Credit));
        assert!(split.user_postings.iter().all(|p| p.kind == PostingKind::Withdrawal));
    }
}
