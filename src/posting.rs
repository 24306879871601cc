use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::domain::{Direction, JournalUid, PostingKind, Quantity, Ticker, UserType, Username};

/// One line of a journal entry: a credit or debit of a non-negative quantity
/// on one (user, contract). The set of postings sharing a `uid` forms the
/// entry; it is well-formed iff exactly `count` members arrive and the
/// credits and debits balance per contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    #[serde(rename = "type")]
    pub kind: PostingKind,
    pub username: Username,
    pub contract: Ticker,
    pub quantity: Quantity,
    pub direction: Direction,
    pub note: String,
    pub timestamp: DateTime<Utc>,
    pub uid: JournalUid,
    pub count: u32,
}

impl Posting {
    /// The sign this posting applies to the named user's position once the
    /// ledger acknowledges it: `+1` if debit-on-Asset or credit-on-Liability,
    /// `-1` otherwise. This is the one place the Asset/Liability distinction
    /// matters to the accountant.
    pub fn sign_for(&self, user_type: UserType) -> i64 {
        match (self.direction, user_type) {
            (Direction::Debit, UserType::Asset) | (Direction::Credit, UserType::Liability) => 1,
            _ => -1,
        }
    }

    pub fn delta_for(&self, user_type: UserType) -> Quantity {
        Quantity(self.sign_for(user_type) * self.quantity.0)
    }
}

/// A posting whose journal entry is not assembled yet. `uid` and `count` are
/// stamped once the full entry is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub kind: PostingKind,
    pub username: Username,
    pub contract: Ticker,
    pub quantity: Quantity,
    pub direction: Direction,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl Draft {
    pub fn stamp(self, uid: &JournalUid, count: u32) -> Posting {
        Posting {
            kind: self.kind,
            username: self.username,
            contract: self.contract,
            quantity: self.quantity,
            direction: self.direction,
            note: self.note,
            timestamp: self.timestamp,
            uid: uid.clone(),
            count,
        }
    }
}

/// Pure posting constructor. Quantities are non-negative; the direction
/// carries the sign.
pub fn make_posting(
    kind: PostingKind,
    username: &Username,
    contract: &Ticker,
    quantity: Quantity,
    direction: Direction,
    note: impl Into<String>,
    timestamp: DateTime<Utc>,
) -> Draft {
    debug_assert!(!quantity.is_negative(), "posting quantities carry no sign");
    Draft {
        kind,
        username: username.clone(),
        contract: contract.clone(),
        quantity,
        direction,
        note: note.into(),
        timestamp,
    }
}

/// Posting constructor for signed amounts: a negative quantity flips the
/// direction. Clearing cashflows of short positions use this.
pub fn make_signed_posting(
    kind: PostingKind,
    username: &Username,
    contract: &Ticker,
    quantity: Quantity,
    direction_if_positive: Direction,
    note: impl Into<String>,
    timestamp: DateTime<Utc>,
) -> Draft {
    let direction = if quantity.is_negative() {
        direction_if_positive.opposite()
    } else {
        direction_if_positive
    };
    make_posting(
        kind,
        username,
        contract,
        quantity.abs(),
        direction,
        note,
        timestamp,
    )
}

/// Stamp a shared `uid` and the entry `count` on every draft of one journal
/// entry.
pub fn stamp_entry(drafts: Vec<Draft>, uid: &JournalUid, count: u32) -> Vec<Posting> {
    drafts.into_iter().map(|d| d.stamp(uid, count)).collect()
}

/// Whether the signed sum of `debit - credit` per contract is zero over the
/// given postings. The ledger enforces this on full entries; tests use it on
/// entries originated wholly by one shard.
pub fn is_balanced<'a>(postings: impl IntoIterator<Item = &'a Posting>) -> bool {
    let mut per_contract: HashMap<&Ticker, i64> = HashMap::new();
    for posting in postings {
        let sign = match posting.direction {
            Direction::Debit => 1,
            Direction::Credit => -1,
        };
        *per_contract.entry(&posting.contract).or_default() += sign * posting.quantity.0;
    }
    per_contract.values().all(|&sum| sum == 0)
}
