use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use strum_macros::EnumString;

use crate::{impl_abs_primitive, impl_add_sub_primitive, impl_from_primitive, impl_neg_primitive};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// A signed amount of some contract, in contract-native minor units.
///
/// This is the fundamental money type: a quantity of a cash contract *is* a
/// cash amount. All arithmetic is integer; fractional money does not exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Quantity(pub i64);
impl_from_primitive!(Quantity, i64);
impl_add_sub_primitive!(Quantity, i64);
impl_neg_primitive!(Quantity, i64);
impl_abs_primitive!(Quantity, i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// A price level in contract-native minor units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Price(pub i64);
impl_from_primitive!(Price, i64);
impl_add_sub_primitive!(Price, i64);
impl_neg_primitive!(Price, i64);
impl_abs_primitive!(Price, i64);

/// A persistent order identifier, assigned by the store on insertion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct OrderId(pub i64);
impl_from_primitive!(OrderId, i64);

/// Index of an accountant shard in `[0, num_shards)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ShardId(pub u32);
impl_from_primitive!(ShardId, u32);

/// A contract ticker, e.g. `BTC`, `BTC/USD`, `NETS2026`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self(ticker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticker {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for Ticker {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A user account name. System accounts (`remainder`, `onlinecash`, ...) are
/// ordinary usernames and shard like any other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Username {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Groups the postings of one journal entry; the atomic unit at the ledger.
///
/// Uids cross process boundaries (the engine assigns the uid of a trade entry
/// and both shards of the match stamp it), so this is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalUid(String);

impl JournalUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// A fresh random uid for a journal entry originated by this shard.
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JournalUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ================================================================================================
// Wire Vocabulary
// ================================================================================================

/// The side of an order as the engine and webserver speak it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Which side of a journal entry a posting sits on.
///
/// The sign applied to the named user's position is a function of both the
/// direction and the user's ledger type; see [`crate::posting::Posting::sign_for`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }
}

/// The business event a posting belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum PostingKind {
    Trade,
    Transfer,
    Withdrawal,
    Deposit,
    Clearing,
}

/// Contract families the accountant books.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractType {
    /// A bare currency. Never traded directly; the unit cash flows happen in.
    Cash,
    /// A currency pair, e.g. BTC/USD, quantity constrained to lot multiples.
    CashPair,
    /// A binary outcome contract priced in `[0, denominator]`.
    Prediction,
    /// A cash-settled future marked against a per-position reference price.
    Futures,
}

impl ContractType {
    /// Contract families that carry margin and participate in clearing and
    /// liquidation.
    pub fn is_derivative(self) -> bool {
        matches!(self, ContractType::Prediction | ContractType::Futures)
    }
}

/// The posting-sign convention of a user's book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum UserType {
    Asset,
    Liability,
}

// ================================================================================================
// System Accounts
// ================================================================================================

/// Well-known counterparty accounts. These are ordinary users in the store
/// and are routed across shards by the same hash as any username.
pub mod accounts {
    use super::{Ticker, Username};

    pub const ONLINE_CASH: &str = "onlinecash";
    pub const OFFLINE_CASH: &str = "offlinecash";
    pub const DEPOSIT_OVERFLOW: &str = "depositoverflow";
    pub const PENDING_WITHDRAWAL: &str = "pendingwithdrawal";
    pub const ADJUSTMENTS: &str = "adjustments";
    pub const REMAINDER: &str = "remainder";

    /// The synthetic per-contract clearing account futures cashflows post
    /// against, because the counterparty may carry a different reference
    /// price and cannot be posted against directly.
    pub fn clearing(ticker: &Ticker) -> Username {
        Username::new(format!("clearing_{ticker}"))
    }
}
