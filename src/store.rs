use chrono::{DateTime, Utc};

use crate::{
    data::{
        contract::Contract,
        domain::{OrderId, Price, Quantity, Ticker, Username},
        order::{NewOrder, Order},
        position::Position,
        trade::Trade,
        user::{DepositAddress, User},
    },
    error::BursarResult,
};

pub mod memory;
pub mod postgres;

/// Transactional store over users, contracts, positions, orders, and trades.
///
/// Positions are created lazily and never deleted. Every mutation commits
/// before the method resolves; the posting protocol relies on the ordering
/// pending-bump, ledger call, pending-release, delta-apply being durably
/// visible in that order.
pub trait PositionStore {
    // === Users & Contracts ===

    /// Fails with a not-found storage error for unknown users; callers on
    /// the RPC surface translate that to `no_such_user`.
    fn user(&self, username: &Username) -> impl Future<Output = BursarResult<User>>;

    fn users(&self) -> impl Future<Output = BursarResult<Vec<User>>>;

    fn contract(&self, ticker: &Ticker) -> impl Future<Output = BursarResult<Contract>>;

    fn active_contracts(&self) -> impl Future<Output = BursarResult<Vec<Contract>>>;

    fn set_permission_group(
        &self,
        username: &Username,
        group_id: i64,
    ) -> impl Future<Output = BursarResult<()>>;

    fn set_fee_group(
        &self,
        username: &Username,
        group_id: i64,
    ) -> impl Future<Output = BursarResult<()>>;

    /// Drop any cached view of the fee group so the next read sees fresh
    /// rows.
    fn refresh_fee_group(&self, group_id: i64) -> impl Future<Output = BursarResult<()>>;

    /// Drop any cached view of the contract.
    fn refresh_contract(&self, ticker: &Ticker) -> impl Future<Output = BursarResult<()>>;

    // === Positions ===

    /// Return the existing row or materialise a zeroed one. If
    /// `reference_price` is given and the row has none, set it.
    fn get_or_create_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        reference_price: Option<Price>,
    ) -> impl Future<Output = BursarResult<Position>>;

    fn position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> impl Future<Output = BursarResult<Option<Position>>>;

    /// The on-record position quantity, zero if the row does not exist.
    fn position_value(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> impl Future<Output = BursarResult<Quantity>>;

    fn positions_for_user(
        &self,
        username: &Username,
    ) -> impl Future<Output = BursarResult<Vec<Position>>>;

    /// Every position row on the contract, across all shards.
    fn positions_on_contract(
        &self,
        ticker: &Ticker,
    ) -> impl Future<Output = BursarResult<Vec<Position>>>;

    /// Atomically move `pending_postings` by `delta` on each named position,
    /// in one transaction. The counter never goes below zero.
    fn bump_pending(
        &self,
        keys: &[(Username, Ticker)],
        delta: i64,
    ) -> impl Future<Output = BursarResult<()>>;

    /// Apply a confirmed journal-entry delta to the on-record position.
    fn apply_delta(
        &self,
        username: &Username,
        ticker: &Ticker,
        delta: Quantity,
    ) -> impl Future<Output = BursarResult<()>>;

    fn set_reference_price(
        &self,
        username: &Username,
        ticker: &Ticker,
        price: Price,
    ) -> impl Future<Output = BursarResult<()>>;

    /// Total in-flight postings across all of the user's positions.
    fn pending_for_user(&self, username: &Username) -> impl Future<Output = BursarResult<i64>>;

    /// Total in-flight postings on the contract over the given owners.
    fn pending_on_contract(
        &self,
        ticker: &Ticker,
        owners: &[Username],
    ) -> impl Future<Output = BursarResult<i64>>;

    /// Force all of the user's pending counters to zero (crash repair).
    fn reset_pending_for_user(&self, username: &Username)
    -> impl Future<Output = BursarResult<()>>;

    /// Write a reconciled position back with a fresh checkpoint.
    fn checkpoint_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        position: Quantity,
        at: DateTime<Utc>,
    ) -> impl Future<Output = BursarResult<()>>;

    // === Orders ===

    fn insert_order(&self, order: NewOrder) -> impl Future<Output = BursarResult<Order>>;

    fn delete_order(&self, id: OrderId) -> impl Future<Output = BursarResult<()>>;

    fn order(&self, id: OrderId) -> impl Future<Output = BursarResult<Option<Order>>>;

    fn mark_order_accepted(&self, id: OrderId) -> impl Future<Output = BursarResult<()>>;

    fn mark_order_dispatched(&self, id: OrderId) -> impl Future<Output = BursarResult<()>>;

    fn mark_order_cancelled(&self, id: OrderId) -> impl Future<Output = BursarResult<()>>;

    /// Decrement `quantity_left` by a fill and return the updated row.
    fn reduce_order_quantity(
        &self,
        id: OrderId,
        fill: Quantity,
    ) -> impl Future<Output = BursarResult<Order>>;

    /// Orders with quantity left and not cancelled, optionally filtered by
    /// owner and contract.
    fn open_orders(
        &self,
        username: Option<&Username>,
        ticker: Option<&Ticker>,
    ) -> impl Future<Output = BursarResult<Vec<Order>>>;

    // === Trades ===

    fn insert_trade(&self, trade: Trade) -> impl Future<Output = BursarResult<()>>;

    fn mark_trade_posted(
        &self,
        aggressive_order: OrderId,
        passive_order: OrderId,
    ) -> impl Future<Output = BursarResult<()>>;

    // === Deposit Addresses ===

    fn deposit_address(&self, address: &str) -> impl Future<Output = BursarResult<DepositAddress>>;

    fn set_accounted_for(
        &self,
        address: &str,
        accounted_for: Quantity,
    ) -> impl Future<Output = BursarResult<()>>;
}
