use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    data::{
        contract::Contract,
        domain::{OrderId, Price, Quantity, Ticker, Username},
        order::{NewOrder, Order},
        position::Position,
        trade::Trade,
        user::{DepositAddress, FeeGroup, Permissions, User},
    },
    error::{BursarResult, StorageError},
    store::PositionStore,
};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Username, User>,
    permission_groups: HashMap<i64, Permissions>,
    fee_groups: HashMap<i64, FeeGroup>,
    contracts: HashMap<Ticker, Contract>,
    positions: BTreeMap<(Username, Ticker), Position>,
    orders: BTreeMap<OrderId, Order>,
    next_order_id: i64,
    trades: Vec<Trade>,
    addresses: HashMap<String, DepositAddress>,
}

/// In-memory [`PositionStore`] for tests and single-process development.
///
/// All state sits behind one `RefCell`; borrows never cross an await point
/// because every operation completes synchronously.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Seeding (test/development setup, not part of the store trait) ===

    pub fn add_user(&self, user: User) {
        self.inner
            .borrow_mut()
            .users
            .insert(user.username.clone(), user);
    }

    pub fn add_contract(&self, contract: Contract) {
        self.inner
            .borrow_mut()
            .contracts
            .insert(contract.ticker.clone(), contract);
    }

    pub fn add_permission_group(&self, id: i64, permissions: Permissions) {
        self.inner
            .borrow_mut()
            .permission_groups
            .insert(id, permissions);
    }

    pub fn add_fee_group(&self, group: FeeGroup) {
        self.inner.borrow_mut().fee_groups.insert(group.id, group);
    }

    pub fn add_address(&self, address: DepositAddress) {
        self.inner
            .borrow_mut()
            .addresses
            .insert(address.address.clone(), address);
    }

    /// Overwrite a position row wholesale. Test setup only.
    pub fn put_position(&self, position: Position) {
        self.inner.borrow_mut().positions.insert(
            (position.username.clone(), position.ticker.clone()),
            position,
        );
    }

    fn get_or_create<'a>(inner: &'a mut Inner, username: &Username, ticker: &Ticker) -> &'a mut Position {
        inner
            .positions
            .entry((username.clone(), ticker.clone()))
            .or_insert_with(|| {
                tracing::debug!(user = %username, contract = %ticker, "creating new position");
                Position::new(username.clone(), ticker.clone())
            })
    }
}

impl PositionStore for MemoryStore {
    // === Users & Contracts ===

    async fn user(&self, username: &Username) -> BursarResult<User> {
        self.inner
            .borrow()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("user {username}")).into())
    }

    async fn users(&self) -> BursarResult<Vec<User>> {
        Ok(self.inner.borrow().users.values().cloned().collect())
    }

    async fn contract(&self, ticker: &Ticker) -> BursarResult<Contract> {
        self.inner
            .borrow()
            .contracts
            .get(ticker)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("contract {ticker}")).into())
    }

    async fn active_contracts(&self) -> BursarResult<Vec<Contract>> {
        Ok(self
            .inner
            .borrow()
            .contracts
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn set_permission_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let permissions = inner
            .permission_groups
            .get(&group_id)
            .copied()
            .ok_or_else(|| StorageError::NotFound(format!("permission group {group_id}")))?;
        let user = inner
            .users
            .get_mut(username)
            .ok_or_else(|| StorageError::NotFound(format!("user {username}")))?;
        user.permission_group_id = group_id;
        user.permissions = permissions;
        Ok(())
    }

    async fn set_fee_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let group = inner
            .fee_groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("fee group {group_id}")))?;
        let user = inner
            .users
            .get_mut(username)
            .ok_or_else(|| StorageError::NotFound(format!("user {username}")))?;
        user.fee_group = group;
        Ok(())
    }

    async fn refresh_fee_group(&self, _group_id: i64) -> BursarResult<()> {
        // Nothing is cached here; reads always see the latest rows.
        Ok(())
    }

    async fn refresh_contract(&self, _ticker: &Ticker) -> BursarResult<()> {
        Ok(())
    }

    // === Positions ===

    async fn get_or_create_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        reference_price: Option<Price>,
    ) -> BursarResult<Position> {
        let mut inner = self.inner.borrow_mut();
        let position = Self::get_or_create(&mut inner, username, ticker);
        if position.reference_price.is_none()
            && let Some(price) = reference_price
        {
            position.reference_price = Some(price);
        }
        Ok(position.clone())
    }

    async fn position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Option<Position>> {
        Ok(self
            .inner
            .borrow()
            .positions
            .get(&(username.clone(), ticker.clone()))
            .cloned())
    }

    async fn position_value(&self, username: &Username, ticker: &Ticker) -> BursarResult<Quantity> {
        Ok(self
            .inner
            .borrow()
            .positions
            .get(&(username.clone(), ticker.clone()))
            .map(|p| p.position)
            .unwrap_or(Quantity::ZERO))
    }

    async fn positions_for_user(&self, username: &Username) -> BursarResult<Vec<Position>> {
        Ok(self
            .inner
            .borrow()
            .positions
            .values()
            .filter(|p| &p.username == username)
            .cloned()
            .collect())
    }

    async fn positions_on_contract(&self, ticker: &Ticker) -> BursarResult<Vec<Position>> {
        Ok(self
            .inner
            .borrow()
            .positions
            .values()
            .filter(|p| &p.ticker == ticker)
            .cloned()
            .collect())
    }

    async fn bump_pending(&self, keys: &[(Username, Ticker)], delta: i64) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        for (username, ticker) in keys {
            let position = Self::get_or_create(&mut inner, username, ticker);
            let next = position.pending_postings + delta;
            if next < 0 {
                warn!(
                    user = %username,
                    contract = %ticker,
                    "pending counter would go negative; clamping to zero"
                );
            }
            position.pending_postings = next.max(0);
        }
        Ok(())
    }

    async fn apply_delta(
        &self,
        username: &Username,
        ticker: &Ticker,
        delta: Quantity,
    ) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let position = Self::get_or_create(&mut inner, username, ticker);
        position.position += delta;
        Ok(())
    }

    async fn set_reference_price(
        &self,
        username: &Username,
        ticker: &Ticker,
        price: Price,
    ) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let position = Self::get_or_create(&mut inner, username, ticker);
        position.reference_price = Some(price);
        Ok(())
    }

    async fn pending_for_user(&self, username: &Username) -> BursarResult<i64> {
        Ok(self
            .inner
            .borrow()
            .positions
            .values()
            .filter(|p| &p.username == username)
            .map(|p| p.pending_postings)
            .sum())
    }

    async fn pending_on_contract(&self, ticker: &Ticker, owners: &[Username]) -> BursarResult<i64> {
        Ok(self
            .inner
            .borrow()
            .positions
            .values()
            .filter(|p| &p.ticker == ticker && owners.contains(&p.username))
            .map(|p| p.pending_postings)
            .sum())
    }

    async fn reset_pending_for_user(&self, username: &Username) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        for position in inner.positions.values_mut() {
            if &position.username == username {
                position.pending_postings = 0;
            }
        }
        Ok(())
    }

    async fn checkpoint_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        position: Quantity,
        at: DateTime<Utc>,
    ) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let row = Self::get_or_create(&mut inner, username, ticker);
        row.position = position;
        row.position_checkpoint = position;
        row.cp_timestamp = Some(at);
        Ok(())
    }

    // === Orders ===

    async fn insert_order(&self, order: NewOrder) -> BursarResult<Order> {
        let mut inner = self.inner.borrow_mut();
        inner.next_order_id += 1;
        let id = OrderId(inner.next_order_id);
        let row = Order {
            id,
            username: order.username,
            ticker: order.ticker,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            quantity_left: order.quantity,
            accepted: false,
            dispatched: false,
            is_cancelled: false,
            timestamp: order.timestamp,
        };
        inner.orders.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_order(&self, id: OrderId) -> BursarResult<()> {
        self.inner.borrow_mut().orders.remove(&id);
        Ok(())
    }

    async fn order(&self, id: OrderId) -> BursarResult<Option<Order>> {
        Ok(self.inner.borrow().orders.get(&id).cloned())
    }

    async fn mark_order_accepted(&self, id: OrderId) -> BursarResult<()> {
        self.with_order(id, |o| o.accepted = true)
    }

    async fn mark_order_dispatched(&self, id: OrderId) -> BursarResult<()> {
        self.with_order(id, |o| o.dispatched = true)
    }

    async fn mark_order_cancelled(&self, id: OrderId) -> BursarResult<()> {
        self.with_order(id, |o| o.is_cancelled = true)
    }

    async fn reduce_order_quantity(&self, id: OrderId, fill: Quantity) -> BursarResult<Order> {
        let mut inner = self.inner.borrow_mut();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("order {}", id.0)))?;
        order.quantity_left -= fill;
        Ok(order.clone())
    }

    async fn open_orders(
        &self,
        username: Option<&Username>,
        ticker: Option<&Ticker>,
    ) -> BursarResult<Vec<Order>> {
        Ok(self
            .inner
            .borrow()
            .orders
            .values()
            .filter(|o| o.is_open())
            .filter(|o| username.is_none_or(|u| &o.username == u))
            .filter(|o| ticker.is_none_or(|t| &o.ticker == t))
            .cloned()
            .collect())
    }

    // === Trades ===

    async fn insert_trade(&self, trade: Trade) -> BursarResult<()> {
        self.inner.borrow_mut().trades.push(trade);
        Ok(())
    }

    async fn mark_trade_posted(
        &self,
        aggressive_order: OrderId,
        passive_order: OrderId,
    ) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let trade = inner
            .trades
            .iter_mut()
            .find(|t| t.aggressive_order == aggressive_order && t.passive_order == passive_order)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "trade {}/{}",
                    aggressive_order.0, passive_order.0
                ))
            })?;
        trade.posted = true;
        Ok(())
    }

    // === Deposit Addresses ===

    async fn deposit_address(&self, address: &str) -> BursarResult<DepositAddress> {
        self.inner
            .borrow()
            .addresses
            .get(address)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("address {address}")).into())
    }

    async fn set_accounted_for(&self, address: &str, accounted_for: Quantity) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let row = inner
            .addresses
            .get_mut(address)
            .ok_or_else(|| StorageError::NotFound(format!("address {address}")))?;
        row.accounted_for = accounted_for;
        Ok(())
    }
}

impl MemoryStore {
    fn with_order(&self, id: OrderId, f: impl FnOnce(&mut Order)) -> BursarResult<()> {
        let mut inner = self.inner.borrow_mut();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("order {}", id.0)))?;
        f(order);
        Ok(())
    }

    /// Test/diagnostic access to the trade log.
    pub fn trades(&self) -> Vec<Trade> {
        self.inner.borrow().trades.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::data::domain::{ContractType, Side, UserType};

    use super::*;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_contract(Contract {
            ticker: Ticker::new("BTC"),
            contract_type: ContractType::Cash,
            active: true,
            tick_size: 1,
            lot_size: 1,
            denominator: 1,
            denominated_ticker: None,
            payout_ticker: None,
            expiration: None,
            trade_fee_bps: 0,
            withdraw_fee: 0,
            deposit_fee_bps: 0,
            margin_high_bps: 0,
            margin_low_bps: 0,
        });
        store
    }

    fn alice() -> Username {
        Username::new("alice")
    }

    #[tokio::test]
    async fn test_positions_are_created_lazily() {
        let store = store();
        assert!(
            store
                .position(&alice(), &Ticker::new("BTC"))
                .await
                .unwrap()
                .is_none()
        );

        let position = store
            .get_or_create_position(&alice(), &Ticker::new("BTC"), None)
            .await
            .unwrap();
        assert_eq!(position.position, Quantity::ZERO);
        assert_eq!(position.pending_postings, 0);

        assert!(
            store
                .position(&alice(), &Ticker::new("BTC"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_reference_price_set_once() {
        let store = store();
        let ticker = Ticker::new("F1");

        let p = store
            .get_or_create_position(&alice(), &ticker, Some(Price(100)))
            .await
            .unwrap();
        assert_eq!(p.reference_price, Some(Price(100)));

        // A later call with a different price does not overwrite it.
        let p = store
            .get_or_create_position(&alice(), &ticker, Some(Price(105)))
            .await
            .unwrap();
        assert_eq!(p.reference_price, Some(Price(100)));
    }

    #[tokio::test]
    async fn test_pending_counter_never_goes_negative() {
        let store = store();
        let keys = vec![(alice(), Ticker::new("BTC"))];

        store.bump_pending(&keys, 1).await.unwrap();
        store.bump_pending(&keys, -1).await.unwrap();
        store.bump_pending(&keys, -1).await.unwrap();

        let p = store
            .position(&alice(), &Ticker::new("BTC"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.pending_postings, 0);
    }

    #[tokio::test]
    async fn test_order_lifecycle_flags() {
        let store = store();
        let order = store
            .insert_order(NewOrder {
                username: alice(),
                ticker: Ticker::new("BTC"),
                side: Side::Buy,
                price: Price(10),
                quantity: Quantity(5),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        assert!(!order.accepted);
        store.mark_order_accepted(order.id).await.unwrap();
        store.mark_order_dispatched(order.id).await.unwrap();

        let row = store.order(order.id).await.unwrap().unwrap();
        assert!(row.accepted && row.dispatched && !row.is_cancelled);

        let row = store.reduce_order_quantity(order.id, Quantity(2)).await.unwrap();
        assert_eq!(row.quantity_left, Quantity(3));

        store.mark_order_cancelled(order.id).await.unwrap();
        assert!(store.open_orders(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_orders_filters() {
        let store = store();
        for (user, ticker) in [("alice", "BTC"), ("alice", "LTC"), ("bob", "BTC")] {
            store
                .insert_order(NewOrder {
                    username: Username::new(user),
                    ticker: Ticker::new(ticker),
                    side: Side::Sell,
                    price: Price(10),
                    quantity: Quantity(5),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.open_orders(None, None).await.unwrap().len(), 3);
        assert_eq!(
            store
                .open_orders(Some(&alice()), None)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            store
                .open_orders(Some(&alice()), Some(&Ticker::new("BTC")))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_checkpoint_updates_position_and_stamp() {
        let store = store();
        let at = Utc::now();
        store
            .checkpoint_position(&alice(), &Ticker::new("BTC"), Quantity(42), at)
            .await
            .unwrap();

        let p = store
            .position(&alice(), &Ticker::new("BTC"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.position, Quantity(42));
        assert_eq!(p.position_checkpoint, Quantity(42));
        assert_eq!(p.cp_timestamp, Some(at));
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let store = store();
        store.add_user(User {
            username: alice(),
            user_type: UserType::Asset,
            permissions: Permissions::all(),
            permission_group_id: 0,
            fee_group: FeeGroup::default(),
            locale: "en".to_string(),
            email: String::new(),
            nickname: String::new(),
            notifications: vec![],
        });

        assert!(store.user(&alice()).await.is_ok());
        assert!(store.user(&Username::new("nobody")).await.is_err());
    }
}
