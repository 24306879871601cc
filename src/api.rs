//! Role-gated RPC surfaces.
//!
//! Each collaborator gets its own thin wrapper over the accountant core, so
//! a transport layer can expose exactly the operations its role is trusted
//! with and nothing else. Operations whose subject is a user must be routed
//! to that user's shard first; [`crate::peer::ShardMap`] is the contract.

use std::rc::Rc;

use tracing::error;

use crate::{
    accountant::{Accountant, MarginSummary, orders::OrderRequest, trades::FillEvent},
    data::domain::{Direction, JournalUid, OrderId, Price, Quantity, Ticker, Username},
    error::BursarResult,
    posting::Posting,
    store::PositionStore,
};

/// Operations the webserver may invoke on behalf of an end user.
#[derive(Clone)]
pub struct WebserverApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> WebserverApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    pub async fn place_order(
        &self,
        username: &Username,
        order: OrderRequest,
    ) -> BursarResult<OrderId> {
        self.accountant.place_order(username, order, false).await
    }

    pub async fn cancel_order(&self, username: &Username, id: OrderId) -> BursarResult<()> {
        self.accountant.cancel_order(Some(username), id).await
    }

    pub async fn request_withdrawal(
        &self,
        username: &Username,
        ticker: &Ticker,
        quantity: Quantity,
        address: &str,
    ) -> BursarResult<bool> {
        self.accountant
            .request_withdrawal(username, ticker, quantity, address)
            .await
    }

    pub async fn get_margin(&self, username: &Username) -> BursarResult<MarginSummary> {
        self.accountant.get_margin(username).await
    }
}

/// Operations the matching engine may invoke.
#[derive(Clone)]
pub struct EngineApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> EngineApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    pub async fn post_transaction(
        &self,
        username: &Username,
        transaction: FillEvent,
    ) -> BursarResult<()> {
        self.accountant.post_transaction(username, transaction).await
    }

    pub async fn cancel_order(&self, username: &Username, id: OrderId) -> BursarResult<()> {
        self.accountant.cancel_order_engine(Some(username), id).await
    }

    pub fn safe_prices(&self, ticker: Ticker, price: Price) {
        self.accountant.set_safe_price(ticker, price);
    }
}

/// Operations the cashier may invoke.
#[derive(Clone)]
pub struct CashierApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> CashierApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    pub async fn deposit_cash(
        &self,
        username: &Username,
        address: &str,
        received: Quantity,
        total: bool,
    ) -> BursarResult<()> {
        self.accountant
            .deposit_cash(username, address, received, total, None)
            .await
    }

    pub async fn transfer_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        direction: Direction,
        quantity: Quantity,
        note: &str,
        uid: &JournalUid,
    ) -> BursarResult<()> {
        self.accountant
            .transfer_position(username, ticker, direction, quantity, note, uid)
            .await
    }

    pub async fn get_position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Quantity> {
        self.accountant.get_position_value(username, ticker).await
    }
}

/// The shard-to-shard surface.
#[derive(Clone)]
pub struct PeerApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> PeerApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    /// Book postings stamped into a journal entry by a peer shard. Failures
    /// stay on this side of the wire.
    pub async fn remote_post(&self, username: &Username, postings: Vec<Posting>) {
        if postings.iter().any(|p| &p.username != username) {
            error!(user = %username, "remote postings name a different user, refusing");
            return;
        }
        self.accountant.remote_post(postings).await;
    }
}

/// Operations reserved for the administrator.
#[derive(Clone)]
pub struct AdminApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> AdminApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    pub async fn adjust_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        quantity: Quantity,
        admin_username: &Username,
    ) -> BursarResult<()> {
        self.accountant
            .adjust_position(username, ticker, quantity, admin_username)
            .await
    }

    pub async fn transfer_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        direction: Direction,
        quantity: Quantity,
        note: &str,
        uid: &JournalUid,
    ) -> BursarResult<()> {
        self.accountant
            .transfer_position(username, ticker, direction, quantity, note, uid)
            .await
    }

    pub async fn change_permission_group(
        &self,
        username: &Username,
        group_id: i64,
    ) -> BursarResult<()> {
        self.accountant.change_permission_group(username, group_id).await
    }

    pub async fn change_fee_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        self.accountant.change_fee_group(username, group_id).await
    }

    pub async fn deposit_cash(
        &self,
        username: &Username,
        address: &str,
        received: Quantity,
        total: bool,
        admin_username: &Username,
    ) -> BursarResult<()> {
        self.accountant
            .deposit_cash(username, address, received, total, Some(admin_username))
            .await
    }

    pub async fn cancel_order(&self, id: OrderId) -> BursarResult<()> {
        self.accountant.cancel_order(None, id).await
    }

    pub async fn clear_contract(
        &self,
        ticker: &Ticker,
        price: Option<Price>,
        uid: JournalUid,
    ) -> BursarResult<()> {
        self.accountant.clear_contract(ticker, price, uid).await
    }

    pub async fn reload_fee_group(&self, group_id: i64) -> BursarResult<()> {
        self.accountant.reload_fee_group(group_id).await
    }

    pub async fn reload_contract(&self, ticker: &Ticker) -> BursarResult<()> {
        self.accountant.reload_contract(ticker).await
    }

    pub async fn get_margin(&self, username: &Username) -> BursarResult<MarginSummary> {
        self.accountant.get_margin(username).await
    }

    pub async fn liquidate_all(&self, username: &Username) -> BursarResult<()> {
        self.accountant.liquidate_all(username).await
    }

    pub async fn liquidate_position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Option<OrderId>> {
        self.accountant.liquidate_position(username, ticker).await
    }
}

/// The risk manager's surface.
#[derive(Clone)]
pub struct RiskApi<S: PositionStore> {
    accountant: Rc<Accountant<S>>,
}

impl<S: PositionStore> RiskApi<S> {
    pub fn new(accountant: Rc<Accountant<S>>) -> Self {
        Self { accountant }
    }

    pub async fn liquidate_best(&self, username: &Username) -> BursarResult<Option<OrderId>> {
        self.accountant.liquidate_best(username).await
    }
}
