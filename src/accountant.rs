use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::AccountantConfig,
    data::{
        contract::Contract,
        domain::{ContractType, Price, Quantity, Ticker, Username},
        position::Position,
        user::User,
    },
    engine::Engine,
    error::{ApiError, BursarError, BursarResult, StorageError},
    ledger::LedgerGateway,
    margin::{self, MarginOutcome, MarginSnapshot, Overrides},
    notify::{AlertSink, Cashier, Mailer, Webserver},
    peer::{AccountantPeer, ShardMap},
    store::PositionStore,
};

pub mod cashflow;
pub mod clearing;
pub mod liquidation;
pub mod orders;
pub mod postings;
pub mod repair;
pub mod trades;

/// The accountant's outbound collaborators. Everything is a trait object so
/// deployments and tests wire their own transports; the service itself is
/// single-threaded, so plain `Rc` sharing suffices.
#[derive(Clone)]
pub struct Services {
    pub ledger: Rc<dyn LedgerGateway>,
    pub engine: Rc<dyn Engine>,
    pub peers: Rc<dyn AccountantPeer>,
    pub webserver: Rc<dyn Webserver>,
    pub alerts: Rc<dyn AlertSink>,
    pub mailer: Rc<dyn Mailer>,
    pub cashier: Rc<dyn Cashier>,
}

/// The reply to a margin query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSummary {
    pub username: Username,
    pub low_margin: Quantity,
    pub high_margin: Quantity,
    pub cash_position: Quantity,
}

/// One shard of the accountant: the authoritative bookkeeping and
/// trade-admission service for the users routed to it.
///
/// Handlers are linear async functions on a single-threaded loop. The
/// disabled and clearing sets are process-local and deliberately do not
/// survive restart; startup repair re-derives any disables it needs.
pub struct Accountant<S: PositionStore> {
    config: AccountantConfig,
    store: S,
    services: Services,
    shard_map: ShardMap,
    safe_prices: RefCell<HashMap<Ticker, Price>>,
    disabled_users: RefCell<HashSet<Username>>,
    clearing_contracts: RefCell<HashSet<Ticker>>,
}

impl<S: PositionStore> Accountant<S> {
    pub fn new(config: AccountantConfig, store: S, services: Services) -> BursarResult<Self> {
        config.validate()?;
        let shard_map = ShardMap::new(config.num_shards);
        Ok(Self {
            config,
            store,
            services,
            shard_map,
            safe_prices: RefCell::new(HashMap::new()),
            disabled_users: RefCell::new(HashSet::new()),
            clearing_contracts: RefCell::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &AccountantConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    // ============================================================================
    // Safe Prices
    // ============================================================================

    /// Ask every active non-cash contract's engine for its current safe
    /// price. Failures are logged and skipped; the engine pushes updates
    /// later anyway.
    pub async fn bootstrap_safe_prices(&self) -> BursarResult<()> {
        for contract in self.store.active_contracts().await? {
            if contract.contract_type == ContractType::Cash {
                continue;
            }
            match self.services.engine.safe_price(&contract.ticker).await {
                Ok(price) => {
                    self.safe_prices
                        .borrow_mut()
                        .insert(contract.ticker.clone(), price);
                }
                Err(e) => {
                    warn!(contract = %contract.ticker, error = %e, "no safe price at startup");
                }
            }
        }
        Ok(())
    }

    /// Engine-pushed safe price update.
    pub fn set_safe_price(&self, ticker: Ticker, price: Price) {
        self.safe_prices.borrow_mut().insert(ticker, price);
    }

    pub(crate) fn safe_price(&self, ticker: &Ticker) -> Option<Price> {
        self.safe_prices.borrow().get(ticker).copied()
    }

    pub(crate) fn safe_prices_snapshot(&self) -> HashMap<Ticker, Price> {
        self.safe_prices.borrow().clone()
    }

    // ============================================================================
    // Lookups
    // ============================================================================

    /// User lookup with the store's miss translated to the client-facing
    /// `no_such_user`.
    pub(crate) async fn user(&self, username: &Username) -> BursarResult<User> {
        match self.store.user(username).await {
            Err(BursarError::Storage(StorageError::NotFound(_))) => {
                Err(ApiError::NoSuchUser.into())
            }
            other => other,
        }
    }

    pub(crate) async fn contract(&self, ticker: &Ticker) -> BursarResult<Contract> {
        self.store.contract(ticker).await
    }

    /// The on-record position quantity, zero for absent rows.
    pub async fn get_position_value(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Quantity> {
        self.store.position_value(username, ticker).await
    }

    // ============================================================================
    // Disabled Users
    // ============================================================================

    /// Bar the user from trading and withdrawing and pull their resting
    /// orders. Used during liquidation and repair.
    pub async fn disable_user(&self, username: &Username) {
        info!(user = %username, "disabling user");
        if let Err(e) = self.cancel_user_orders(username, None).await {
            warn!(user = %username, error = %e, "could not cancel all orders while disabling");
        }
        self.disabled_users.borrow_mut().insert(username.clone());
    }

    pub fn enable_user(&self, username: &Username) {
        info!(user = %username, "enabling user");
        self.disabled_users.borrow_mut().remove(username);
    }

    pub fn is_user_enabled(&self, username: &Username) -> bool {
        !self.disabled_users.borrow().contains(username)
    }

    pub(crate) fn is_clearing(&self, ticker: &Ticker) -> bool {
        self.clearing_contracts.borrow().contains(ticker)
    }

    pub(crate) fn clearing_contracts(&self) -> &RefCell<HashSet<Ticker>> {
        &self.clearing_contracts
    }

    // ============================================================================
    // Margin
    // ============================================================================

    /// Evaluate the user's margin against a snapshot of their book, with
    /// hypotheticals layered on top.
    pub(crate) async fn margin_for(
        &self,
        username: &Username,
        overrides: &Overrides,
    ) -> BursarResult<MarginOutcome> {
        let positions = self.store.positions_for_user(username).await?;
        let open_orders = self.store.open_orders(Some(username), None).await?;

        let mut contracts: HashMap<Ticker, Contract> = HashMap::new();
        let tickers = positions
            .iter()
            .map(|p| &p.ticker)
            .chain(open_orders.iter().map(|o| &o.ticker))
            .chain(overrides.positions.keys())
            .chain(overrides.withdrawals.keys());
        for ticker in tickers {
            if !contracts.contains_key(ticker) {
                contracts.insert(ticker.clone(), self.contract(ticker).await?);
            }
        }

        let safe_prices = self.safe_prices_snapshot();
        let snapshot = MarginSnapshot {
            positions: &positions,
            open_orders: &open_orders,
            contracts: &contracts,
            safe_prices: &safe_prices,
            margin_ticker: &self.config.margin_ticker,
        };
        margin::calculate(&snapshot, overrides)
    }

    pub(crate) async fn check_margin(
        &self,
        username: &Username,
        outcome: &MarginOutcome,
    ) -> BursarResult<bool> {
        let cash = self
            .store
            .position_value(username, &self.config.margin_ticker)
            .await?;
        info!(
            user = %username,
            high_margin = outcome.high_margin.0,
            low_margin = outcome.low_margin.0,
            cash_position = cash.0,
            "margin check"
        );
        Ok(outcome.check(cash))
    }

    pub async fn get_margin(&self, username: &Username) -> BursarResult<MarginSummary> {
        let user = self.user(username).await?;
        let outcome = self.margin_for(&user.username, &Overrides::default()).await?;
        let cash_position = self
            .store
            .position_value(&user.username, &self.config.margin_ticker)
            .await?;
        Ok(MarginSummary {
            username: user.username,
            low_margin: outcome.low_margin,
            high_margin: outcome.high_margin,
            cash_position,
        })
    }

    // ============================================================================
    // Sharding
    // ============================================================================

    pub(crate) fn shard_map(&self) -> &ShardMap {
        &self.shard_map
    }

    pub(crate) fn owns(&self, username: &Username) -> bool {
        self.shard_map.shard_for(username).0 == self.config.shard_id
    }

    /// The users this shard owns the write path for.
    pub async fn my_users(&self) -> BursarResult<Vec<User>> {
        Ok(self
            .store
            .users()
            .await?
            .into_iter()
            .filter(|u| self.owns(&u.username))
            .collect())
    }

    // ============================================================================
    // Administration
    // ============================================================================

    pub async fn change_permission_group(
        &self,
        username: &Username,
        group_id: i64,
    ) -> BursarResult<()> {
        info!(user = %username, group = group_id, "changing permission group");
        self.store.set_permission_group(username, group_id).await
    }

    pub async fn change_fee_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        info!(user = %username, group = group_id, "changing fee group");
        self.store.set_fee_group(username, group_id).await
    }

    pub async fn reload_fee_group(&self, group_id: i64) -> BursarResult<()> {
        self.store.refresh_fee_group(group_id).await
    }

    pub async fn reload_contract(&self, ticker: &Ticker) -> BursarResult<()> {
        self.store.refresh_contract(ticker).await
    }

    // ============================================================================
    // Reconciliation
    // ============================================================================

    /// The canonical quantity of a position: its checkpoint plus the replay
    /// of the acknowledged journal since the checkpoint was taken.
    pub(crate) async fn canonical_position(
        &self,
        position: &Position,
    ) -> BursarResult<(Quantity, DateTime<Utc>)> {
        let replayed = self
            .services
            .ledger
            .position_since(&position.username, &position.ticker, position.cp_timestamp)
            .await
            .map_err(BursarError::from)?;
        Ok((position.position_checkpoint + replayed, Utc::now()))
    }
}
