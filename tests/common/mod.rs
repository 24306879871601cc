//! Shared fixtures: a fully wired accountant over the in-memory store with
//! recording fakes for every external collaborator.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::LocalBoxFuture;

use bursar::{
    Accountant, AccountantConfig, Services,
    data::{
        contract::Contract,
        domain::{
            ContractType, OrderId, Price, Quantity, Ticker, UserType, Username,
        },
        position::Position,
        user::{
            DepositAddress, FeeGroup, NotificationKind, NotificationMethod, NotificationPref,
            Permissions, User,
        },
    },
    engine::{Engine, EngineOrder, OrderBook},
    error::{EngineError, LedgerFault},
    ledger::LedgerGateway,
    notify::{
        AlertSink, Cashier, FillNotice, Mailer, OrderNotice, TradeNotice, TransactionNotice,
        Webserver,
    },
    peer::AccountantPeer,
    posting::Posting,
    store::memory::MemoryStore,
};

// ================================================================================================
// Recording Fakes
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerMode {
    #[default]
    Acknowledge,
    Reject,
    Timeout,
    Malformed,
}

#[derive(Default)]
pub struct MockLedger {
    pub mode: Cell<LedgerMode>,
    /// Every acknowledged journal entry, in submission order.
    pub entries: RefCell<Vec<Vec<Posting>>>,
    /// Canned replay deltas served by `position_since`.
    pub replay: RefCell<HashMap<(Username, Ticker), Quantity>>,
}

impl LedgerGateway for MockLedger {
    fn post(&self, postings: Vec<Posting>) -> LocalBoxFuture<'_, Result<(), LedgerFault>> {
        Box::pin(async move {
            match self.mode.get() {
                LedgerMode::Acknowledge => {
                    self.entries.borrow_mut().push(postings);
                    Ok(())
                }
                LedgerMode::Reject => {
                    Err(LedgerFault::Rejected("inconsistent accounting".to_string()))
                }
                LedgerMode::Timeout => Err(LedgerFault::Timeout(Duration::from_secs(5))),
                LedgerMode::Malformed => Err(LedgerFault::Rpc("malformed call".to_string())),
            }
        })
    }

    fn position_since<'a>(
        &'a self,
        username: &'a Username,
        ticker: &'a Ticker,
        _since: Option<DateTime<Utc>>,
    ) -> LocalBoxFuture<'a, Result<Quantity, LedgerFault>> {
        Box::pin(async move {
            Ok(self
                .replay
                .borrow()
                .get(&(username.clone(), ticker.clone()))
                .copied()
                .unwrap_or(Quantity::ZERO))
        })
    }
}

impl MockLedger {
    /// All acknowledged postings, flattened.
    pub fn postings(&self) -> Vec<Posting> {
        self.entries.borrow().iter().flatten().cloned().collect()
    }
}

#[derive(Default)]
pub struct MockEngine {
    pub placed: RefCell<Vec<EngineOrder>>,
    pub cancelled: RefCell<Vec<(Ticker, OrderId)>>,
    pub books: RefCell<HashMap<Ticker, OrderBook>>,
    pub safe_prices: RefCell<HashMap<Ticker, Price>>,
    pub fail_placement: Cell<bool>,
}

impl Engine for MockEngine {
    fn place_order(&self, order: EngineOrder) -> LocalBoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.fail_placement.get() {
                return Err(EngineError("engine unavailable".to_string()));
            }
            self.placed.borrow_mut().push(order);
            Ok(())
        })
    }

    fn cancel_order<'a>(
        &'a self,
        ticker: &'a Ticker,
        id: OrderId,
    ) -> LocalBoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.cancelled.borrow_mut().push((ticker.clone(), id));
            Ok(())
        })
    }

    fn order_book<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> LocalBoxFuture<'a, Result<OrderBook, EngineError>> {
        Box::pin(async move {
            Ok(self
                .books
                .borrow()
                .get(ticker)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn safe_price<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> LocalBoxFuture<'a, Result<Price, EngineError>> {
        Box::pin(async move {
            self.safe_prices
                .borrow()
                .get(ticker)
                .copied()
                .ok_or_else(|| EngineError(format!("no safe price for {ticker}")))
        })
    }
}

#[derive(Default)]
pub struct MockPeer {
    pub posts: RefCell<Vec<(Username, Posting)>>,
}

impl AccountantPeer for MockPeer {
    fn remote_post(&self, username: &Username, posting: Posting) {
        self.posts.borrow_mut().push((username.clone(), posting));
    }
}

impl MockPeer {
    pub fn postings_for(&self, username: &str) -> Vec<Posting> {
        self.posts
            .borrow()
            .iter()
            .filter(|(u, _)| u.as_str() == username)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct MockWebserver {
    pub orders: RefCell<Vec<(Username, OrderNotice)>>,
    pub fills: RefCell<Vec<(Username, FillNotice)>>,
    pub transactions: RefCell<Vec<(Username, TransactionNotice)>>,
    pub trades: RefCell<Vec<(Ticker, TradeNotice)>>,
}

impl Webserver for MockWebserver {
    fn order(&self, username: &Username, notice: OrderNotice) {
        self.orders.borrow_mut().push((username.clone(), notice));
    }

    fn fill(&self, username: &Username, notice: FillNotice) {
        self.fills.borrow_mut().push((username.clone(), notice));
    }

    fn transaction(&self, username: &Username, notice: TransactionNotice) {
        self.transactions
            .borrow_mut()
            .push((username.clone(), notice));
    }

    fn trade(&self, ticker: &Ticker, notice: TradeNotice) {
        self.trades.borrow_mut().push((ticker.clone(), notice));
    }
}

#[derive(Default)]
pub struct MockAlerts {
    pub alerts: RefCell<Vec<String>>,
}

impl AlertSink for MockAlerts {
    fn send_alert(&self, message: &str) {
        self.alerts.borrow_mut().push(message.to_string());
    }
}

#[derive(Default)]
pub struct MockMailer {
    /// `(body, to, subject)` triples.
    pub mails: RefCell<Vec<(String, String, String)>>,
}

impl Mailer for MockMailer {
    fn send_mail(&self, body: &str, to: &str, subject: &str) {
        self.mails
            .borrow_mut()
            .push((body.to_string(), to.to_string(), subject.to_string()));
    }
}

#[derive(Default)]
pub struct MockCashier {
    pub requests: RefCell<Vec<(Username, Ticker, String, Quantity)>>,
}

impl Cashier for MockCashier {
    fn request_withdrawal(
        &self,
        username: &Username,
        ticker: &Ticker,
        address: &str,
        amount: Quantity,
    ) {
        self.requests.borrow_mut().push((
            username.clone(),
            ticker.clone(),
            address.to_string(),
            amount,
        ));
    }
}

// ================================================================================================
// Harness
// ================================================================================================

pub struct Harness {
    pub accountant: Rc<Accountant<MemoryStore>>,
    pub ledger: Rc<MockLedger>,
    pub engine: Rc<MockEngine>,
    pub peer: Rc<MockPeer>,
    pub webserver: Rc<MockWebserver>,
    pub alerts: Rc<MockAlerts>,
    pub mailer: Rc<MockMailer>,
    pub cashier: Rc<MockCashier>,
}

pub fn ticker(t: &str) -> Ticker {
    Ticker::new(t)
}

pub fn username(u: &str) -> Username {
    Username::new(u)
}

fn cash_contract(t: &str, withdraw_fee: i64) -> Contract {
    Contract {
        ticker: ticker(t),
        contract_type: ContractType::Cash,
        active: true,
        tick_size: 1,
        lot_size: 1,
        denominator: 1,
        denominated_ticker: None,
        payout_ticker: None,
        expiration: None,
        trade_fee_bps: 0,
        withdraw_fee,
        deposit_fee_bps: 0,
        margin_high_bps: 0,
        margin_low_bps: 0,
    }
}

fn customer(name: &str, notifications: Vec<NotificationPref>) -> User {
    User {
        username: username(name),
        user_type: UserType::Liability,
        permissions: Permissions::all(),
        permission_group_id: 1,
        fee_group: FeeGroup::default(),
        locale: "en".to_string(),
        email: format!("{name}@example.com"),
        nickname: name.to_string(),
        notifications,
    }
}

fn system_account(name: &str) -> User {
    User {
        username: username(name),
        user_type: UserType::Asset,
        permissions: Permissions::default(),
        permission_group_id: 0,
        fee_group: FeeGroup::default(),
        locale: "en".to_string(),
        email: String::new(),
        nickname: name.to_string(),
        notifications: vec![],
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AccountantConfig::default())
    }

    pub fn with_config(config: AccountantConfig) -> Self {
        Self::build(config, None)
    }

    /// Wire a purpose-built ledger; the recorded `self.ledger` stays idle.
    pub fn with_ledger(ledger: Rc<dyn LedgerGateway>) -> Self {
        Self::build(AccountantConfig::default(), Some(ledger))
    }

    fn build(config: AccountantConfig, ledger_override: Option<Rc<dyn LedgerGateway>>) -> Self {
        let store = MemoryStore::new();

        // Contracts: the margin currency, a second cash currency, a
        // cash pair, a futures contract, and a prediction contract.
        store.add_contract(cash_contract("BTC", 500));
        store.add_contract(cash_contract("USD", 0));
        store.add_contract(Contract {
            lot_size: 1_000,
            ..cash_contract("LTC", 0)
        });
        store.add_contract(Contract {
            ticker: ticker("BTC/USD"),
            contract_type: ContractType::CashPair,
            active: true,
            tick_size: 10,
            lot_size: 100,
            denominator: 1,
            denominated_ticker: Some(ticker("USD")),
            payout_ticker: Some(ticker("BTC")),
            expiration: None,
            trade_fee_bps: 20,
            withdraw_fee: 0,
            deposit_fee_bps: 0,
            margin_high_bps: 0,
            margin_low_bps: 0,
        });
        store.add_contract(Contract {
            ticker: ticker("F1"),
            contract_type: ContractType::Futures,
            active: true,
            tick_size: 1,
            lot_size: 1,
            denominator: 1,
            denominated_ticker: Some(ticker("BTC")),
            payout_ticker: None,
            expiration: Some(Utc::now() + ChronoDuration::days(30)),
            trade_fee_bps: 2_000,
            withdraw_fee: 0,
            deposit_fee_bps: 0,
            margin_high_bps: 2_000,
            margin_low_bps: 1_000,
        });
        store.add_contract(Contract {
            ticker: ticker("P1"),
            contract_type: ContractType::Prediction,
            active: true,
            tick_size: 1,
            lot_size: 1,
            denominator: 100,
            denominated_ticker: Some(ticker("BTC")),
            payout_ticker: Some(ticker("P1")),
            expiration: Some(Utc::now() + ChronoDuration::days(30)),
            trade_fee_bps: 0,
            withdraw_fee: 0,
            deposit_fee_bps: 0,
            margin_high_bps: 0,
            margin_low_bps: 0,
        });

        store.add_permission_group(0, Permissions::default());
        store.add_permission_group(1, Permissions::all());
        store.add_fee_group(FeeGroup::default());

        store.add_user(customer(
            "alice",
            vec![NotificationPref {
                kind: NotificationKind::Fill,
                method: NotificationMethod::Email,
            }],
        ));
        store.add_user(customer("bob", vec![]));
        for account in [
            "onlinecash",
            "offlinecash",
            "depositoverflow",
            "pendingwithdrawal",
            "adjustments",
            "remainder",
            "m2",
            "customer",
            "clearing_F1",
            "clearing_P1",
        ] {
            store.add_user(system_account(account));
        }

        store.add_address(DepositAddress {
            address: "btc-addr-alice".to_string(),
            username: username("alice"),
            ticker: ticker("BTC"),
            accounted_for: Quantity::ZERO,
        });

        let ledger = Rc::new(MockLedger::default());
        let engine = Rc::new(MockEngine::default());
        let peer = Rc::new(MockPeer::default());
        let webserver = Rc::new(MockWebserver::default());
        let alerts = Rc::new(MockAlerts::default());
        let mailer = Rc::new(MockMailer::default());
        let cashier = Rc::new(MockCashier::default());

        let services = Services {
            ledger: ledger_override.unwrap_or_else(|| ledger.clone()),
            engine: engine.clone(),
            peers: peer.clone(),
            webserver: webserver.clone(),
            alerts: alerts.clone(),
            mailer: mailer.clone(),
            cashier: cashier.clone(),
        };

        let accountant =
            Rc::new(Accountant::new(config, store, services).expect("config must validate"));

        Self {
            accountant,
            ledger,
            engine,
            peer,
            webserver,
            alerts,
            mailer,
            cashier,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        self.accountant.store()
    }

    /// Seed a settled position: on-record value, checkpoint, and reference
    /// price all consistent, nothing pending.
    pub fn fund(&self, user: &str, contract: &str, quantity: i64) {
        self.store().put_position(Position {
            username: username(user),
            ticker: ticker(contract),
            position: Quantity(quantity),
            reference_price: None,
            pending_postings: 0,
            position_checkpoint: Quantity(quantity),
            cp_timestamp: Some(Utc::now()),
        });
    }

    pub fn fund_with_reference(&self, user: &str, contract: &str, quantity: i64, reference: i64) {
        self.store().put_position(Position {
            username: username(user),
            ticker: ticker(contract),
            position: Quantity(quantity),
            reference_price: Some(Price(reference)),
            pending_postings: 0,
            position_checkpoint: Quantity(quantity),
            cp_timestamp: Some(Utc::now()),
        });
    }

    pub async fn position(&self, user: &str, contract: &str) -> i64 {
        self.accountant
            .get_position_value(&username(user), &ticker(contract))
            .await
            .expect("position lookup")
            .0
    }
}

/// Initialise test logging once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
