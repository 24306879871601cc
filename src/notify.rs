use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{Direction, OrderId, PostingKind, Price, Quantity, Side, Ticker, Username},
        order::Order,
        trade::Trade,
        user::User,
    },
    posting::Posting,
};

// ================================================================================================
// Feed Payloads
// ================================================================================================

/// Order state pushed to the webserver whenever an order changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotice {
    pub id: OrderId,
    pub contract: Ticker,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub quantity_left: Quantity,
    pub accepted: bool,
    pub is_cancelled: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&Order> for OrderNotice {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            contract: order.ticker.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            quantity_left: order.quantity_left,
            accepted: order.accepted,
            is_cancelled: order.is_cancelled,
            timestamp: order.timestamp,
        }
    }
}

/// One fill on one of the user's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillNotice {
    pub contract: Ticker,
    pub id: OrderId,
    pub quantity: Quantity,
    pub price: Price,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
    pub fees: HashMap<Ticker, Quantity>,
}

/// One acknowledged posting on the user's books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNotice {
    pub contract: Ticker,
    pub timestamp: DateTime<Utc>,
    pub quantity: Quantity,
    #[serde(rename = "type")]
    pub kind: PostingKind,
    pub direction: Direction,
    pub note: String,
}

impl From<&Posting> for TransactionNotice {
    fn from(posting: &Posting) -> Self {
        Self {
            contract: posting.contract.clone(),
            timestamp: posting.timestamp,
            quantity: posting.quantity,
            kind: posting.kind,
            direction: posting.direction,
            note: posting.note.clone(),
        }
    }
}

/// A posted trade, broadcast on the contract's public feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeNotice {
    pub contract: Ticker,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl From<&Trade> for TradeNotice {
    fn from(trade: &Trade) -> Self {
        Self {
            contract: trade.ticker.clone(),
            price: trade.price,
            quantity: trade.quantity,
            timestamp: trade.timestamp,
        }
    }
}

// ================================================================================================
// Outbound Seams
// ================================================================================================

/// Push seam to the webserver's user and market feeds. Fire-and-forget.
pub trait Webserver {
    fn order(&self, username: &Username, notice: OrderNotice);
    fn fill(&self, username: &Username, notice: FillNotice);
    fn transaction(&self, username: &Username, notice: TransactionNotice);
    fn trade(&self, ticker: &Ticker, notice: TradeNotice);
}

/// Operational alerting seam. Fire-and-forget.
pub trait AlertSink {
    fn send_alert(&self, message: &str);
}

/// Outbound email seam. Fire-and-forget.
pub trait Mailer {
    fn send_mail(&self, body: &str, to: &str, subject: &str);
}

/// Push seam to the cashier for acknowledged withdrawals.
pub trait Cashier {
    fn request_withdrawal(
        &self,
        username: &Username,
        ticker: &Ticker,
        address: &str,
        amount: Quantity,
    );
}

// ================================================================================================
// Channel-Backed Feed Publisher
// ================================================================================================

/// One event on the outbound webserver feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "lowercase")]
pub enum FeedEvent {
    Order {
        username: Username,
        payload: OrderNotice,
    },
    Fill {
        username: Username,
        payload: FillNotice,
    },
    Transaction {
        username: Username,
        payload: TransactionNotice,
    },
    Trade {
        contract: Ticker,
        payload: TradeNotice,
    },
}

/// [`Webserver`] implementation fanning events out over an in-process
/// channel; the transport task on the other end forwards them to the real
/// webserver. Events are dropped with a warning if the channel backs up.
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    tx: async_channel::Sender<FeedEvent>,
}

impl FeedPublisher {
    pub fn new(capacity: usize) -> (Self, async_channel::Receiver<FeedEvent>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    fn push(&self, event: FeedEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "dropping webserver feed event");
        }
    }
}

impl Webserver for FeedPublisher {
    fn order(&self, username: &Username, payload: OrderNotice) {
        self.push(FeedEvent::Order {
            username: username.clone(),
            payload,
        });
    }

    fn fill(&self, username: &Username, payload: FillNotice) {
        self.push(FeedEvent::Fill {
            username: username.clone(),
            payload,
        });
    }

    fn transaction(&self, username: &Username, payload: TransactionNotice) {
        self.push(FeedEvent::Transaction {
            username: username.clone(),
            payload,
        });
    }

    fn trade(&self, contract: &Ticker, payload: TradeNotice) {
        self.push(FeedEvent::Trade {
            contract: contract.clone(),
            payload,
        });
    }
}

// ================================================================================================
// Mail Bodies
// ================================================================================================

/// Localized fill notification. Returns `(subject, body)`.
pub fn fill_mail(user: &User, notice: &FillNotice) -> (String, String) {
    match user.locale.as_str() {
        "es" => (
            "Notificación de ejecución de orden".to_string(),
            format!(
                "Hola {},\n\nSu orden {} en {} se ejecutó: {} {} a {}.\n",
                user.nickname,
                notice.id.0,
                notice.contract,
                notice.side,
                notice.quantity.0,
                notice.price.0,
            ),
        ),
        _ => (
            "Order fill notification".to_string(),
            format!(
                "Hello {},\n\nYour order {} on {} filled: {} {} at {}.\n",
                user.nickname,
                notice.id.0,
                notice.contract,
                notice.side,
                notice.quantity.0,
                notice.price.0,
            ),
        ),
    }
}

/// Localized excess-deposit notification. Returns `(subject, body)`.
pub fn deposit_overflow_mail(user: &User, ticker: &Ticker, amount: Quantity) -> (String, String) {
    match user.locale.as_str() {
        "es" => (
            "Su depósito no fue procesado por completo".to_string(),
            format!(
                "Hola {},\n\n{} {} de su depósito excedió su límite y fue retenido.\n",
                user.nickname, amount.0, ticker,
            ),
        ),
        _ => (
            "Your deposit was not fully processed".to_string(),
            format!(
                "Hello {},\n\n{} {} of your deposit exceeded your limit and was held back.\n",
                user.nickname, amount.0, ticker,
            ),
        ),
    }
}
