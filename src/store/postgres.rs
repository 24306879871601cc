use std::{cell::RefCell, collections::HashMap};

use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};

use crate::{
    data::{
        contract::Contract,
        domain::{OrderId, Price, Quantity, Ticker, Username},
        order::{NewOrder, Order},
        position::Position,
        trade::Trade,
        user::{DepositAddress, FeeGroup, NotificationPref, Permissions, User},
    },
    error::{BursarResult, StorageError},
    store::PositionStore,
};

/// DDL for a fresh deployment. Applied by [`PgStore::migrate`].
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS permission_groups (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    trade BOOLEAN NOT NULL DEFAULT FALSE,
    withdraw BOOLEAN NOT NULL DEFAULT FALSE,
    deposit BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS fee_groups (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    aggressive_factor BIGINT NOT NULL DEFAULT 100,
    passive_factor BIGINT NOT NULL DEFAULT 100,
    withdraw_factor BIGINT NOT NULL DEFAULT 100,
    deposit_factor BIGINT NOT NULL DEFAULT 100
);

CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    user_type TEXT NOT NULL,
    permission_group_id BIGINT NOT NULL REFERENCES permission_groups(id),
    fee_group_id BIGINT NOT NULL REFERENCES fee_groups(id),
    locale TEXT NOT NULL DEFAULT 'en',
    email TEXT NOT NULL DEFAULT '',
    nickname TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS user_notifications (
    username TEXT NOT NULL REFERENCES users(username),
    kind TEXT NOT NULL,
    method TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contracts (
    ticker TEXT PRIMARY KEY,
    contract_type TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    tick_size BIGINT NOT NULL DEFAULT 1,
    lot_size BIGINT NOT NULL DEFAULT 1,
    denominator BIGINT NOT NULL DEFAULT 1,
    denominated_ticker TEXT,
    payout_ticker TEXT,
    expiration TIMESTAMPTZ,
    trade_fee_bps BIGINT NOT NULL DEFAULT 0,
    withdraw_fee BIGINT NOT NULL DEFAULT 0,
    deposit_fee_bps BIGINT NOT NULL DEFAULT 0,
    margin_high_bps BIGINT NOT NULL DEFAULT 0,
    margin_low_bps BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS positions (
    username TEXT NOT NULL REFERENCES users(username),
    ticker TEXT NOT NULL REFERENCES contracts(ticker),
    position BIGINT NOT NULL DEFAULT 0,
    reference_price BIGINT,
    pending_postings BIGINT NOT NULL DEFAULT 0,
    position_checkpoint BIGINT NOT NULL DEFAULT 0,
    cp_timestamp TIMESTAMPTZ,
    PRIMARY KEY (username, ticker)
);

CREATE TABLE IF NOT EXISTS orders (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL REFERENCES users(username),
    ticker TEXT NOT NULL REFERENCES contracts(ticker),
    side TEXT NOT NULL,
    price BIGINT NOT NULL,
    quantity BIGINT NOT NULL,
    quantity_left BIGINT NOT NULL,
    accepted BOOLEAN NOT NULL DEFAULT FALSE,
    dispatched BOOLEAN NOT NULL DEFAULT FALSE,
    is_cancelled BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    aggressive_order BIGINT NOT NULL,
    passive_order BIGINT NOT NULL,
    ticker TEXT NOT NULL,
    price BIGINT NOT NULL,
    quantity BIGINT NOT NULL,
    posted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (aggressive_order, passive_order)
);

CREATE TABLE IF NOT EXISTS addresses (
    address TEXT PRIMARY KEY,
    username TEXT NOT NULL REFERENCES users(username),
    ticker TEXT NOT NULL REFERENCES contracts(ticker),
    accounted_for BIGINT NOT NULL DEFAULT 0
);
"#;

const USER_COLUMNS: &str = r#"
    u.username, u.user_type, u.permission_group_id, u.fee_group_id,
    u.locale, u.email, u.nickname,
    p.trade, p.withdraw, p.deposit
"#;

/// PostgreSQL-backed [`PositionStore`].
///
/// Contracts and fee groups are hot-path lookups and close to immutable, so
/// they are cached per process; the administrator's reload operations drop
/// the cache entry.
#[derive(Debug)]
pub struct PgStore {
    pool: PgPool,
    contract_cache: RefCell<HashMap<Ticker, Contract>>,
    fee_group_cache: RefCell<HashMap<i64, FeeGroup>>,
}

impl PgStore {
    pub async fn connect(uri: &str) -> BursarResult<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(uri).await?;
        Ok(Self {
            pool,
            contract_cache: RefCell::new(HashMap::new()),
            fee_group_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Apply the schema to a fresh database. Idempotent.
    pub async fn migrate(&self) -> BursarResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn notifications_for(&self, username: &Username) -> BursarResult<Vec<NotificationPref>> {
        let rows = sqlx::query("SELECT kind, method FROM user_notifications WHERE username = $1")
            .bind(username.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn fee_group(&self, id: i64) -> BursarResult<FeeGroup> {
        if let Some(group) = self.fee_group_cache.borrow().get(&id) {
            return Ok(group.clone());
        }

        let row = sqlx::query("SELECT * FROM fee_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("fee group {id}")))?;
        let group = FeeGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            aggressive_factor: row.try_get("aggressive_factor")?,
            passive_factor: row.try_get("passive_factor")?,
            withdraw_factor: row.try_get("withdraw_factor")?,
            deposit_factor: row.try_get("deposit_factor")?,
        };
        self.fee_group_cache.borrow_mut().insert(id, group.clone());
        Ok(group)
    }

    async fn user_row(&self, row: &PgRow) -> BursarResult<User> {
        let mut user = user_from_row(row)?;
        user.fee_group = self.fee_group(row.try_get("fee_group_id")?).await?;
        user.notifications = self.notifications_for(&user.username).await?;
        Ok(user)
    }
}

fn parse_error(what: &str, value: &str) -> StorageError {
    StorageError::Database(format!("unparsable {what}: '{value}'"))
}

fn notification_from_row(row: &PgRow) -> BursarResult<NotificationPref> {
    let kind: String = row.try_get("kind")?;
    let method: String = row.try_get("method")?;
    Ok(NotificationPref {
        kind: kind
            .parse()
            .map_err(|_| parse_error("notification kind", &kind))?,
        method: method
            .parse()
            .map_err(|_| parse_error("notification method", &method))?,
    })
}

fn user_from_row(row: &PgRow) -> BursarResult<User> {
    let user_type: String = row.try_get("user_type")?;
    Ok(User {
        username: Username::new(row.try_get::<String, _>("username")?),
        user_type: user_type
            .parse()
            .map_err(|_| parse_error("user type", &user_type))?,
        permissions: Permissions {
            trade: row.try_get("trade")?,
            withdraw: row.try_get("withdraw")?,
            deposit: row.try_get("deposit")?,
        },
        permission_group_id: row.try_get("permission_group_id")?,
        fee_group: FeeGroup::default(),
        locale: row.try_get("locale")?,
        email: row.try_get("email")?,
        nickname: row.try_get("nickname")?,
        notifications: Vec::new(),
    })
}

fn contract_from_row(row: &PgRow) -> BursarResult<Contract> {
    let contract_type: String = row.try_get("contract_type")?;
    Ok(Contract {
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
        contract_type: contract_type
            .parse()
            .map_err(|_| parse_error("contract type", &contract_type))?,
        active: row.try_get("active")?,
        tick_size: row.try_get("tick_size")?,
        lot_size: row.try_get("lot_size")?,
        denominator: row.try_get("denominator")?,
        denominated_ticker: row
            .try_get::<Option<String>, _>("denominated_ticker")?
            .map(Ticker::new),
        payout_ticker: row
            .try_get::<Option<String>, _>("payout_ticker")?
            .map(Ticker::new),
        expiration: row.try_get("expiration")?,
        trade_fee_bps: row.try_get("trade_fee_bps")?,
        withdraw_fee: row.try_get("withdraw_fee")?,
        deposit_fee_bps: row.try_get("deposit_fee_bps")?,
        margin_high_bps: row.try_get("margin_high_bps")?,
        margin_low_bps: row.try_get("margin_low_bps")?,
    })
}

fn position_from_row(row: &PgRow) -> BursarResult<Position> {
    Ok(Position {
        username: Username::new(row.try_get::<String, _>("username")?),
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
        position: Quantity(row.try_get("position")?),
        reference_price: row.try_get::<Option<i64>, _>("reference_price")?.map(Price),
        pending_postings: row.try_get("pending_postings")?,
        position_checkpoint: Quantity(row.try_get("position_checkpoint")?),
        cp_timestamp: row.try_get("cp_timestamp")?,
    })
}

fn order_from_row(row: &PgRow) -> BursarResult<Order> {
    let side: String = row.try_get("side")?;
    Ok(Order {
        id: OrderId(row.try_get("id")?),
        username: Username::new(row.try_get::<String, _>("username")?),
        ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
        side: side.parse().map_err(|_| parse_error("side", &side))?,
        price: Price(row.try_get("price")?),
        quantity: Quantity(row.try_get("quantity")?),
        quantity_left: Quantity(row.try_get("quantity_left")?),
        accepted: row.try_get("accepted")?,
        dispatched: row.try_get("dispatched")?,
        is_cancelled: row.try_get("is_cancelled")?,
        timestamp: row.try_get("created_at")?,
    })
}

impl PositionStore for PgStore {
    // === Users & Contracts ===

    async fn user(&self, username: &Username) -> BursarResult<User> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u \
             JOIN permission_groups p ON p.id = u.permission_group_id \
             WHERE u.username = $1"
        );
        let row = sqlx::query(&query)
            .bind(username.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {username}")))?;
        self.user_row(&row).await
    }

    async fn users(&self) -> BursarResult<Vec<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u \
             JOIN permission_groups p ON p.id = u.permission_group_id"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(self.user_row(row).await?);
        }
        Ok(users)
    }

    async fn contract(&self, ticker: &Ticker) -> BursarResult<Contract> {
        if let Some(contract) = self.contract_cache.borrow().get(ticker) {
            return Ok(contract.clone());
        }

        let row = sqlx::query("SELECT * FROM contracts WHERE ticker = $1")
            .bind(ticker.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("contract {ticker}")))?;
        let contract = contract_from_row(&row)?;
        self.contract_cache
            .borrow_mut()
            .insert(ticker.clone(), contract.clone());
        Ok(contract)
    }

    async fn active_contracts(&self) -> BursarResult<Vec<Contract>> {
        let rows = sqlx::query("SELECT * FROM contracts WHERE active")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(contract_from_row).collect()
    }

    async fn set_permission_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        let result = sqlx::query("UPDATE users SET permission_group_id = $1 WHERE username = $2")
            .bind(group_id)
            .bind(username.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {username}")).into());
        }
        Ok(())
    }

    async fn set_fee_group(&self, username: &Username, group_id: i64) -> BursarResult<()> {
        let result = sqlx::query("UPDATE users SET fee_group_id = $1 WHERE username = $2")
            .bind(group_id)
            .bind(username.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {username}")).into());
        }
        Ok(())
    }

    async fn refresh_fee_group(&self, group_id: i64) -> BursarResult<()> {
        self.fee_group_cache.borrow_mut().remove(&group_id);
        Ok(())
    }

    async fn refresh_contract(&self, ticker: &Ticker) -> BursarResult<()> {
        self.contract_cache.borrow_mut().remove(ticker);
        Ok(())
    }

    // === Positions ===

    async fn get_or_create_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        reference_price: Option<Price>,
    ) -> BursarResult<Position> {
        // Upsert the zero row, then settle the reference price only if the
        // row has none yet.
        sqlx::query(
            "INSERT INTO positions (username, ticker, reference_price) VALUES ($1, $2, $3) \
             ON CONFLICT (username, ticker) DO UPDATE \
             SET reference_price = COALESCE(positions.reference_price, EXCLUDED.reference_price)",
        )
        .bind(username.as_str())
        .bind(ticker.as_str())
        .bind(reference_price.map(|p| p.0))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM positions WHERE username = $1 AND ticker = $2")
            .bind(username.as_str())
            .bind(ticker.as_str())
            .fetch_one(&self.pool)
            .await?;
        position_from_row(&row)
    }

    async fn position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE username = $1 AND ticker = $2")
            .bind(username.as_str())
            .bind(ticker.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn position_value(&self, username: &Username, ticker: &Ticker) -> BursarResult<Quantity> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT position FROM positions WHERE username = $1 AND ticker = $2",
        )
        .bind(username.as_str())
        .bind(ticker.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(Quantity(value.unwrap_or(0)))
    }

    async fn positions_for_user(&self, username: &Username) -> BursarResult<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE username = $1")
            .bind(username.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn positions_on_contract(&self, ticker: &Ticker) -> BursarResult<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE ticker = $1")
            .bind(ticker.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn bump_pending(&self, keys: &[(Username, Ticker)], delta: i64) -> BursarResult<()> {
        let mut tx = self.pool.begin().await?;
        for (username, ticker) in keys {
            sqlx::query(
                "INSERT INTO positions (username, ticker, pending_postings) \
                 VALUES ($1, $2, GREATEST($3, 0)) \
                 ON CONFLICT (username, ticker) DO UPDATE \
                 SET pending_postings = GREATEST(positions.pending_postings + $3, 0)",
            )
            .bind(username.as_str())
            .bind(ticker.as_str())
            .bind(delta)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn apply_delta(
        &self,
        username: &Username,
        ticker: &Ticker,
        delta: Quantity,
    ) -> BursarResult<()> {
        sqlx::query(
            "INSERT INTO positions (username, ticker, position) VALUES ($1, $2, $3) \
             ON CONFLICT (username, ticker) DO UPDATE \
             SET position = positions.position + $3",
        )
        .bind(username.as_str())
        .bind(ticker.as_str())
        .bind(delta.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_reference_price(
        &self,
        username: &Username,
        ticker: &Ticker,
        price: Price,
    ) -> BursarResult<()> {
        sqlx::query("UPDATE positions SET reference_price = $1 WHERE username = $2 AND ticker = $3")
            .bind(price.0)
            .bind(username.as_str())
            .bind(ticker.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_for_user(&self, username: &Username) -> BursarResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(pending_postings) FROM positions WHERE username = $1",
        )
        .bind(username.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    async fn pending_on_contract(&self, ticker: &Ticker, owners: &[Username]) -> BursarResult<i64> {
        let names: Vec<&str> = owners.iter().map(Username::as_str).collect();
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(pending_postings) FROM positions \
             WHERE ticker = $1 AND username = ANY($2)",
        )
        .bind(ticker.as_str())
        .bind(&names)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    async fn reset_pending_for_user(&self, username: &Username) -> BursarResult<()> {
        sqlx::query("UPDATE positions SET pending_postings = 0 WHERE username = $1")
            .bind(username.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn checkpoint_position(
        &self,
        username: &Username,
        ticker: &Ticker,
        position: Quantity,
        at: DateTime<Utc>,
    ) -> BursarResult<()> {
        sqlx::query(
            "UPDATE positions \
             SET position = $1, position_checkpoint = $1, cp_timestamp = $2 \
             WHERE username = $3 AND ticker = $4",
        )
        .bind(position.0)
        .bind(at)
        .bind(username.as_str())
        .bind(ticker.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // === Orders ===

    async fn insert_order(&self, order: NewOrder) -> BursarResult<Order> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (username, ticker, side, price, quantity, quantity_left, created_at) \
             VALUES ($1, $2, $3, $4, $5, $5, $6) RETURNING id",
        )
        .bind(order.username.as_str())
        .bind(order.ticker.as_str())
        .bind(order.side.to_string())
        .bind(order.price.0)
        .bind(order.quantity.0)
        .bind(order.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(Order {
            id: OrderId(id),
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
        })
    }

    async fn delete_order(&self, id: OrderId) -> BursarResult<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> BursarResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn mark_order_accepted(&self, id: OrderId) -> BursarResult<()> {
        sqlx::query("UPDATE orders SET accepted = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_order_dispatched(&self, id: OrderId) -> BursarResult<()> {
        sqlx::query("UPDATE orders SET dispatched = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_order_cancelled(&self, id: OrderId) -> BursarResult<()> {
        sqlx::query("UPDATE orders SET is_cancelled = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reduce_order_quantity(&self, id: OrderId, fill: Quantity) -> BursarResult<Order> {
        let row = sqlx::query(
            "UPDATE orders SET quantity_left = quantity_left - $1 WHERE id = $2 RETURNING *",
        )
        .bind(fill.0)
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;
        order_from_row(&row)
    }

    async fn open_orders(
        &self,
        username: Option<&Username>,
        ticker: Option<&Ticker>,
    ) -> BursarResult<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders \
             WHERE quantity_left > 0 AND NOT is_cancelled \
             AND ($1::TEXT IS NULL OR username = $1) \
             AND ($2::TEXT IS NULL OR ticker = $2)",
        )
        .bind(username.map(Username::as_str))
        .bind(ticker.map(Ticker::as_str))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    // === Trades ===

    async fn insert_trade(&self, trade: Trade) -> BursarResult<()> {
        sqlx::query(
            "INSERT INTO trades \
             (aggressive_order, passive_order, ticker, price, quantity, posted, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(trade.aggressive_order.0)
        .bind(trade.passive_order.0)
        .bind(trade.ticker.as_str())
        .bind(trade.price.0)
        .bind(trade.quantity.0)
        .bind(trade.posted)
        .bind(trade.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_trade_posted(
        &self,
        aggressive_order: OrderId,
        passive_order: OrderId,
    ) -> BursarResult<()> {
        sqlx::query(
            "UPDATE trades SET posted = TRUE WHERE aggressive_order = $1 AND passive_order = $2",
        )
        .bind(aggressive_order.0)
        .bind(passive_order.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // === Deposit Addresses ===

    async fn deposit_address(&self, address: &str) -> BursarResult<DepositAddress> {
        let row = sqlx::query("SELECT * FROM addresses WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("address {address}")))?;

        Ok(DepositAddress {
            address: row.try_get("address")?,
            username: Username::new(row.try_get::<String, _>("username")?),
            ticker: Ticker::new(row.try_get::<String, _>("ticker")?),
            accounted_for: Quantity(row.try_get("accounted_for")?),
        })
    }

    async fn set_accounted_for(&self, address: &str, accounted_for: Quantity) -> BursarResult<()> {
        let result = sqlx::query("UPDATE addresses SET accounted_for = $1 WHERE address = $2")
            .bind(accounted_for.0)
            .bind(address)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("address {address}")).into());
        }
        Ok(())
    }
}
