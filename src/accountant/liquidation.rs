use std::collections::HashMap;

use chrono::Utc;
use itertools::Itertools;
use tracing::{error, info, warn};

use crate::{
    accountant::{Accountant, orders::OrderRequest},
    data::{
        domain::{ContractType, OrderId, Price, Quantity, Side, Ticker, Username},
        position::Position,
    },
    engine::OrderBook,
    error::{ApiError, BursarResult},
    margin::{Overrides, PositionOverride},
    store::PositionStore,
};

impl<S: PositionStore> Accountant<S> {
    /// Place the forced market-style order that closes out a position: a
    /// sell at zero, or a buy at the highest price the contract can express.
    pub(crate) async fn place_liquidation_order(
        &self,
        position: &Position,
        quantity: Option<Quantity>,
    ) -> BursarResult<Option<OrderId>> {
        if position.position.is_zero() {
            info!(user = %position.username, contract = %position.ticker, "position is zero, not placing order");
            return Ok(None);
        }

        let (side, quantity, price) = if position.position > Quantity::ZERO {
            (
                Side::Sell,
                quantity.unwrap_or(position.position),
                Price(0),
            )
        } else {
            let contract = self.contract(&position.ticker).await?;
            let price = match contract.contract_type {
                ContractType::Prediction => Price(contract.denominator),
                ContractType::Futures => Price(i64::MAX),
                _ => return Err(ApiError::InvalidContractType.into()),
            };
            (Side::Buy, quantity.unwrap_or(-position.position), price)
        };

        let request = OrderRequest {
            contract: position.ticker.clone(),
            side,
            price,
            quantity,
            timestamp: Utc::now(),
        };
        info!(user = %position.username, ?request, "placing liquidation order");
        let id = self
            .place_order(&position.username, request, true)
            .await?;
        Ok(Some(id))
    }

    /// Forced unwind of one position: cancel the user's orders on the
    /// contract, wait until the position is quiescent, then cross the book.
    #[tracing::instrument(skip(self), fields(user = %username, contract = %ticker))]
    pub async fn liquidate_position(
        &self,
        username: &Username,
        ticker: &Ticker,
    ) -> BursarResult<Option<OrderId>> {
        info!("liquidating position");
        self.user(username).await?;
        self.contract(ticker).await?;

        self.cancel_user_orders(username, Some(ticker)).await?;
        info!("cancels done");

        // Wait for quiescence, then place the closing order. No branch skips
        // the order once pending postings drain.
        loop {
            let Some(position) = self.store.position(username, ticker).await? else {
                return Ok(None);
            };
            if position.is_quiescent() {
                return self.place_liquidation_order(&position, None).await;
            }
            info!(
                pending = position.pending_postings,
                "waiting for posting quiescence"
            );
            tokio::time::sleep(self.config().quiescence_poll()).await;
        }
    }

    /// Liquidate every derivative position of the user, disabling them for
    /// the duration.
    #[tracing::instrument(skip(self), fields(user = %username))]
    pub async fn liquidate_all(&self, username: &Username) -> BursarResult<()> {
        self.disable_user(username).await;

        let result = self.liquidate_all_inner(username).await;

        self.enable_user(username);
        result
    }

    async fn liquidate_all_inner(&self, username: &Username) -> BursarResult<()> {
        for position in self.store.positions_for_user(username).await? {
            let contract = self.contract(&position.ticker).await?;
            if !contract.contract_type.is_derivative() {
                continue;
            }
            self.liquidate_position(username, &position.ticker).await?;
        }
        Ok(())
    }

    /// Reduce the single position whose unwind frees the most margin per
    /// unit of spread crossed, by one unit.
    #[tracing::instrument(skip(self), fields(user = %username))]
    pub async fn liquidate_best(&self, username: &Username) -> BursarResult<Option<OrderId>> {
        self.user(username).await?;
        self.cancel_user_orders(username, None).await?;
        info!("cancels done");

        loop {
            let pending = self.store.pending_for_user(username).await?;
            if pending == 0 {
                break;
            }
            info!(pending, "waiting for posting quiescence");
            tokio::time::sleep(self.config().quiescence_poll()).await;
        }

        let mut candidates = Vec::new();
        for position in self.store.positions_for_user(username).await? {
            if position.position.is_zero() {
                continue;
            }
            let contract = self.contract(&position.ticker).await?;
            if !contract.contract_type.is_derivative() {
                continue;
            }
            candidates.push(position);
        }

        let mut books: HashMap<Ticker, OrderBook> = HashMap::new();
        for ticker in candidates.iter().map(|p| p.ticker.clone()).unique() {
            let book = self.services().engine.order_book(&ticker).await?;
            books.insert(ticker, book);
        }

        let mut best: Option<(i64, &Position)> = None;
        for position in &candidates {
            let book = &books[&position.ticker];
            let value = match self.liquidation_value(position, Quantity(1), book).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(contract = %position.ticker, error = %e, "could not value a liquidation, skipping");
                    continue;
                }
            };
            info!(contract = %position.ticker, value, "liquidation value");
            if best.is_none_or(|(best_value, _)| value > best_value) {
                best = Some((value, position));
            }
        }

        match best {
            Some((_, position)) => {
                self.place_liquidation_order(position, Some(Quantity(1)))
                    .await
            }
            None => {
                error!("no positions to choose from");
                Ok(None)
            }
        }
    }

    /// Margin freed by closing `quantity` units, per unit of half-spread
    /// paid to cross. Purely a ranking heuristic; the only floating point in
    /// the book-keeper, truncated back to an integer.
    pub(crate) async fn liquidation_value(
        &self,
        position: &Position,
        quantity: Quantity,
        book: &OrderBook,
    ) -> BursarResult<i64> {
        let contract = self.contract(&position.ticker).await?;

        // Closing direction: buy back shorts at the ask, sell longs at the bid.
        let sign: i64 = if position.position.is_negative() { 1 } else { -1 };
        let signed_quantity = Quantity(quantity.0 * sign);
        let trade_price = if sign == 1 {
            book.best_ask()
        } else {
            book.best_bid()
        };

        let cash_spent = if contract.contract_type == ContractType::Futures {
            let reference = position.reference_price.unwrap_or(trade_price);
            contract.cash_spent(trade_price - reference, signed_quantity)?
        } else {
            contract.cash_spent(trade_price, signed_quantity)?
        };

        let cash_position = self
            .store
            .position_value(&position.username, contract.denominated_ticker())
            .await?;

        let overrides = Overrides {
            positions: HashMap::from([(
                position.ticker.clone(),
                PositionOverride {
                    position: position.position + signed_quantity,
                    reference_price: position.reference_price,
                },
            )]),
            cash: HashMap::from([(
                contract.denominated_ticker().clone(),
                cash_position - cash_spent,
            )]),
            ..Overrides::default()
        };

        let current = self.margin_for(&position.username, &Overrides::default()).await?;
        let reduced = self.margin_for(&position.username, &overrides).await?;
        let margin_saved = current.low_margin.0 - reduced.low_margin.0;

        let half_spread = book.half_spread();
        if half_spread <= 0.0 {
            return Ok(0);
        }
        Ok((margin_saved as f64 / half_spread) as i64)
    }
}
