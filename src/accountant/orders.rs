use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    accountant::Accountant,
    data::{
        domain::{ContractType, OrderId, Price, Quantity, Side, Ticker, Username},
        order::{NewOrder, Order},
        user::User,
    },
    engine::EngineOrder,
    error::{ApiError, BursarResult},
    margin::Overrides,
    notify::OrderNotice,
    store::PositionStore,
};

/// An order as the webserver submits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub contract: Ticker,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl<S: PositionStore> Accountant<S> {
    /// Admit, persist, and dispatch an order.
    ///
    /// `force` skips every admission check; forced liquidation orders must
    /// cross the book regardless of the user's state.
    #[tracing::instrument(skip(self, request), fields(user = %username, contract = %request.contract, side = %request.side))]
    pub async fn place_order(
        &self,
        username: &Username,
        request: OrderRequest,
        force: bool,
    ) -> BursarResult<OrderId> {
        let user = self.user(username).await?;
        let contract = self.contract(&request.contract).await?;

        if !force {
            if self.is_clearing(&request.contract) {
                return Err(ApiError::ContractClearing.into());
            }
            if !contract.active {
                return Err(ApiError::ContractNotActive.into());
            }
            if contract.expired(Utc::now()) {
                return Err(ApiError::ContractExpired.into());
            }
            if contract.contract_type == ContractType::Cash {
                error!("webserver allowed a 'cash' contract");
                return Err(ApiError::InvalidContractType.into());
            }
            contract.validate_order(request.price, request.quantity)?;
        } else {
            info!("forcing order");
        }

        let order = self
            .store
            .insert_order(NewOrder {
                username: user.username.clone(),
                ticker: request.contract,
                side: request.side,
                price: request.price,
                quantity: request.quantity,
                timestamp: request.timestamp,
            })
            .await?;

        self.accept_order(&user, &order, force).await?;

        self.services()
            .engine
            .place_order(EngineOrder::from(&order))
            .await?;
        self.store.mark_order_dispatched(order.id).await?;

        let mut dispatched = order;
        dispatched.accepted = true;
        dispatched.dispatched = true;
        self.services()
            .webserver
            .order(username, OrderNotice::from(&dispatched));

        Ok(dispatched.id)
    }

    /// Accept the order if the user may trade it on margin; otherwise delete
    /// the row and report why.
    async fn accept_order(&self, user: &User, order: &Order, force: bool) -> BursarResult<()> {
        if force {
            info!(order = order.id.0, "forcing acceptance");
        } else {
            if !self.is_user_enabled(&user.username) {
                info!(user = %user.username, "user is disabled");
                self.discard_order(order).await;
                return Err(ApiError::DisabledUser.into());
            }

            if !user.permissions.trade {
                info!(user = %user.username, order = order.id.0, "user not permitted to trade");
                self.discard_order(order).await;
                return Err(ApiError::TradeNotPermitted.into());
            }

            // The freshly inserted row is an open order, so the margin below
            // already assumes this order rests (and fills, on the high side).
            let outcome = self.margin_for(&user.username, &Overrides::default()).await?;
            if !self.check_margin(&user.username, &outcome).await? {
                info!(order = order.id.0, "order rejected due to margin");
                self.discard_order(order).await;
                return Err(ApiError::InsufficientMargin.into());
            }
        }

        info!(order = order.id.0, "order accepted");
        self.store.mark_order_accepted(order.id).await
    }

    async fn discard_order(&self, order: &Order) {
        if let Err(e) = self.store.delete_order(order.id).await {
            error!(order = order.id.0, error = %e, "could not remove rejected order");
            self.services()
                .alerts
                .send_alert(&format!("Could not remove order: {}", order.id.0));
        }
    }

    /// Cancel an order on the user's behalf. `username` is `None` for
    /// administrator cancels, which skip the ownership check.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        username: Option<&Username>,
        id: OrderId,
    ) -> BursarResult<()> {
        let order = self
            .store
            .order(id)
            .await?
            .ok_or(ApiError::NoOrderFound)?;

        if let Some(username) = username
            && &order.username != username
        {
            return Err(ApiError::UserOrderMismatch.into());
        }

        if order.is_cancelled {
            return Err(ApiError::OrderCancelled.into());
        }

        self.services().engine.cancel_order(&order.ticker, id).await?;
        self.store.mark_order_cancelled(id).await?;

        let mut cancelled = order;
        cancelled.is_cancelled = true;
        self.services()
            .webserver
            .order(&cancelled.username, OrderNotice::from(&cancelled));
        Ok(())
    }

    /// The engine can ask us to cancel an order it never saw (it restarted
    /// while the order was in flight). Mark it cancelled unconditionally; if
    /// it was never dispatched, also tell the engine to cancel it in case it
    /// turns up in the book after the reboot.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order_engine(
        &self,
        username: Option<&Username>,
        id: OrderId,
    ) -> BursarResult<()> {
        let order = self
            .store
            .order(id)
            .await?
            .ok_or(ApiError::NoOrderFound)?;

        if let Some(username) = username
            && &order.username != username
        {
            return Err(ApiError::UserOrderMismatch.into());
        }

        if !order.dispatched
            && let Err(e) = self.services().engine.cancel_order(&order.ticker, id).await
        {
            warn!(order = id.0, error = %e, "defensive engine cancel failed");
        }

        self.store.mark_order_cancelled(id).await?;

        let mut cancelled = order;
        cancelled.is_cancelled = true;
        self.services()
            .webserver
            .order(&cancelled.username, OrderNotice::from(&cancelled));
        Ok(())
    }

    /// Cancel every open order of one user, optionally narrowed to one
    /// contract.
    pub async fn cancel_user_orders(
        &self,
        username: &Username,
        ticker: Option<&Ticker>,
    ) -> BursarResult<()> {
        let orders = self.store.open_orders(Some(username), ticker).await?;
        self.cancel_many_orders(orders).await
    }

    /// Bulk cancel with one logged retry per order. A cancel that fails
    /// twice is surrendered to the operator.
    pub(crate) async fn cancel_many_orders(&self, orders: Vec<Order>) -> BursarResult<()> {
        for order in orders {
            info!(user = %order.username, order = order.id.0, "cancelling order");
            if let Err(e) = self.cancel_order(Some(&order.username), order.id).await {
                warn!(order = order.id.0, error = %e, "cancel failed, retrying once");
                if let Err(e) = self.cancel_order(Some(&order.username), order.id).await {
                    error!(order = order.id.0, error = %e, "cancel failed twice, giving up");
                }
            }
        }
        Ok(())
    }
}
