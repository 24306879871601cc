use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::domain::{ContractType, Price, Quantity, Ticker},
    error::{ApiError, BursarResult, SystemError},
};

/// Immutable-per-lifetime descriptor of a tradable or bookable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub ticker: Ticker,
    pub contract_type: ContractType,
    pub active: bool,
    /// Order prices must be non-negative multiples of this.
    pub tick_size: i64,
    /// Cash-pair quantities must be multiples of this; also the unit divisor
    /// of the cash-spent calculation.
    pub lot_size: i64,
    /// Upper bound of prediction prices. The payout per contract at full win.
    pub denominator: i64,
    /// The currency derivative cashflows settle in. `None` for cash.
    pub denominated_ticker: Option<Ticker>,
    /// The instrument delivered by a fill. `None` for cash; futures pay out
    /// in the contract itself.
    pub payout_ticker: Option<Ticker>,
    pub expiration: Option<DateTime<Utc>>,
    /// Base trade fee in basis points of cash spent.
    pub trade_fee_bps: i64,
    /// Flat withdrawal fee in minor units of this contract.
    pub withdraw_fee: i64,
    /// Base deposit fee in basis points of the deposited amount.
    pub deposit_fee_bps: i64,
    /// Futures margin rates in basis points of notional at the safe price.
    pub margin_high_bps: i64,
    pub margin_low_bps: i64,
}

impl Contract {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|e| e <= now)
    }

    /// The currency this contract's cashflows happen in. Cash contracts
    /// denominate themselves.
    pub fn denominated_ticker(&self) -> &Ticker {
        self.denominated_ticker.as_ref().unwrap_or(&self.ticker)
    }

    /// The instrument credited on a fill. Futures positions live on the
    /// contract itself.
    pub fn payout_ticker(&self) -> &Ticker {
        match self.contract_type {
            ContractType::Futures => &self.ticker,
            _ => self.payout_ticker.as_ref().unwrap_or(&self.ticker),
        }
    }

    /// Cash moved by `quantity` units at `price`, in denominated minor units.
    ///
    /// `quantity` may be signed; the sign carries through. Division by the
    /// lot size is exact for admitted orders (quantity is lot-aligned), and
    /// truncates toward zero otherwise.
    pub fn cash_spent(&self, price: Price, quantity: Quantity) -> BursarResult<Quantity> {
        let gross = price.0.checked_mul(quantity.0).ok_or_else(|| {
            SystemError::Overflow(format!(
                "cash spent: {} x {} on {}",
                price.0, quantity.0, self.ticker
            ))
        })?;
        Ok(Quantity(gross / self.lot_size.max(1)))
    }

    /// Admission checks 5-7: tick alignment, positivity, the prediction
    /// price band, and cash-pair lot alignment.
    pub fn validate_order(&self, price: Price, quantity: Quantity) -> Result<(), ApiError> {
        if price.0 % self.tick_size != 0 || price.0 < 0 || quantity.0 <= 0 {
            return Err(ApiError::InvalidPriceQuantity);
        }

        if self.contract_type == ContractType::Prediction
            && !(0..=self.denominator).contains(&price.0)
        {
            return Err(ApiError::InvalidPriceQuantity);
        }

        if self.contract_type == ContractType::CashPair && quantity.0 % self.lot_size != 0 {
            return Err(ApiError::InvalidPriceQuantity);
        }

        Ok(())
    }
}
