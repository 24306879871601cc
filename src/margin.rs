use std::collections::HashMap;

use crate::{
    data::{
        contract::Contract,
        domain::{ContractType, Price, Quantity, Side, Ticker},
        order::Order,
        position::Position,
    },
    error::{BursarResult, SystemError},
};

/// The result of one margin evaluation, in minor units of the margin
/// currency.
///
/// `low_margin` assumes every resting order is cancelled; `high_margin`
/// assumes they all fill. Admission requires the high margin to stay within
/// the user's cash position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginOutcome {
    pub low_margin: Quantity,
    pub high_margin: Quantity,
    pub max_cash_spent: Quantity,
}

impl MarginOutcome {
    /// Margin holds iff the worst-case requirement is covered by cash.
    pub fn check(&self, cash_position: Quantity) -> bool {
        self.high_margin <= cash_position
    }
}

/// A hypothetical position used when evaluating "what if" margins.
#[derive(Debug, Clone, Copy)]
pub struct PositionOverride {
    pub position: Quantity,
    pub reference_price: Option<Price>,
}

/// Hypotheticals layered over the snapshot: replaced positions, replaced
/// cash balances, and prospective withdrawals.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub positions: HashMap<Ticker, PositionOverride>,
    pub cash: HashMap<Ticker, Quantity>,
    pub withdrawals: HashMap<Ticker, Quantity>,
}

/// Everything one margin evaluation reads. Pure data; the accountant
/// assembles it from the store so this module stays synchronous and
/// testable.
#[derive(Debug)]
pub struct MarginSnapshot<'a> {
    pub positions: &'a [Position],
    pub open_orders: &'a [Order],
    pub contracts: &'a HashMap<Ticker, Contract>,
    pub safe_prices: &'a HashMap<Ticker, Price>,
    pub margin_ticker: &'a Ticker,
}

impl MarginSnapshot<'_> {
    fn contract(&self, ticker: &Ticker) -> BursarResult<&Contract> {
        self.contracts.get(ticker).ok_or_else(|| {
            SystemError::InvariantViolation(format!("margin snapshot is missing contract {ticker}"))
                .into()
        })
    }

    fn safe_price(&self, ticker: &Ticker) -> BursarResult<Price> {
        self.safe_prices
            .get(ticker)
            .copied()
            .ok_or_else(|| SystemError::NoSafePrice(ticker.to_string()).into())
    }
}

/// Compute `(low_margin, high_margin, max_cash_spent)` for one user.
///
/// Contract shapes:
/// - cash balances contribute directly (they are what margin is checked
///   against, not a requirement);
/// - a prediction position of `q` locks `|q| * denominator` of cash — the
///   premium a short collected is already sitting in their cash position, so
///   the check nets it out;
/// - a futures position margins at `margin_bps` of notional at the safe
///   price, low and high rates from the contract;
/// - resting orders enter the high margin as if they fill completely.
pub fn calculate(snapshot: &MarginSnapshot, overrides: &Overrides) -> BursarResult<MarginOutcome> {
    let mut low: i64 = 0;
    let mut high: i64 = 0;
    let mut max_cash_spent: i64 = 0;
    let mut uncovered_withdrawal = false;

    // Effective positions with overrides applied.
    let mut positions: HashMap<&Ticker, PositionOverride> = snapshot
        .positions
        .iter()
        .map(|p| {
            (
                &p.ticker,
                PositionOverride {
                    position: p.position,
                    reference_price: p.reference_price,
                },
            )
        })
        .collect();
    for (ticker, over) in &overrides.positions {
        positions.insert(ticker, *over);
    }

    // Effective cash balances (cash contracts only) with overrides applied.
    let mut cash: HashMap<&Ticker, Quantity> = HashMap::new();
    for (ticker, over) in &positions {
        let contract = snapshot.contract(ticker)?;
        if contract.contract_type == ContractType::Cash {
            cash.insert(ticker, over.position);
        }
    }
    for (ticker, amount) in &overrides.cash {
        cash.insert(ticker, *amount);
    }

    // Requirements of held derivative positions.
    for (ticker, over) in &positions {
        let contract = snapshot.contract(ticker)?;
        match contract.contract_type {
            ContractType::Cash | ContractType::CashPair => {}
            ContractType::Prediction => {
                let locked = contract
                    .cash_spent(Price(contract.denominator), over.position.abs())?
                    .0;
                low = low.saturating_add(locked);
                high = high.saturating_add(locked);
            }
            ContractType::Futures => {
                let safe = snapshot.safe_price(ticker)?;
                let notional = contract.cash_spent(safe, over.position.abs())?.0;
                low = low.saturating_add(notional * contract.margin_low_bps / 10_000);
                high = high.saturating_add(notional * contract.margin_high_bps / 10_000);
            }
        }
    }

    // Worst-case contribution of resting orders.
    for order in snapshot.open_orders.iter().filter(|o| o.is_open()) {
        let contract = snapshot.contract(&order.ticker)?;
        match contract.contract_type {
            ContractType::Cash => {}
            ContractType::Prediction => {
                let locked = contract
                    .cash_spent(Price(contract.denominator), order.quantity_left)?
                    .0;
                high = high.saturating_add(locked);
                if order.side == Side::Buy {
                    let cost = contract.cash_spent(order.price, order.quantity_left)?.0;
                    high = high.saturating_add(cost);
                    max_cash_spent = max_cash_spent.saturating_add(cost);
                }
            }
            ContractType::Futures => {
                let safe = snapshot.safe_price(&order.ticker)?;
                let notional = contract.cash_spent(safe, order.quantity_left)?.0;
                high = high.saturating_add(notional * contract.margin_high_bps / 10_000);
            }
            ContractType::CashPair => match order.side {
                Side::Buy => {
                    let cost = contract.cash_spent(order.price, order.quantity_left)?.0;
                    max_cash_spent = max_cash_spent.saturating_add(cost);
                    if contract.denominated_ticker() == snapshot.margin_ticker {
                        high = high.saturating_add(cost);
                    }
                }
                Side::Sell => {
                    if contract.payout_ticker() == snapshot.margin_ticker {
                        high = high.saturating_add(order.quantity_left.0);
                    }
                }
            },
        }
    }

    // Prospective withdrawals.
    for (ticker, amount) in &overrides.withdrawals {
        if ticker == snapshot.margin_ticker {
            low = low.saturating_add(amount.0);
            high = high.saturating_add(amount.0);
        } else {
            // Withdrawing another currency: the balance there must cover it.
            let balance = cash.get(ticker).copied().unwrap_or(Quantity::ZERO);
            if *amount > balance {
                uncovered_withdrawal = true;
            }
        }
    }

    if uncovered_withdrawal {
        high = i64::MAX;
    }

    Ok(MarginOutcome {
        low_margin: Quantity(low),
        high_margin: Quantity(high),
        max_cash_spent: Quantity(max_cash_spent),
    })
}
