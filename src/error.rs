use std::time::Duration;

use strum::IntoStaticStr;
use thiserror::Error;

pub type BursarResult<T> = Result<T, BursarError>;

#[derive(Debug, Error)]
pub enum BursarError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerFault),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    System(#[from] SystemError),
}

impl BursarError {
    /// Stable identifier suitable for RPC clients.
    pub fn code(&self) -> &'static str {
        match self {
            BursarError::Api(e) => e.code(),
            BursarError::Storage(_) => "storage_error",
            BursarError::Ledger(e) => e.code(),
            BursarError::Engine(_) => "rpc_error",
            BursarError::System(_) => "internal_error",
        }
    }
}

/// Precondition violations reported back to the RPC caller.
///
/// The offending entity (e.g. a rejected order) is removed from persistent
/// state before one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ApiError {
    #[error("high margin exceeds the cash position")]
    InsufficientMargin,

    #[error("user is not permitted to trade")]
    TradeNotPermitted,

    #[error("user is not permitted to withdraw")]
    WithdrawNotPermitted,

    #[error("quantity is not a multiple of the contract lot size")]
    InvalidCurrencyQuantity,

    #[error("user is disabled")]
    DisabledUser,

    #[error("contract has expired")]
    ContractExpired,

    #[error("contract has not expired yet")]
    ContractNotExpired,

    #[error("contract does not clear")]
    NonClearingContract,

    #[error("contract is currently clearing")]
    ContractClearing,

    #[error("contract is not active")]
    ContractNotActive,

    #[error("no such order")]
    NoOrderFound,

    #[error("order does not belong to this user")]
    UserOrderMismatch,

    #[error("order is already cancelled")]
    OrderCancelled,

    #[error("withdrawal does not cover the withdrawal fee")]
    WithdrawalTooSmall,

    #[error("no such user")]
    NoSuchUser,

    #[error("invalid order price or quantity")]
    InvalidPriceQuantity,

    #[error("operation is not valid for this contract type")]
    InvalidContractType,
}

impl ApiError {
    /// Stable identifier suitable for RPC clients, e.g. `insufficient_margin`.
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

/// Errors surfaced by the position store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database failure: {0}")]
    Database(String),

    #[error("row not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BursarError {
    fn from(e: sqlx::Error) -> Self {
        BursarError::Storage(e.into())
    }
}

/// Classified outcomes of a failed ledger submission.
///
/// `Rejected` means the ledger refused the journal entry (inconsistent
/// accounting, unknown account). `Rpc` and `Timeout` mean the entry's fate
/// is unknown at the transport layer. Positions are never mutated on any of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerFault {
    #[error("ledger rejected the journal entry: {0}")]
    Rejected(String),

    #[error("ledger rpc failed: {0}")]
    Rpc(String),

    #[error("ledger rpc timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerFault {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerFault::Rejected(_) => "ledger_error",
            LedgerFault::Rpc(_) => "rpc_error",
            LedgerFault::Timeout(_) => "rpc_timeout",
        }
    }
}

/// A failed call to a matching engine or the cashier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine call failed: {0}")]
pub struct EngineError(pub String);

/// Errors related to internal invariants, arithmetic, and access control.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("position adjustment is only allowed in debug deployments")]
    AdjustmentNotAllowed,

    #[error("no safe price known for '{0}'")]
    NoSafePrice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_codes_are_stable() {
        assert_eq!(ApiError::InsufficientMargin.code(), "insufficient_margin");
        assert_eq!(ApiError::ContractClearing.code(), "contract_clearing");
        assert_eq!(ApiError::UserOrderMismatch.code(), "user_order_mismatch");
        assert_eq!(ApiError::NoSuchUser.code(), "no_such_user");
        assert_eq!(
            ApiError::InvalidPriceQuantity.code(),
            "invalid_price_quantity"
        );
    }

    #[test]
    fn test_ledger_fault_codes() {
        assert_eq!(LedgerFault::Rejected(String::new()).code(), "ledger_error");
        assert_eq!(LedgerFault::Rpc(String::new()).code(), "rpc_error");
        assert_eq!(
            LedgerFault::Timeout(Duration::from_secs(5)).code(),
            "rpc_timeout"
        );
    }

    #[test]
    fn test_top_level_code_delegation() {
        let err: BursarError = ApiError::OrderCancelled.into();
        assert_eq!(err.code(), "order_cancelled");

        let err: BursarError = StorageError::Database("boom".to_string()).into();
        assert_eq!(err.code(), "storage_error");
    }
}
