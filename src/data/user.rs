use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::data::domain::{Quantity, Ticker, UserType, Username};

/// What a user is allowed to do, resolved from their permission group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub trade: bool,
    pub withdraw: bool,
    pub deposit: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            trade: true,
            withdraw: true,
            deposit: true,
        }
    }
}

/// Fee scaling factors in percent; 100 charges the contract's base fee,
/// 0 waives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeGroup {
    pub id: i64,
    pub name: String,
    pub aggressive_factor: i64,
    pub passive_factor: i64,
    pub withdraw_factor: i64,
    pub deposit_factor: i64,
}

impl Default for FeeGroup {
    fn default() -> Self {
        Self {
            id: 0,
            name: "default".to_string(),
            aggressive_factor: 100,
            passive_factor: 100,
            withdraw_factor: 100,
            deposit_factor: 100,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Fill,
    Transaction,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationMethod {
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPref {
    pub kind: NotificationKind,
    pub method: NotificationMethod,
}

/// A user account row. System accounts are users too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    pub user_type: UserType,
    pub permissions: Permissions,
    pub permission_group_id: i64,
    pub fee_group: FeeGroup,
    pub locale: String,
    pub email: String,
    pub nickname: String,
    pub notifications: Vec<NotificationPref>,
}

impl User {
    pub fn wants(&self, kind: NotificationKind, method: NotificationMethod) -> bool {
        self.notifications
            .iter()
            .any(|n| n.kind == kind && n.method == method)
    }

    /// `<address> Nickname`, the form the mailer expects.
    pub fn mail_to(&self) -> String {
        format!("<{}> {}", self.email, self.nickname)
    }
}

/// The cashier's view of an on-chain deposit address and how much of what
/// arrived there has already been booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub address: String,
    pub username: Username,
    pub ticker: Ticker,
    pub accounted_for: Quantity,
}
