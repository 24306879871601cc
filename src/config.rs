use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    data::domain::{Quantity, Ticker, Username},
    error::{BursarResult, SystemError},
};

/// One operator account receiving a share of collected fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorShare {
    pub account: Username,
    pub share: f64,
}

/// Per-shard deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountantConfig {
    /// This shard's index in `[0, num_shards)`.
    pub shard_id: u32,
    pub num_shards: u32,
    /// Allows weird things like direct position adjustment.
    pub debug: bool,
    /// Trial deployments charge no fees and permit no withdrawals.
    pub trial_period: bool,
    /// The cash contract margin is checked against.
    pub margin_ticker: Ticker,
    /// Fee split between operator accounts. Shares must sum to at most 1;
    /// the rounding remainder goes to the remainder account.
    pub vendor_shares: Vec<VendorShare>,
    /// Per-ticker cap on a user's cash position after deposit. Absent means
    /// unlimited.
    pub deposit_limits: HashMap<Ticker, Quantity>,
    /// How often the clearing, liquidation, and repair paths re-check for
    /// posting quiescence.
    pub quiescence_poll_secs: u64,
}

impl Default for AccountantConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            num_shards: 1,
            debug: false,
            trial_period: false,
            margin_ticker: Ticker::new("BTC"),
            vendor_shares: vec![
                VendorShare {
                    account: Username::new("m2"),
                    share: 0.5,
                },
                VendorShare {
                    account: Username::new("customer"),
                    share: 0.5,
                },
            ],
            deposit_limits: HashMap::new(),
            quiescence_poll_secs: 300,
        }
    }
}

impl AccountantConfig {
    pub fn quiescence_poll(&self) -> Duration {
        Duration::from_secs(self.quiescence_poll_secs)
    }

    pub fn validate(&self) -> BursarResult<()> {
        if self.num_shards == 0 {
            return Err(SystemError::InvariantViolation(
                "num_shards must be at least 1".to_string(),
            )
            .into());
        }
        if self.shard_id >= self.num_shards {
            return Err(SystemError::InvariantViolation(format!(
                "shard_id {} out of range for {} shards",
                self.shard_id, self.num_shards
            ))
            .into());
        }
        let total: f64 = self.vendor_shares.iter().map(|v| v.share).sum();
        if total > 1.0 {
            return Err(SystemError::InvariantViolation(format!(
                "vendor shares sum to {total}, must be at most 1"
            ))
            .into());
        }
        Ok(())
    }
}
