//! Ledger configuration.

use serde::Deserialize;
use sms_store::PricingPair;
use std::time::Duration;

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Compare-and-swap attempts per balance mutation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval between background reconciliation passes.
    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub reconcile_interval: Duration,

    /// Pricing used when neither a group nor a global override exists.
    #[serde(default)]
    pub default_pricing: PricingPair,
}

fn default_max_retries() -> u32 {
    16
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(3600)
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            reconcile_interval: default_reconcile_interval(),
            default_pricing: PricingPair::default(),
        }
    }
}
