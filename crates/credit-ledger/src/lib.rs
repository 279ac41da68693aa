//! Prepaid credit ledger.
//!
//! One credit buys one outbound unit. Balances live on the tenant record and
//! every change is mirrored by an append-only [`LedgerTransaction`] with a
//! before/after snapshot. Group and operator pools are cached aggregates,
//! adjusted alongside each change and rebuilt by [`CreditLedger::reconcile_pools`].
//!
//! [`LedgerTransaction`]: sms_store::LedgerTransaction

pub mod config;
pub mod error;
pub mod ledger;
pub mod pricing;
pub mod reconcile;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::{CompletenessCheck, CreditLedger, TransferReceipt};
pub use pricing::{PricingResolver, CHARGE_PER_UNIT_KEY, COST_PER_UNIT_KEY};
pub use reconcile::{
    spawn_reconciler, PoolCorrection, ReconciliationReport, Reconciler, TenantDrift,
};
