//! Records and storage for the SMS reseller gateway.
//!
//! Holds tenants, inbound and outbound messages, the append-only credit
//! ledger, cached pool aggregates and scoped configuration scalars.
//! [`Store`] is the contract every component depends on; [`MemoryStore`]
//! keeps everything in memory with an optional JSON snapshot, and
//! [`TimedStore`] bounds any store with a per-call timeout.

mod error;
mod memory;
mod store;
mod timed;
mod types;

pub use error::StoreError;
pub use memory::{MemoryStore, StoreData};
pub use store::Store;
pub use timed::TimedStore;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::GroupLead).unwrap(), "\"group-lead\"");
        let role: Role = serde_json::from_str("\"operator\"").unwrap();
        assert_eq!(role, Role::Operator);
    }

    #[test]
    fn test_role_can_send_direct() {
        assert!(Role::Operator.can_send_direct());
        assert!(Role::GroupLead.can_send_direct());
        assert!(!Role::Client.can_send_direct());
    }

    #[test]
    fn test_label_matching() {
        let tenant = Tenant::new("t1", Role::Client, 0).with_business_label("Acme Corp");
        assert!(tenant.label_matches("acme corp"));
        assert!(tenant.label_matches("  ACME CORP "));
        assert!(!tenant.label_matches("acme"));

        let unlabelled = Tenant::new("t2", Role::Client, 0);
        assert!(!unlabelled.label_matches(""));
    }

    #[test]
    fn test_receiving_numbers_dedup() {
        let tenant = Tenant::new("t1", Role::Client, 0)
            .with_receiving_number("+15550000001")
            .with_receiving_number("+15550000001");
        assert_eq!(tenant.receiving_numbers.len(), 1);
    }

    #[test]
    fn test_chargeable_statuses() {
        assert!(OutboundStatus::Sent.is_chargeable());
        assert!(OutboundStatus::ChargeFailed.is_chargeable());
        assert!(!OutboundStatus::Failed.is_chargeable());
        assert!(!OutboundStatus::Unknown.is_chargeable());
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(OutboundStatus::from_provider("Accepted"), OutboundStatus::Sent);
        assert_eq!(OutboundStatus::from_provider("queued"), OutboundStatus::Queued);
        assert_eq!(OutboundStatus::from_provider("UNDELIVERED"), OutboundStatus::Failed);
        assert_eq!(OutboundStatus::from_provider("???"), OutboundStatus::Unknown);
    }

    #[test]
    fn test_transaction_amount_and_charge_flag() {
        let debit = LedgerTransaction::new("t1", TransactionKind::Debit, 10, 7).with_message("m1");
        assert_eq!(debit.amount, -3);
        assert!(debit.is_message_charge());

        let manual = LedgerTransaction::new("t1", TransactionKind::Debit, 7, 6);
        assert!(!manual.is_message_charge());

        let credit = LedgerTransaction::new("t1", TransactionKind::Credit, 6, 16);
        assert_eq!(credit.amount, 10);
        assert!(!credit.is_message_charge());

        let recon = LedgerTransaction::new("t1", TransactionKind::Reconciliation, 16, 14);
        assert!(recon.is_message_charge());
    }

    #[test]
    fn test_zero_pool_adjustment_is_dropped() {
        let change = BalanceChange::new()
            .adjust_pool(PoolKey::Operator, 0)
            .adjust_pool(PoolKey::Group("g1".into()), -2);
        assert_eq!(change.pool_adjustments.len(), 1);
        assert_eq!(PoolKey::Group("g1".into()).to_string(), "group:g1");
    }
}
