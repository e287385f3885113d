//! Balance/Admission Guard
//!
//! Read-only float check before a transfer. A multi-hop first leg is
//! checked against the pre-fee amount.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::types::Disbursement;
use crate::vendor::{TransportError, VendorAdapter};

/// Reason persisted on an insufficient-balance failure
pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT BALANCE";

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    Insufficient {
        available: Decimal,
        vendor_reason: Option<String>,
    },
}

pub struct BalanceGuard;

impl BalanceGuard {
    pub async fn check(
        adapter: &dyn VendorAdapter,
        disbursement: &Disbursement,
    ) -> Result<Admission, TransportError> {
        let amount = disbursement.leg_amount();
        let check = adapter.check_balance(amount).await?;
        if check.sufficient {
            debug!(
                disbursement_id = disbursement.id,
                vendor = %adapter.vendor(),
                available = %check.available,
                amount = %amount,
                "Balance check passed"
            );
            return Ok(Admission::Admitted);
        }

        warn!(
            disbursement_id = disbursement.id,
            vendor = %adapter.vendor(),
            available = %check.available,
            amount = %amount,
            "Insufficient vendor balance"
        );
        Ok(Admission::Insufficient {
            available: check.available,
            vendor_reason: check.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disbursement::state::Step;
    use crate::disbursement::types::fixtures::disbursement;
    use crate::vendor::VendorId;
    use crate::vendor::mock::MockVendor;

    #[tokio::test]
    async fn test_sufficient_balance_admits() {
        let vendor = MockVendor::new(VendorId::Mock);
        let d = disbursement(1, "ext-1");
        assert_eq!(
            BalanceGuard::check(&vendor, &d).await.unwrap(),
            Admission::Admitted
        );
        assert_eq!(vendor.balance_calls(), 1);
    }

    #[tokio::test]
    async fn test_first_hop_checks_original_amount() {
        let vendor = MockVendor::multi_hop(VendorId::Float, Step::Internal);
        let mut d = disbursement(1, "ext-1");
        // Covers the net amount but not the pre-fee amount
        vendor.set_balance(d.amount);
        assert_eq!(
            BalanceGuard::check(&vendor, &d).await.unwrap(),
            Admission::Admitted
        );
        d.step = Some(Step::Internal);
        assert!(matches!(
            BalanceGuard::check(&vendor, &d).await.unwrap(),
            Admission::Insufficient { .. }
        ));
    }
}
