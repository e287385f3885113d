//! Vendor Router
//!
//! Picks the rail for one attempt. Rules, first match wins:
//!
//! 1. explicit bank/amount whitelist
//! 2. active traffic-split experiment on the trailing digits of the id
//! 3. the vendor that validated the recipient
//! 4. bank-code default ordering
//!
//! Every rule only considers eligible vendors: registered, not disabled,
//! able to pay into the bank, not excluded by a force-switch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::disbursement::error::DisbursementError;
use crate::vendor::{VendorId, VendorRegistry};

/// Pin a bank and/or amount band to one vendor
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WhitelistRule {
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    pub vendor: VendorId,
}

impl WhitelistRule {
    fn matches(&self, bank_code: &str, amount: Decimal) -> bool {
        self.bank_code
            .as_deref()
            .is_none_or(|b| b.eq_ignore_ascii_case(bank_code))
            && self.min_amount.is_none_or(|min| amount >= min)
            && self.max_amount.is_none_or(|max| amount <= max)
    }
}

/// Route a slice of traffic by `id % 10^digits`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrafficSplit {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_digits")]
    pub digits: u32,
    pub buckets: Vec<u64>,
    pub vendor: VendorId,
}

fn default_true() -> bool {
    true
}

fn default_digits() -> u32 {
    1
}

impl TrafficSplit {
    pub fn bucket(&self, transaction_id: i64) -> u64 {
        let modulus = 10u64.pow(self.digits.clamp(1, 9));
        transaction_id.unsigned_abs() % modulus
    }

    fn matches(&self, transaction_id: i64) -> bool {
        self.active && self.buckets.contains(&self.bucket(transaction_id))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    /// Ordering for banks without an explicit entry
    pub default_order: Vec<VendorId>,
    /// Bank code -> vendors able to pay into it, in preference order
    pub bank_vendors: HashMap<String, Vec<VendorId>>,
    pub whitelist: Vec<WhitelistRule>,
    pub experiments: Vec<TrafficSplit>,
    /// Feature flag: vendors switched off
    pub disabled: Vec<VendorId>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_order: vec![
                VendorId::Wire,
                VendorId::Aggregator,
                VendorId::Wallet,
                VendorId::Float,
                VendorId::Mock,
            ],
            bank_vendors: HashMap::new(),
            whitelist: Vec::new(),
            experiments: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

/// Which rule produced a routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRule {
    Whitelist,
    Experiment(String),
    ValidationVendor,
    BankDefault,
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteRule::Whitelist => f.write_str("whitelist"),
            RouteRule::Experiment(name) => write!(f, "experiment:{}", name),
            RouteRule::ValidationVendor => f.write_str("validation_vendor"),
            RouteRule::BankDefault => f.write_str("bank_default"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    /// Numeric transaction id used for traffic splits
    pub transaction_id: i64,
    pub bank_code: &'a str,
    pub amount: Decimal,
    pub validation_vendor: Option<VendorId>,
    pub excluded: Option<VendorId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub vendor: VendorId,
    pub rule: RouteRule,
}

pub struct VendorRouter {
    config: RoutingConfig,
    registry: Arc<VendorRegistry>,
}

impl VendorRouter {
    pub fn new(config: RoutingConfig, registry: Arc<VendorRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<VendorRegistry> {
        &self.registry
    }

    /// Vendors allowed for `bank_code`, in preference order
    fn bank_order(&self, bank_code: &str) -> &[VendorId] {
        self.config
            .bank_vendors
            .iter()
            .find(|(bank, _)| bank.eq_ignore_ascii_case(bank_code))
            .map(|(_, vendors)| vendors.as_slice())
            .unwrap_or(&self.config.default_order)
    }

    pub fn is_eligible(&self, vendor: VendorId, bank_code: &str, excluded: Option<VendorId>) -> bool {
        excluded != Some(vendor)
            && !self.config.disabled.contains(&vendor)
            && self.registry.contains(vendor)
            && self.registry.supports_bank(vendor, bank_code)
            && self.bank_order(bank_code).contains(&vendor)
    }

    pub fn route(&self, req: &RouteRequest<'_>) -> Result<RouteDecision, DisbursementError> {
        let decision = self.decide(req).ok_or_else(|| {
            warn!(
                transaction_id = req.transaction_id,
                bank_code = req.bank_code,
                amount = %req.amount,
                excluded = ?req.excluded,
                "No eligible vendor"
            );
            DisbursementError::NoEligibleVendor {
                bank_code: req.bank_code.to_string(),
                amount: req.amount.to_string(),
            }
        })?;

        debug!(
            transaction_id = req.transaction_id,
            vendor = %decision.vendor,
            rule = %decision.rule,
            "Vendor routed"
        );
        Ok(decision)
    }

    fn decide(&self, req: &RouteRequest<'_>) -> Option<RouteDecision> {
        let eligible = |v: VendorId| self.is_eligible(v, req.bank_code, req.excluded);

        if let Some(rule) = self
            .config
            .whitelist
            .iter()
            .find(|r| r.matches(req.bank_code, req.amount) && eligible(r.vendor))
        {
            return Some(RouteDecision {
                vendor: rule.vendor,
                rule: RouteRule::Whitelist,
            });
        }

        if let Some(split) = self
            .config
            .experiments
            .iter()
            .find(|s| s.matches(req.transaction_id) && eligible(s.vendor))
        {
            return Some(RouteDecision {
                vendor: split.vendor,
                rule: RouteRule::Experiment(split.name.clone()),
            });
        }

        if let Some(vendor) = req.validation_vendor.filter(|v| eligible(*v)) {
            return Some(RouteDecision {
                vendor,
                rule: RouteRule::ValidationVendor,
            });
        }

        self.bank_order(req.bank_code)
            .iter()
            .copied()
            .find(|v| eligible(*v))
            .map(|vendor| RouteDecision {
                vendor,
                rule: RouteRule::BankDefault,
            })
    }

    /// Vendor to run recipient validation on
    pub fn route_validation(&self, bank_code: &str) -> Result<VendorId, DisbursementError> {
        self.bank_order(bank_code)
            .iter()
            .copied()
            .find(|v| self.is_eligible(*v, bank_code, None))
            .ok_or_else(|| DisbursementError::NoEligibleVendor {
                bank_code: bank_code.to_string(),
                amount: "-".to_string(),
            })
    }
}
