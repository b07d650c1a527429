//! Inbound and outbound POS contracts.
//!
//! The listener owns the wire format; the engine only sees these types. The
//! AVT status is the cashier's in-person confirmation relayed by the POS —
//! electronic identity verification (EAIV) never arrives on the wire, it is
//! read from the customer profile.

use serde::{Deserialize, Serialize};

use crate::basket::BasketLine;

/// Cashier age-verification status as relayed by the POS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvtStatus {
    Verified,
    NotVerified,
    Unknown,
}

impl AvtStatus {
    /// Parses the POS field; values outside the known set map to `Unknown`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "verified" | "yes" | "true" | "1" => Self::Verified,
            "not_verified" | "no" | "false" | "0" => Self::NotVerified,
            _ => Self::Unknown,
        }
    }
}

/// One rewards request from the POS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardsRequest {
    pub store_location_id: Option<String>,
    pub transaction_id: Option<String>,
    pub cashier_id: Option<String>,
    pub loyalty_id: Option<String>,
    /// Absent when the POS sent no age field at all.
    pub avt_status: Option<AvtStatus>,
    pub lines: Vec<BasketLine>,
}

/// Transaction-level flags returned to the POS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFlags {
    pub tier3_eligible: bool,
    pub cid_fund_eligible: bool,
    pub age_verified: bool,
    pub eaiv_verified: bool,
}
