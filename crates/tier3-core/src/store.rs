//! Storage seams of the decision pipeline.
//!
//! Two traits split the durable state the engine touches: [`LoyaltyStore`]
//! owns the five write paths (daily counts, profiles, validation log, AVT
//! audit, transactions) and [`CatalogStore`] owns the read-only SKU and
//! allowance tables maintained by the external synchronizer job. The daemon
//! implements both on SQLite; tests use the in-memory pair from
//! [`crate::memory`].
//!
//! Contract for the daily cap: [`LoyaltyStore::increment_daily_count`] must
//! be atomic and return the post-increment count. Two concurrent requests for
//! the same id must observe two distinct counts, and the caller decides the
//! manager-card outcome from the value it was returned, never from a separate
//! read.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{AllowanceRule, UpcResolution};
use crate::lid::LidFormat;

/// Storage failure. Decision outcomes are never errors; these are
/// infrastructure faults that abort the request.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database unavailable: {message}")]
    Unavailable { message: String },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("constraint violated: {message}")]
    Constraint { message: String },
}

impl StoreError {
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Durable customer profile keyed by the normalized loyalty id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub loyalty_id: String,
    /// Stable fund-reporting surrogate; generated on insert, never rewritten.
    pub cid_customer_id: String,
    pub format_type: LidFormat,
    /// Store of first sighting.
    pub store_id: Option<String>,
    /// Immutable after insert.
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_transactions: u64,
    pub is_manager_card: bool,
    pub avt_verified: bool,
    pub eaiv_verified: bool,
    pub last_avt_verified: Option<DateTime<Utc>>,
    pub last_eaiv_verified: Option<DateTime<Utc>>,
}

/// One validation-log row; appended for every attempt, valid or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationLogEntry {
    /// Normalized id when the input classified, otherwise the raw input.
    pub loyalty_id: String,
    pub store_id: Option<String>,
    pub valid: bool,
    pub eligible_for_tier3: bool,
    pub eligible_for_cid_fund: bool,
    pub is_manager_card: bool,
    pub daily_count: u32,
    pub reason: String,
    pub logged_at: DateTime<Utc>,
}

/// Method string recorded on every cashier-confirmed AVT row.
pub const AVT_METHOD_IN_PERSON: &str = "in_person_confirmation";

/// Append-only age-verification audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvtRecord {
    pub transaction_id: String,
    pub store_id: String,
    pub loyalty_id: Option<String>,
    pub cid_customer_id: Option<String>,
    /// Always true; a row exists only when the cashier confirmed.
    pub avt_performed: bool,
    pub avt_method: String,
    pub avt_timestamp: DateTime<Utc>,
    pub cashier_id: Option<String>,
    pub eaiv_verified: Option<bool>,
}

/// Per-line persistence record with the final bucket amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLineRecord {
    pub line_number: u32,
    pub upc: String,
    pub skuguid: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub loyalty_discount: Decimal,
    pub manufacturer_discount: Decimal,
    pub multi_unit_discount: Decimal,
    pub retailer_discount: Decimal,
    pub other_manufacturer_discount: Decimal,
    pub transaction_discount: Decimal,
    pub total_discount: Decimal,
    pub final_extended_price: Decimal,
}

/// Transaction header plus its lines; persisted together, atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub store_id: Option<String>,
    pub loyalty_id: Option<String>,
    pub age_verified: bool,
    pub eaiv_verified: bool,
    pub tier3_eligible: bool,
    pub cid_fund_eligible: bool,
    pub total_discount: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub lines: Vec<TransactionLineRecord>,
}

/// Durable loyalty-side state.
pub trait LoyaltyStore: Send + Sync {
    /// Atomically upserts the `(loyalty_id, date)` daily-count row and
    /// returns the post-increment count. This is the first observable write
    /// of a request.
    fn increment_daily_count(&self, loyalty_id: &str, date: NaiveDate)
        -> Result<u32, StoreError>;

    /// Reads today's count without incrementing.
    fn daily_count(&self, loyalty_id: &str, date: NaiveDate) -> Result<u32, StoreError>;

    /// Inserts the profile on first sighting (setting `first_seen`,
    /// `cid_customer_id`, `format_type`) or updates `last_seen` and
    /// increments `total_transactions`. Returns the post-upsert profile.
    fn upsert_profile(
        &self,
        loyalty_id: &str,
        format: LidFormat,
        store_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<CustomerProfile, StoreError>;

    /// Flags a profile as a manager/store card.
    fn mark_manager_card(&self, loyalty_id: &str) -> Result<(), StoreError>;

    fn find_profile(&self, loyalty_id: &str) -> Result<Option<CustomerProfile>, StoreError>;

    /// Appends a validation-log row; called for every attempt.
    fn append_validation_log(&self, entry: &ValidationLogEntry) -> Result<(), StoreError>;

    /// Appends the AVT audit row and touches the profile's AVT fields.
    /// Failure here is fatal to the request: the row is legally required.
    fn record_avt_confirmation(&self, record: &AvtRecord) -> Result<(), StoreError>;

    /// Persists the transaction header and its lines in one atomic write.
    fn record_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError>;
}

/// Read-only SKU and allowance catalog.
pub trait CatalogStore: Send + Sync {
    /// Resolves a UPC, probing carton, pack, then suppressed-carton columns.
    fn resolve_upc(&self, upc: &str) -> Result<Option<UpcResolution>, StoreError>;

    /// Allowance rules active on `today` that map to `skuguid`, including
    /// rules mapped with a null SKUGUID (which apply to all products).
    /// Returned in stable `allowance_id` order.
    fn active_allowances_for_sku(
        &self,
        skuguid: &str,
        today: NaiveDate,
    ) -> Result<Vec<AllowanceRule>, StoreError>;
}
