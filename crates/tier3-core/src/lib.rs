//! # tier3-core
//!
//! Decision core for the Tier 3 loyalty and discount sidecar that sits next
//! to a fuel-forecourt point of sale. For each tobacco-category transaction
//! the engine decides whether the presented loyalty identifier is legitimate,
//! whether age verification was performed, which discount buckets apply to
//! each basket line, and the exact per-line monetary adjustments and receipt
//! text returned to the POS.
//!
//! The pipeline runs seven sequential stages over a shared
//! [`engine::DecisionContext`]:
//!
//! 1. loyalty-ID validation and daily-cap enforcement ([`stages::validate`])
//! 2. age gating with a durable audit record ([`stages::age_gate`])
//! 3. basket normalization against the SKU catalog ([`stages::normalize`])
//! 4. discount-type identification ([`stages::discounts`])
//! 5. per-bucket eligibility gating ([`stages::eligibility`])
//! 6. ordered pricing application ([`stages::pricing`])
//! 7. POS-safe receipt assembly ([`stages::receipt`])
//!
//! All I/O goes through the [`store::LoyaltyStore`] and
//! [`store::CatalogStore`] traits; the crate itself never opens a socket or a
//! database. The daemon crate supplies SQLite-backed implementations.

pub mod basket;
pub mod catalog;
pub mod clock;
pub mod engine;
pub mod error;
pub mod lid;
pub mod memory;
pub mod money;
pub mod request;
pub mod stages;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{DecisionContext, EngineConfig, Tier3Engine};
pub use error::EngineError;
pub use lid::{LidFormat, LoyaltyId};
pub use request::{AvtStatus, RewardsRequest, TransactionFlags};
pub use store::{CatalogStore, LoyaltyStore, StoreError};
