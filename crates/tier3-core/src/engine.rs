//! The seven-stage decision engine.
//!
//! One [`Tier3Engine::evaluate`] call runs a rewards request through every
//! stage in dependency order and returns the fully populated
//! [`DecisionContext`]. Stages never throw on decision outcomes — an invalid
//! loyalty id or a missed age check flows through as flags and ends in a
//! zero-reward response — so the only error paths here are infrastructure
//! faults.
//!
//! Durable write order within a request: daily count, profile, validation
//! log (stage one), AVT audit (stage two), then the transaction header and
//! lines together after pricing. The caller must not send its response until
//! `evaluate` returns, which is what makes the audit rows response-durable.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::request::{RewardsRequest, TransactionFlags};
use crate::stages::age_gate::{confirm_age, AgeGateOutcome};
use crate::stages::discounts::{identify_discounts, DiscountPlan};
use crate::stages::eligibility::{gate_eligibility, EligibilityOutcome};
use crate::stages::normalize::normalize_basket;
use crate::stages::pricing::{price_basket, PricingResult, Reward};
use crate::stages::receipt::{build_receipt, ReceiptInputs};
use crate::stages::validate::{validate_loyalty_id, LidValidation};
use crate::basket::NormalizedBasket;
use crate::store::{
    CatalogStore, CustomerProfile, LoyaltyStore, TransactionLineRecord, TransactionRecord,
};

/// Engine tunables supplied by the daemon's configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Loyalty amount used when a matched allowance row carries none.
    pub default_loyalty_discount: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_loyalty_discount: Decimal::new(97, 2),
        }
    }
}

/// Everything the pipeline decided about one request.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub request: RewardsRequest,
    pub validation: LidValidation,
    pub profile: Option<CustomerProfile>,
    pub age: AgeGateOutcome,
    pub basket: NormalizedBasket,
    pub plan: DiscountPlan,
    pub eligibility: EligibilityOutcome,
    pub pricing: PricingResult,
    pub receipt_lines: Vec<String>,
}

impl DecisionContext {
    /// Transaction-level flags for the POS response.
    #[must_use]
    pub fn flags(&self) -> TransactionFlags {
        TransactionFlags {
            tier3_eligible: self.validation.eligible_for_tier3,
            cid_fund_eligible: self.validation.eligible_for_cid_fund,
            age_verified: self.age.age_verified,
            eaiv_verified: self.age.eaiv_verified,
        }
    }

    #[must_use]
    pub fn rewards(&self) -> &[Reward] {
        &self.pricing.rewards
    }
}

/// The decision core. Cheap to clone; shared across connection tasks.
#[derive(Clone)]
pub struct Tier3Engine {
    store: Arc<dyn LoyaltyStore>,
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Tier3Engine {
    #[must_use]
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        catalog: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            config,
        }
    }

    /// Runs the full pipeline for one rewards request.
    pub fn evaluate(&self, request: RewardsRequest) -> Result<DecisionContext, EngineError> {
        let store = self.store.as_ref();
        let clock = self.clock.as_ref();

        let (validation, profile) = validate_loyalty_id(
            store,
            clock,
            request.loyalty_id.as_deref(),
            request.store_location_id.as_deref(),
        )?;
        debug!(
            valid = validation.valid,
            daily_count = validation.daily_count,
            reason = %validation.reason,
            "loyalty id validated"
        );

        let age = confirm_age(
            store,
            clock,
            request.avt_status,
            profile.as_ref(),
            validation.normalized_id.as_deref(),
            request.store_location_id.as_deref(),
            request.transaction_id.as_deref(),
            request.cashier_id.as_deref(),
        )?;

        let basket = normalize_basket(self.catalog.as_ref(), &request.lines)?;
        let plan = identify_discounts(self.catalog.as_ref(), clock, &validation, &basket)?;
        let eligibility = gate_eligibility(&validation, &age);
        let pricing = price_basket(
            &basket,
            &plan,
            &eligibility,
            self.config.default_loyalty_discount,
        );

        // The transaction rows go durable before the receipt is even built;
        // a cancelled request leaves either both header and lines or
        // neither.
        if let Some(transaction_id) = request.transaction_id.as_deref() {
            let record = transaction_record(
                transaction_id,
                clock.now(),
                &request,
                &validation,
                &age,
                &pricing,
            );
            store
                .record_transaction(&record)
                .map_err(EngineError::TransactionWrite)?;
        }

        let receipt_lines = build_receipt(
            &ReceiptInputs {
                validation: &validation,
                age_verified: age.age_verified,
                eaiv_verified: age.eaiv_verified,
            },
            &pricing,
        );

        info!(
            transaction_id = request.transaction_id.as_deref().unwrap_or("-"),
            rewards = pricing.rewards.len(),
            total_discount = %pricing.transaction_summary.total_discount,
            "request decided"
        );

        Ok(DecisionContext {
            request,
            validation,
            profile,
            age,
            basket,
            plan,
            eligibility,
            pricing,
            receipt_lines,
        })
    }
}

fn transaction_record(
    transaction_id: &str,
    recorded_at: chrono::DateTime<chrono::Utc>,
    request: &RewardsRequest,
    validation: &LidValidation,
    age: &AgeGateOutcome,
    pricing: &PricingResult,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: transaction_id.to_string(),
        store_id: request.store_location_id.clone(),
        loyalty_id: validation.normalized_id.clone(),
        age_verified: age.age_verified,
        eaiv_verified: age.eaiv_verified,
        tier3_eligible: validation.eligible_for_tier3,
        cid_fund_eligible: validation.eligible_for_cid_fund,
        total_discount: pricing.transaction_summary.total_discount,
        recorded_at,
        lines: pricing
            .lines
            .iter()
            .map(|priced| TransactionLineRecord {
                line_number: priced.line.line_number,
                upc: priced.line.upc.clone(),
                skuguid: priced.line.skuguid.clone(),
                quantity: priced.line.quantity,
                unit_price: priced.line.unit_price,
                loyalty_discount: priced.discounts_by_bucket.loyalty,
                manufacturer_discount: priced.discounts_by_bucket.manufacturer_coupon,
                multi_unit_discount: priced.discounts_by_bucket.multi_unit,
                retailer_discount: priced.discounts_by_bucket.retailer,
                other_manufacturer_discount: priced.discounts_by_bucket.other_manufacturer,
                transaction_discount: priced.discounts_by_bucket.transaction,
                total_discount: priced.total_discount,
                final_extended_price: priced.final_extended_price,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basket::BasketLine;
    use crate::catalog::{
        AllowanceRule, CartonBlock, CatalogEntry, PackBlock, UnitOfMeasure,
    };
    use crate::clock::FixedClock;
    use crate::lid::QR_BASE_PREFIX;
    use crate::memory::{MemoryCatalog, MemoryStore};
    use crate::request::AvtStatus;
    use chrono::NaiveDate;

    fn catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog.add_entry(CatalogEntry {
            skuguid: "SKU-MARL".to_string(),
            sku_name: Some("MARLBORO KS BOX".to_string()),
            brand: Some("MARLBORO".to_string()),
            manufacturer: Some("PM USA".to_string()),
            category: "CIG".to_string(),
            program_eligibility: Some("TIER3".to_string()),
            carton: CartonBlock {
                upc: Some("002820000119".to_string()),
                suppressed_upc: None,
                conversion_factor: Some(Decimal::new(10, 0)),
                is_promotional: false,
            },
            pack: PackBlock {
                upc: Some("002820000112".to_string()),
                conversion_factor: Some(Decimal::ONE),
                is_promotional: false,
            },
        });
        catalog.add_allowance(
            AllowanceRule {
                allowance_id: "A1".to_string(),
                allowance_type: "LOYALTY".to_string(),
                min_qty: 1,
                max_allowance_per_transaction: Some(Decimal::new(97, 2)),
                max_daily_transactions_per_loyalty: Some(5),
                manufacturer_funded_amount: None,
                promo_code: None,
                promotional_upcs_eligible: false,
                eligible_uoms: vec![UnitOfMeasure::Pack],
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            },
            Some("SKU-MARL".to_string()),
        );
        catalog
    }

    fn engine_with(store: Arc<MemoryStore>) -> Tier3Engine {
        Tier3Engine::new(
            store,
            Arc::new(catalog()),
            Arc::new(FixedClock::on_date(2024, 6, 1)),
            EngineConfig::default(),
        )
    }

    fn pack_line(line_number: u32, quantity: u32) -> BasketLine {
        BasketLine {
            line_number,
            upc: Some("002820000112".to_string()),
            quantity,
            unit_price: Decimal::new(700, 2),
            description: Some("MARLBORO KS BOX".to_string()),
        }
    }

    fn request(loyalty_id: &str, avt: Option<AvtStatus>, lines: Vec<BasketLine>) -> RewardsRequest {
        RewardsRequest {
            store_location_id: Some("STORE-1".to_string()),
            transaction_id: Some("TXN-1001".to_string()),
            cashier_id: Some("CASHIER-7".to_string()),
            loyalty_id: Some(loyalty_id.to_string()),
            avt_status: avt,
            lines,
        }
    }

    #[test]
    fn missing_lid_yields_not_eligible_response() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let ctx = engine
            .evaluate(request("", Some(AvtStatus::Verified), vec![pack_line(1, 1)]))
            .unwrap();

        assert!(!ctx.validation.valid);
        assert_eq!(ctx.validation.reason, "LoyaltyID is missing");
        assert!(ctx.rewards().is_empty());
        assert!(ctx
            .receipt_lines
            .contains(&"Loyalty ID not eligible".to_string()));
        let flags = ctx.flags();
        assert!(!flags.tier3_eligible);
        assert!(!flags.cid_fund_eligible);
    }

    #[test]
    fn bad_qr_yields_format_reason() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let raw = format!("{QR_BASE_PREFIX}@@@");
        let ctx = engine
            .evaluate(request(&raw, Some(AvtStatus::Verified), vec![pack_line(1, 1)]))
            .unwrap();
        assert!(!ctx.validation.valid);
        assert!(ctx.validation.reason.contains("QR code format invalid"));
        assert!(ctx.rewards().is_empty());
    }

    #[test]
    fn first_visit_marlboro_pack_earns_loyalty_reward() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let ctx = engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::Verified),
                vec![pack_line(1, 1)],
            ))
            .unwrap();

        assert_eq!(
            ctx.pricing.transaction_summary.total_discount,
            Decimal::new(97, 2)
        );
        assert_eq!(ctx.rewards().len(), 1);
        assert_eq!(ctx.rewards()[0].value, Decimal::new(97, 2));
        assert!(ctx
            .receipt_lines
            .contains(&"LOYALTY SAVINGS        -$0.97".to_string()));
        assert!(ctx
            .receipt_lines
            .contains(&"TOTAL SAVINGS          -$0.97".to_string()));

        let profile = store.find_profile("5551239876").unwrap().unwrap();
        assert_eq!(profile.format_type.as_str(), "PHONE_NUMBER");
        assert_eq!(profile.total_transactions, 1);

        // Transaction and line rows were persisted.
        let transactions = store.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_id, "TXN-1001");
        assert_eq!(transactions[0].lines.len(), 1);
        assert_eq!(
            transactions[0].lines[0].loyalty_discount,
            Decimal::new(97, 2)
        );
    }

    #[test]
    fn sixth_visit_same_day_gets_no_discount() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        for _ in 0..5 {
            engine
                .evaluate(request(
                    "5551239876",
                    Some(AvtStatus::Verified),
                    vec![pack_line(1, 1)],
                ))
                .unwrap();
        }
        let ctx = engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::Verified),
                vec![pack_line(1, 1)],
            ))
            .unwrap();

        assert!(ctx.validation.is_manager_card);
        assert!(!ctx.validation.eligible_for_cid_fund);
        assert!(ctx.validation.reason.contains("exceeds cap of 5"));
        assert_eq!(
            ctx.pricing.transaction_summary.total_discount,
            Decimal::ZERO
        );
        assert!(ctx.rewards().is_empty());
        let priced = &ctx.pricing.lines[0];
        assert_eq!(priced.discounts_by_bucket.manufacturer_coupon, Decimal::ZERO);
        assert_eq!(priced.discounts_by_bucket.multi_pack, Decimal::ZERO);
    }

    #[test]
    fn split_pack_lines_merge_and_mark_multi_pack() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let ctx = engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::Verified),
                vec![pack_line(1, 1), pack_line(2, 1)],
            ))
            .unwrap();

        assert_eq!(ctx.basket.lines.len(), 1);
        assert_eq!(ctx.basket.lines[0].quantity, 2);
        assert_eq!(ctx.basket.merged_line_count, 1);

        assert_eq!(ctx.plan.multi_pack_markers.len(), 1);
        assert_eq!(ctx.plan.multi_pack_markers[0].multi_unit_required_quantity, 2);

        // Detection only: the bucket amount stays zero; the POS applies it.
        assert_eq!(
            ctx.pricing.lines[0].discounts_by_bucket.multi_pack,
            Decimal::ZERO
        );
    }

    #[test]
    fn unverified_age_writes_no_audit_and_zeroes_discounts() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let ctx = engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::NotVerified),
                vec![pack_line(1, 1)],
            ))
            .unwrap();

        assert!(!ctx.age.age_verified);
        assert!(store.avt_log().is_empty());
        assert_eq!(
            ctx.pricing.transaction_summary.total_discount,
            Decimal::ZERO
        );
        assert!(ctx
            .receipt_lines
            .contains(&"Age verification required".to_string()));
    }

    #[test]
    fn reward_values_always_sum_to_total_discount() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let ctx = engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::Verified),
                vec![pack_line(1, 2), pack_line(3, 1)],
            ))
            .unwrap();
        let reward_sum: Decimal = ctx.rewards().iter().map(|r| r.value).sum();
        assert_eq!(reward_sum, ctx.pricing.transaction_summary.total_discount);
    }

    #[test]
    fn unknown_upc_still_produces_a_response() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        let line = BasketLine {
            line_number: 1,
            upc: Some("999999999999".to_string()),
            quantity: 1,
            unit_price: Decimal::new(500, 2),
            description: None,
        };
        let ctx = engine
            .evaluate(request("5551239876", Some(AvtStatus::Verified), vec![line]))
            .unwrap();
        assert_eq!(ctx.basket.unknown_upcs, vec!["999999999999".to_string()]);
        assert!(ctx.rewards().is_empty());
        assert!(ctx
            .receipt_lines
            .contains(&"No eligible rewards".to_string()));
    }

    #[test]
    fn exactly_one_avt_row_per_confirmed_request() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store));
        engine
            .evaluate(request(
                "5551239876",
                Some(AvtStatus::Verified),
                vec![pack_line(1, 1)],
            ))
            .unwrap();
        let log = store.avt_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].avt_performed);
        assert_eq!(log[0].loyalty_id.as_deref(), Some("5551239876"));
        assert!(log[0].cid_customer_id.is_some());
    }
}
