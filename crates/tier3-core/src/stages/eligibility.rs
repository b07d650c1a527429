//! Stage five: eligibility gating.
//!
//! Folds the stage-one and stage-two flags into two bitmaps: transaction
//! flags and per-bucket gates. The manager-card case withdraws the
//! manufacturer-funded buckets here, regardless of what stage four matched.

use serde::{Deserialize, Serialize};

use crate::basket::NormalizedLine;
use crate::catalog::UnitOfMeasure;
use crate::stages::age_gate::AgeGateOutcome;
use crate::stages::validate::LidValidation;

/// Per-bucket eligibility gates consulted by pricing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleBuckets {
    pub loyalty: bool,
    pub manufacturer_coupon: bool,
    pub multi_unit: bool,
    pub multi_pack: bool,
    pub retailer: bool,
    pub other_manufacturer: bool,
    pub transaction: bool,
}

/// Stage-five output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityOutcome {
    pub tier3_eligible: bool,
    pub tier3_incentives_eligible: bool,
    pub pmusa_allowances_eligible: bool,
    pub buckets: EligibleBuckets,
    pub reasons: Vec<String>,
}

impl EligibilityOutcome {
    /// Per-line manufacturer-program eligibility: a non-promotional Marlboro
    /// pack, on a transaction whose fund eligibility survived the daily cap.
    #[must_use]
    pub fn line_pmusa_eligible(&self, line: &NormalizedLine) -> bool {
        self.pmusa_allowances_eligible
            && line.is_marlboro()
            && line.unit_of_measure == Some(UnitOfMeasure::Pack)
            && !line.is_promotional_upc
    }
}

/// Computes the transaction and bucket gates.
#[must_use]
pub fn gate_eligibility(
    validation: &LidValidation,
    age: &AgeGateOutcome,
) -> EligibilityOutcome {
    let tier3_eligible = validation.eligible_for_tier3;
    let tier3_incentives_eligible = tier3_eligible && age.eligible_for_tier3_incentives;
    let mut pmusa_allowances_eligible =
        tier3_incentives_eligible && validation.eligible_for_cid_fund;

    let mut reasons = Vec::new();
    if !tier3_eligible {
        reasons.push(format!("Tier 3 ineligible: {}", validation.reason));
    }
    if tier3_eligible && !age.eligible_for_tier3_incentives {
        reasons.push(format!("Tier 3 incentives withheld: {}", age.reason));
    }

    let mut buckets = EligibleBuckets {
        loyalty: tier3_incentives_eligible,
        manufacturer_coupon: pmusa_allowances_eligible,
        multi_unit: tier3_incentives_eligible,
        multi_pack: validation.eligible_for_cid_fund,
        retailer: tier3_incentives_eligible,
        other_manufacturer: tier3_incentives_eligible,
        transaction: tier3_incentives_eligible,
    };

    if !validation.eligible_for_cid_fund {
        pmusa_allowances_eligible = false;
        buckets.manufacturer_coupon = false;
        buckets.multi_pack = false;
        reasons.push(
            "PM USA allowances ineligible: loyalty ID exceeded 5 transactions/day (manager/store card)"
                .to_string(),
        );
    }

    EligibilityOutcome {
        tier3_eligible,
        tier3_incentives_eligible,
        pmusa_allowances_eligible,
        buckets,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UpcMatchKind;
    use crate::lid::LidFormat;
    use rust_decimal::Decimal;

    fn validation(cid_fund: bool) -> LidValidation {
        LidValidation {
            valid: true,
            eligible_for_tier3: true,
            eligible_for_cid_fund: cid_fund,
            is_manager_card: !cid_fund,
            normalized_id: Some("5551239876".to_string()),
            format_type: Some(LidFormat::PhoneNumber),
            daily_count: if cid_fund { 1 } else { 6 },
            reason: String::new(),
        }
    }

    fn age(verified: bool) -> AgeGateOutcome {
        AgeGateOutcome {
            age_verified: verified,
            eaiv_verified: false,
            eligible_for_tier3_incentives: verified,
            eligible_for_eaiv_only_incentives: false,
            reason: String::new(),
        }
    }

    fn marlboro_pack_line() -> NormalizedLine {
        NormalizedLine {
            line_number: 1,
            upc: "002820000112".to_string(),
            quantity: 1,
            unit_price: Decimal::new(700, 2),
            description: None,
            skuguid: Some("SKU-MARL".to_string()),
            sku_name: None,
            brand: Some("MARLBORO".to_string()),
            manufacturer: Some("PM USA".to_string()),
            category: "CIG".to_string(),
            unit_of_measure: Some(UnitOfMeasure::Pack),
            matched_upc_type: Some(UpcMatchKind::Pack),
            is_promotional_upc: false,
            is_unknown: false,
        }
    }

    #[test]
    fn verified_customer_gets_all_gates_open() {
        let outcome = gate_eligibility(&validation(true), &age(true));
        assert!(outcome.tier3_eligible);
        assert!(outcome.tier3_incentives_eligible);
        assert!(outcome.pmusa_allowances_eligible);
        assert!(outcome.buckets.loyalty);
        assert!(outcome.buckets.manufacturer_coupon);
        assert!(outcome.buckets.multi_pack);
        assert!(outcome.reasons.is_empty());
        assert!(outcome.line_pmusa_eligible(&marlboro_pack_line()));
    }

    #[test]
    fn manager_card_withdraws_fund_buckets_only() {
        let outcome = gate_eligibility(&validation(false), &age(true));
        assert!(outcome.tier3_eligible);
        assert!(outcome.tier3_incentives_eligible);
        assert!(!outcome.pmusa_allowances_eligible);
        assert!(!outcome.buckets.manufacturer_coupon);
        assert!(!outcome.buckets.multi_pack);
        assert!(outcome.buckets.loyalty);
        assert!(outcome
            .reasons
            .iter()
            .any(|r| r.contains("exceeded 5 transactions/day")));
        // And no line clears the per-line fund check.
        assert!(!outcome.line_pmusa_eligible(&marlboro_pack_line()));
    }

    #[test]
    fn unverified_age_closes_incentive_gates() {
        let outcome = gate_eligibility(&validation(true), &age(false));
        assert!(outcome.tier3_eligible);
        assert!(!outcome.tier3_incentives_eligible);
        assert!(!outcome.pmusa_allowances_eligible);
        assert!(!outcome.buckets.loyalty);
        assert!(!outcome.buckets.manufacturer_coupon);
    }

    #[test]
    fn line_gate_requires_marlboro_pack_without_promo_upc() {
        let outcome = gate_eligibility(&validation(true), &age(true));

        let mut carton = marlboro_pack_line();
        carton.unit_of_measure = Some(UnitOfMeasure::Carton);
        assert!(!outcome.line_pmusa_eligible(&carton));

        let mut promo = marlboro_pack_line();
        promo.is_promotional_upc = true;
        assert!(!outcome.line_pmusa_eligible(&promo));

        let mut other_brand = marlboro_pack_line();
        other_brand.brand = Some("NEWPORT".to_string());
        assert!(!outcome.line_pmusa_eligible(&other_brand));
    }
}
