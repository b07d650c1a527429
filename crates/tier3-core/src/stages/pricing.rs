//! Stage six: ordered pricing application and reward assembly.
//!
//! Buckets apply in a fixed order — multi-unit, manufacturer coupon,
//! loyalty, retailer, other-manufacturer, transaction — because order
//! affects rounding and the zero-price floor. New buckets get inserted into
//! [`APPLICATION_ORDER`] explicitly; nothing here iterates a map.
//!
//! Rounding happens once per line, at the total-discount summation. Each
//! bucket amount is clamped so the running total never exceeds the line's
//! base extended price, which keeps `final_extended_price` at or above zero
//! without a second clamp.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::basket::{NormalizedBasket, NormalizedLine};
use crate::money::{format_amount, round_half_up};
use crate::stages::discounts::DiscountPlan;
use crate::stages::eligibility::EligibilityOutcome;

/// Discount buckets known to the pricing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscountBucket {
    MultiUnit,
    ManufacturerCoupon,
    Loyalty,
    Retailer,
    OtherManufacturer,
    Transaction,
    /// Detection-only; the POS applies the fund amount itself.
    MultiPack,
}

/// The fixed order in which bucket amounts are applied to a line.
pub const APPLICATION_ORDER: [DiscountBucket; 6] = [
    DiscountBucket::MultiUnit,
    DiscountBucket::ManufacturerCoupon,
    DiscountBucket::Loyalty,
    DiscountBucket::Retailer,
    DiscountBucket::OtherManufacturer,
    DiscountBucket::Transaction,
];

/// Per-line bucket amounts. Every field is non-negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketAmounts {
    pub loyalty: Decimal,
    pub manufacturer_coupon: Decimal,
    pub multi_unit: Decimal,
    pub multi_pack: Decimal,
    pub retailer: Decimal,
    pub other_manufacturer: Decimal,
    pub transaction: Decimal,
}

impl BucketAmounts {
    /// Sum over all buckets; equals the line's `total_discount`.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.loyalty
            + self.manufacturer_coupon
            + self.multi_unit
            + self.multi_pack
            + self.retailer
            + self.other_manufacturer
            + self.transaction
    }

    fn get_mut(&mut self, bucket: DiscountBucket) -> &mut Decimal {
        match bucket {
            DiscountBucket::MultiUnit => &mut self.multi_unit,
            DiscountBucket::ManufacturerCoupon => &mut self.manufacturer_coupon,
            DiscountBucket::Loyalty => &mut self.loyalty,
            DiscountBucket::Retailer => &mut self.retailer,
            DiscountBucket::OtherManufacturer => &mut self.other_manufacturer,
            DiscountBucket::Transaction => &mut self.transaction,
            DiscountBucket::MultiPack => &mut self.multi_pack,
        }
    }
}

/// A normalized line with its final money decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub line: NormalizedLine,
    pub discounts_by_bucket: BucketAmounts,
    pub total_discount: Decimal,
    pub final_unit_price: Decimal,
    pub final_extended_price: Decimal,
}

/// One reward returned to the POS for a discounted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub reward_id: String,
    pub line_number: u32,
    pub value: Decimal,
    pub short_desc: String,
    pub long_desc: String,
    pub buckets: Vec<DiscountBucket>,
}

/// Transaction-level money roll-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionSummary {
    pub total_discount: Decimal,
    pub total_base_extended: Decimal,
    pub total_final_extended: Decimal,
    pub loyalty_total: Decimal,
    pub manufacturer_total: Decimal,
    pub multi_unit_total: Decimal,
    pub retailer_total: Decimal,
}

/// Stage-six output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingResult {
    pub lines: Vec<PricedLine>,
    pub transaction_summary: TransactionSummary,
    pub rewards: Vec<Reward>,
}

/// Receipt description limit, shared with the response builder.
pub const DESC_MAX_CHARS: usize = 32;

/// Prices the basket and assembles the rewards array.
#[must_use]
pub fn price_basket(
    basket: &NormalizedBasket,
    plan: &DiscountPlan,
    eligibility: &EligibilityOutcome,
    default_loyalty_discount: Decimal,
) -> PricingResult {
    let mut result = PricingResult::default();

    for (line_index, line) in basket.lines.iter().enumerate() {
        let priced = price_line(
            line_index,
            line,
            plan,
            eligibility,
            default_loyalty_discount,
        );

        let summary = &mut result.transaction_summary;
        summary.total_discount += priced.total_discount;
        summary.total_base_extended += line.base_extended_price();
        summary.total_final_extended += priced.final_extended_price;
        summary.loyalty_total += priced.discounts_by_bucket.loyalty;
        summary.manufacturer_total += priced.discounts_by_bucket.manufacturer_coupon;
        summary.multi_unit_total += priced.discounts_by_bucket.multi_unit;
        summary.retailer_total += priced.discounts_by_bucket.retailer;

        if priced.total_discount > Decimal::ZERO {
            result.rewards.push(build_reward(&priced));
        }
        result.lines.push(priced);
    }

    result
}

fn price_line(
    line_index: usize,
    line: &NormalizedLine,
    plan: &DiscountPlan,
    eligibility: &EligibilityOutcome,
    default_loyalty_discount: Decimal,
) -> PricedLine {
    let base_extended = line.base_extended_price();
    let mut amounts = BucketAmounts::default();
    let mut remaining = base_extended;

    for bucket in APPLICATION_ORDER {
        let candidate = match bucket {
            DiscountBucket::MultiUnit => planned_sum(&plan.multi_unit, line_index),
            DiscountBucket::ManufacturerCoupon => {
                if eligibility.buckets.manufacturer_coupon
                    && eligibility.line_pmusa_eligible(line)
                {
                    plan.allowances_for_line(line_index)
                        .filter_map(|rule| rule.manufacturer_funded_amount)
                        .sum()
                } else {
                    Decimal::ZERO
                }
            }
            DiscountBucket::Loyalty => {
                if eligibility.buckets.loyalty && eligibility.line_pmusa_eligible(line) {
                    // First active allowance wins; an absent amount falls
                    // back to the configured default.
                    plan.allowances_for_line(line_index)
                        .next()
                        .map_or(Decimal::ZERO, |rule| {
                            rule.max_allowance_per_transaction
                                .unwrap_or(default_loyalty_discount)
                        })
                } else {
                    Decimal::ZERO
                }
            }
            DiscountBucket::Retailer => planned_sum(&plan.retailer, line_index),
            DiscountBucket::OtherManufacturer => {
                planned_sum(&plan.other_manufacturer, line_index)
            }
            DiscountBucket::Transaction => planned_sum(&plan.transaction_level, line_index),
            DiscountBucket::MultiPack => Decimal::ZERO,
        };

        let applied = candidate.max(Decimal::ZERO).min(remaining);
        if applied > Decimal::ZERO {
            *amounts.get_mut(bucket) += applied;
            remaining -= applied;
        }
    }

    // One rounding step per line; any residue lands back in the bucket that
    // produced it so the bucket sum stays equal to the total.
    let raw_total = amounts.total();
    let total_discount = round_half_up(raw_total);
    reconcile_rounding(&mut amounts, total_discount - raw_total);

    let final_extended_price =
        round_half_up((base_extended - total_discount).max(Decimal::ZERO));
    let final_unit_price = round_half_up(final_extended_price / Decimal::from(line.quantity));

    if total_discount > Decimal::ZERO {
        debug!(
            line_number = line.line_number,
            upc = %line.upc,
            %total_discount,
            "line priced with discount"
        );
    }

    PricedLine {
        line: line.clone(),
        discounts_by_bucket: amounts,
        total_discount,
        final_unit_price,
        final_extended_price,
    }
}

fn planned_sum(
    planned: &[crate::stages::discounts::PlannedDiscount],
    line_index: usize,
) -> Decimal {
    planned
        .iter()
        .filter(|p| p.line_index == line_index)
        .map(|p| p.amount)
        .sum()
}

/// Pushes the rounding residue into the last nonzero bucket in application
/// order, keeping the per-bucket sum identical to the rounded total.
fn reconcile_rounding(amounts: &mut BucketAmounts, delta: Decimal) {
    if delta == Decimal::ZERO {
        return;
    }
    for bucket in APPLICATION_ORDER.iter().rev() {
        let slot = amounts.get_mut(*bucket);
        if *slot > Decimal::ZERO {
            *slot += delta;
            return;
        }
    }
}

fn build_reward(priced: &PricedLine) -> Reward {
    let mut tokens = Vec::new();
    let mut buckets = Vec::new();
    if priced.discounts_by_bucket.loyalty > Decimal::ZERO {
        tokens.push("LOYALTY");
        buckets.push(DiscountBucket::Loyalty);
    }
    if priced.discounts_by_bucket.manufacturer_coupon > Decimal::ZERO {
        tokens.push("MANUFACTURER");
        buckets.push(DiscountBucket::ManufacturerCoupon);
    }
    if tokens.is_empty() {
        tokens.push("LOYALTY");
    }
    let joined = tokens.join("+");

    Reward {
        reward_id: format!("{}-1-B2_S150", priced.line.line_number),
        line_number: priced.line.line_number,
        value: priced.total_discount,
        short_desc: truncate_desc(&format!("RTN {joined} REWARD")),
        long_desc: truncate_desc(&format!(
            "RTN {joined} SAVINGS {}",
            format_amount(priced.total_discount)
        )),
        buckets,
    }
}

/// Clamps a receipt description to the POS limit, ellipsized.
#[must_use]
pub fn truncate_desc(desc: &str) -> String {
    if desc.chars().count() <= DESC_MAX_CHARS {
        return desc.to_string();
    }
    let kept: String = desc.chars().take(DESC_MAX_CHARS - 3).collect();
    format!("{kept}...")
}
