//! Stage four: discount-type identification.
//!
//! Categorizes what could apply to each line without assigning money yet.
//! Manufacturer allowance rows are joined to the basket's SKUGUIDs; Marlboro
//! multi-pack configurations are detected on the post-merge quantities (which
//! is what lets a POS that splits one purchase across identical lines still
//! qualify). The remaining buckets exist as empty plans until their programs
//! ship.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::basket::NormalizedBasket;
use crate::catalog::{AllowanceRule, UnitOfMeasure};
use crate::clock::Clock;
use crate::stages::validate::LidValidation;
use crate::store::{CatalogStore, StoreError};

/// Marlboro pack quantities that form a recognized multi-pack configuration.
pub const MULTI_PACK_QUANTITIES: [u32; 2] = [2, 3];

/// An allowance rule matched to one normalized line.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceMatch {
    /// Index into the normalized basket's line vector.
    pub line_index: usize,
    pub rule: AllowanceRule,
}

/// Detection-only marker for a Marlboro multi-pack configuration.
///
/// The POS applies the multi-pack fund amount itself, so the discount amount
/// here stays zero and `needs_rate_lookup` tells the fund reporter that the
/// rate table was not consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPackMarker {
    pub line_index: usize,
    pub multi_unit_indicator: String,
    pub multi_unit_required_quantity: u32,
    pub multi_unit_discount_amount: Decimal,
    pub needs_rate_lookup: bool,
}

/// A discount planned for a bucket that has no live program yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDiscount {
    pub line_index: usize,
    pub amount: Decimal,
    pub promo_code: Option<String>,
}

/// Stage-four output: candidate discounts per bucket, no amounts applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscountPlan {
    /// Active manufacturer allowance rows joined per line.
    pub manufacturer_allowances: Vec<AllowanceMatch>,
    pub multi_pack_markers: Vec<MultiPackMarker>,
    /// Placeholder buckets, empty until their programs exist.
    pub retailer: Vec<PlannedDiscount>,
    pub multi_unit: Vec<PlannedDiscount>,
    pub coupon: Vec<PlannedDiscount>,
    pub other_manufacturer: Vec<PlannedDiscount>,
    pub transaction_level: Vec<PlannedDiscount>,
}

impl DiscountPlan {
    /// Allowance matches for one line, in stable rule order.
    pub fn allowances_for_line(&self, line_index: usize) -> impl Iterator<Item = &AllowanceRule> {
        self.manufacturer_allowances
            .iter()
            .filter(move |m| m.line_index == line_index)
            .map(|m| &m.rule)
    }

    #[must_use]
    pub fn multi_pack_for_line(&self, line_index: usize) -> Option<&MultiPackMarker> {
        self.multi_pack_markers
            .iter()
            .find(|m| m.line_index == line_index)
    }
}

/// Builds the discount plan for a normalized basket.
pub fn identify_discounts(
    catalog: &dyn CatalogStore,
    clock: &dyn Clock,
    validation: &LidValidation,
    basket: &NormalizedBasket,
) -> Result<DiscountPlan, StoreError> {
    let mut plan = DiscountPlan::default();
    let today = clock.today();

    for (line_index, line) in basket.lines.iter().enumerate() {
        // Allowance join happens only for customers who cleared stage one.
        if validation.eligible_for_tier3 {
            if let Some(skuguid) = line.skuguid.as_deref() {
                for rule in catalog.active_allowances_for_sku(skuguid, today)? {
                    if rule.applies_to(line) {
                        plan.manufacturer_allowances.push(AllowanceMatch {
                            line_index,
                            rule,
                        });
                    }
                }
            }
        }

        // Multi-pack detection runs on the merged quantity.
        if line.is_marlboro()
            && line.unit_of_measure == Some(UnitOfMeasure::Pack)
            && !line.is_promotional_upc
            && MULTI_PACK_QUANTITIES.contains(&line.quantity)
        {
            debug!(
                upc = %line.upc,
                quantity = line.quantity,
                "Marlboro multi-pack configuration detected"
            );
            plan.multi_pack_markers.push(MultiPackMarker {
                line_index,
                multi_unit_indicator: "Y".to_string(),
                multi_unit_required_quantity: line.quantity,
                multi_unit_discount_amount: Decimal::ZERO,
                needs_rate_lookup: true,
            });
        }
    }

    Ok(plan)
}
