//! Stage seven: POS-safe receipt assembly.
//!
//! The POS prints at most ten lines of at most 32 characters each. Amounts
//! are right-aligned on a fixed 29-character content width. When the line
//! budget is tight, the header, total and footer always survive; the app
//! upsell lines are the first to go.

use rust_decimal::Decimal;

use crate::money::format_savings;
use crate::stages::pricing::PricingResult;
use crate::stages::validate::LidValidation;

/// Hard POS limit on receipt lines per block.
pub const MAX_RECEIPT_LINES: usize = 10;

/// Hard POS limit on characters per receipt line.
pub const MAX_LINE_CHARS: usize = 32;

/// Width amounts are right-aligned to; inside the 32-character cap.
const CONTENT_WIDTH: usize = 29;

const HEADER: &str = "*** LOYALTY REWARDS ***";
const FOOTER: &str = "*** THANK YOU ***";
const UPSELL_BONUS: &str = "APP BONUS AVAILABLE";
const UPSELL_VERIFY: &str = "VERIFY ID IN APP TO UNLOCK";

/// Inputs the builder needs beyond the pricing result.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptInputs<'a> {
    pub validation: &'a LidValidation,
    pub age_verified: bool,
    pub eaiv_verified: bool,
}

/// Builds the receipt block.
#[must_use]
pub fn build_receipt(inputs: &ReceiptInputs<'_>, pricing: &PricingResult) -> Vec<String> {
    let mut lines = Vec::with_capacity(MAX_RECEIPT_LINES);
    lines.push(HEADER.to_string());

    if pricing.rewards.is_empty() {
        lines.push(no_reward_body(inputs).to_string());
        lines.push(FOOTER.to_string());
    } else {
        let summary = &pricing.transaction_summary;
        for (label, amount) in [
            ("LOYALTY SAVINGS", summary.loyalty_total),
            ("MFG COUPON", summary.manufacturer_total),
            ("MULTI-BUY SAVINGS", summary.multi_unit_total),
            ("STORE SAVINGS", summary.retailer_total),
        ] {
            if amount > Decimal::ZERO {
                lines.push(aligned(label, amount));
            }
        }
        lines.push("-".repeat(CONTENT_WIDTH));
        lines.push(aligned("TOTAL SAVINGS", summary.total_discount));
        lines.push(FOOTER.to_string());
    }

    // App upsell for customers who could unlock the EAIV tier, budget
    // permitting.
    if inputs.validation.eligible_for_tier3 && !inputs.eaiv_verified {
        for upsell in [UPSELL_BONUS, UPSELL_VERIFY] {
            if lines.len() < MAX_RECEIPT_LINES {
                lines.push(upsell.to_string());
            }
        }
    }

    lines.truncate(MAX_RECEIPT_LINES);
    for line in &mut lines {
        if line.chars().count() > MAX_LINE_CHARS {
            *line = line.chars().take(MAX_LINE_CHARS).collect();
        }
    }
    lines
}

/// Explanatory body when no reward was emitted, in precedence order.
fn no_reward_body(inputs: &ReceiptInputs<'_>) -> &'static str {
    if !inputs.validation.eligible_for_tier3 {
        "Loyalty ID not eligible"
    } else if !inputs.age_verified {
        "Age verification required"
    } else {
        "No eligible rewards"
    }
}

fn aligned(label: &str, amount: Decimal) -> String {
    let amount = format_savings(amount);
    let pad = CONTENT_WIDTH.saturating_sub(label.len());
    format!("{label}{amount:>pad$}")
}
