//! Basket line types, raw and normalized.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{UnitOfMeasure, UpcMatchKind};

/// One transaction line as the POS sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketLine {
    pub line_number: u32,
    pub upc: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub description: Option<String>,
}

/// A raw line enriched with catalog fields, after merging.
///
/// The merge key is `(upc, unit_price)`; merged lines keep the first
/// occurrence's line number and catalog fields and sum their quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub line_number: u32,
    pub upc: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub description: Option<String>,
    pub skuguid: Option<String>,
    pub sku_name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub category: String,
    /// Absent for unknown UPCs, which matched no catalog column.
    pub unit_of_measure: Option<UnitOfMeasure>,
    pub matched_upc_type: Option<UpcMatchKind>,
    pub is_promotional_upc: bool,
    pub is_unknown: bool,
}

impl NormalizedLine {
    /// Extended price before any discount.
    #[must_use]
    pub fn base_extended_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// True when the brand field contains the Marlboro family name.
    #[must_use]
    pub fn is_marlboro(&self) -> bool {
        self.brand
            .as_deref()
            .is_some_and(|b| b.to_ascii_uppercase().contains("MARLBORO"))
    }
}

/// A raw line the normalizer refused, with the reason kept for the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedLine {
    pub line_number: u32,
    pub reason: String,
}

/// Output of basket normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBasket {
    pub lines: Vec<NormalizedLine>,
    /// UPCs that resolved to no catalog row, in first-seen order.
    pub unknown_upcs: Vec<String>,
    pub dropped_lines: Vec<DroppedLine>,
    /// Count of raw lines absorbed by merging: pre-merge minus post-merge.
    pub merged_line_count: u32,
}
