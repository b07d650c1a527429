//! Stage three: basket normalization.
//!
//! Each raw line's UPC is resolved against the catalog (carton column, then
//! pack, then suppressed carton; first hit wins). Misses become synthetic
//! unknown-tobacco lines that the rest of the pipeline prices with zero
//! discount. Resolved lines then merge on `(upc, unit_price)` so a POS that
//! splits one purchase across several identical lines still qualifies for
//! quantity-gated programs downstream.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::basket::{BasketLine, DroppedLine, NormalizedBasket, NormalizedLine};
use crate::catalog::UNKNOWN_TOBACCO_CATEGORY;
use crate::store::{CatalogStore, StoreError};

/// Normalizes and merges the raw basket.
pub fn normalize_basket(
    catalog: &dyn CatalogStore,
    lines: &[BasketLine],
) -> Result<NormalizedBasket, StoreError> {
    let mut basket = NormalizedBasket::default();
    let mut resolved: Vec<NormalizedLine> = Vec::with_capacity(lines.len());

    for line in lines {
        let Some(upc) = line.upc.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            basket.dropped_lines.push(DroppedLine {
                line_number: line.line_number,
                reason: "line has no UPC".to_string(),
            });
            continue;
        };
        if line.quantity == 0 {
            basket.dropped_lines.push(DroppedLine {
                line_number: line.line_number,
                reason: "line has zero quantity".to_string(),
            });
            continue;
        }

        match catalog.resolve_upc(upc)? {
            Some(resolution) => {
                let matched = resolution.matched;
                let entry = resolution.entry;
                resolved.push(NormalizedLine {
                    line_number: line.line_number,
                    upc: upc.to_string(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    description: line.description.clone(),
                    skuguid: Some(entry.skuguid.clone()),
                    sku_name: entry.sku_name.clone(),
                    brand: entry.brand.clone(),
                    manufacturer: entry.manufacturer.clone(),
                    category: entry.category.clone(),
                    unit_of_measure: Some(matched.unit_of_measure()),
                    matched_upc_type: Some(matched),
                    is_promotional_upc: entry.is_promotional(matched),
                    is_unknown: false,
                });
            }
            None => {
                debug!(upc, "UPC not in catalog, classifying as unknown tobacco");
                if !basket.unknown_upcs.iter().any(|u| u == upc) {
                    basket.unknown_upcs.push(upc.to_string());
                }
                resolved.push(NormalizedLine {
                    line_number: line.line_number,
                    upc: upc.to_string(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    description: line.description.clone(),
                    skuguid: None,
                    sku_name: None,
                    brand: None,
                    manufacturer: None,
                    category: UNKNOWN_TOBACCO_CATEGORY.to_string(),
                    unit_of_measure: None,
                    matched_upc_type: None,
                    is_promotional_upc: false,
                    is_unknown: true,
                });
            }
        }
    }

    let pre_merge = resolved.len();
    basket.lines = merge_lines(resolved);
    basket.merged_line_count = (pre_merge - basket.lines.len()) as u32;
    Ok(basket)
}

/// Groups lines by `(upc, unit_price)` preserving first-occurrence order;
/// quantities sum, every other field keeps the first occurrence's value.
/// Same UPC at a different unit price stays a separate line.
fn merge_lines(lines: Vec<NormalizedLine>) -> Vec<NormalizedLine> {
    let mut merged: Vec<NormalizedLine> = Vec::with_capacity(lines.len());
    let mut index: HashMap<(String, Decimal), usize> = HashMap::new();

    for line in lines {
        let key = (line.upc.clone(), line.unit_price);
        match index.get(&key) {
            Some(&slot) => merged[slot].quantity += line.quantity,
            None => {
                index.insert(key, merged.len());
                merged.push(line);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CartonBlock, CatalogEntry, PackBlock, UnitOfMeasure, UpcMatchKind};
    use crate::memory::MemoryCatalog;

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
                suppressed_upc: Some("28200001190".to_string()),
                conversion_factor: Some(Decimal::new(10, 0)),
                is_promotional: false,
            },
            pack: PackBlock {
                upc: Some("002820000112".to_string()),
                conversion_factor: Some(Decimal::ONE),
                is_promotional: false,
            },
        });
        catalog
    }

    fn raw(line_number: u32, upc: &str, quantity: u32, cents: i64) -> BasketLine {
        BasketLine {
            line_number,
            upc: Some(upc.to_string()),
            quantity,
            unit_price: Decimal::new(cents, 2),
            description: None,
        }
    }

    #[test]
    fn resolves_pack_upc_with_pack_uom() {
        let catalog = catalog();
        let basket = normalize_basket(&catalog, &[raw(1, "002820000112", 1, 700)]).unwrap();
        assert_eq!(basket.lines.len(), 1);
        let line = &basket.lines[0];
        assert_eq!(line.skuguid.as_deref(), Some("SKU-MARL"));
        assert_eq!(line.unit_of_measure, Some(UnitOfMeasure::Pack));
        assert_eq!(line.matched_upc_type, Some(UpcMatchKind::Pack));
        assert!(!line.is_unknown);
        assert!(basket.unknown_upcs.is_empty());
    }

    #[test]
    fn unknown_upc_synthesizes_unknown_tobacco_line() {
        let catalog = catalog();
        let basket = normalize_basket(&catalog, &[raw(1, "999999999999", 2, 500)]).unwrap();
        assert_eq!(basket.lines.len(), 1);
        let line = &basket.lines[0];
        assert!(line.is_unknown);
        assert_eq!(line.category, UNKNOWN_TOBACCO_CATEGORY);
        assert!(line.skuguid.is_none());
        assert!(line.unit_of_measure.is_none());
        assert_eq!(basket.unknown_upcs, vec!["999999999999".to_string()]);
    }

    #[test]
    fn upc_less_and_zero_quantity_lines_are_dropped_with_reasons() {
        let catalog = catalog();
        let lines = [
            BasketLine {
                line_number: 1,
                upc: None,
                quantity: 1,
                unit_price: Decimal::new(700, 2),
                description: None,
            },
            raw(2, "002820000112", 0, 700),
        ];
        let basket = normalize_basket(&catalog, &lines).unwrap();
        assert!(basket.lines.is_empty());
        assert_eq!(basket.dropped_lines.len(), 2);
        assert!(basket.dropped_lines[0].reason.contains("no UPC"));
        assert!(basket.dropped_lines[1].reason.contains("zero quantity"));
    }

    #[test]
    fn identical_lines_merge_and_sum_quantity() {
        let catalog = catalog();
        let basket = normalize_basket(
            &catalog,
            &[
                raw(1, "002820000112", 1, 700),
                raw(2, "002820000112", 1, 700),
            ],
        )
        .unwrap();
        assert_eq!(basket.lines.len(), 1);
        assert_eq!(basket.lines[0].quantity, 2);
        assert_eq!(basket.lines[0].line_number, 1);
        assert_eq!(basket.merged_line_count, 1);
    }

    #[test]
    fn different_prices_do_not_merge() {
        let catalog = catalog();
        let basket = normalize_basket(
            &catalog,
            &[
                raw(1, "002820000112", 1, 700),
                raw(2, "002820000112", 1, 650),
            ],
        )
        .unwrap();
        assert_eq!(basket.lines.len(), 2);
        assert_eq!(basket.merged_line_count, 0);
    }

    #[test]
    fn merge_is_idempotent_and_preserves_totals() {
        let catalog = catalog();
        let lines = [
            raw(1, "002820000112", 1, 700),
            raw(2, "002820000112", 2, 700),
            raw(3, "002820000119", 1, 6500),
        ];
        let basket = normalize_basket(&catalog, &lines).unwrap();

        let total_qty: u32 = basket.lines.iter().map(|l| l.quantity).sum();
        let total_value: Decimal = basket
            .lines
            .iter()
            .map(NormalizedLine::base_extended_price)
            .sum();
        assert_eq!(total_qty, 4);
        assert_eq!(total_value, Decimal::new(700 * 3 + 6500, 2));

        // Re-merging the merged set changes nothing.
        let again = merge_lines(basket.lines.clone());
        assert_eq!(again, basket.lines);
    }
}
