//! Shared fixtures for the daemon integration tests.
#![allow(dead_code)] // not every test binary uses every fixture

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use tier3_core::basket::BasketLine;
use tier3_core::catalog::{AllowanceRule, CartonBlock, CatalogEntry, PackBlock, UnitOfMeasure};
use tier3_core::clock::FixedClock;
use tier3_core::engine::{EngineConfig, Tier3Engine};
use tier3_core::request::{AvtStatus, RewardsRequest};
use tier3_daemon::SqliteStore;

/// Pack UPC of the seeded Marlboro SKU.
pub const MARLBORO_PACK_UPC: &str = "002820000112";

/// Carton UPC of the seeded Marlboro SKU.
pub const MARLBORO_CARTON_UPC: &str = "002820000119";

/// A store seeded with one Marlboro SKU and one 97-cent loyalty allowance,
/// backed by a temp file that lives as long as the returned guard.
pub fn seeded_store() -> (SqliteStore, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp database file");
    let store = SqliteStore::open(file.path()).expect("open store");

    store
        .upsert_catalog_entry(&CatalogEntry {
            skuguid: "SKU-MARL".to_string(),
            sku_name: Some("MARLBORO KS BOX".to_string()),
            brand: Some("MARLBORO".to_string()),
            manufacturer: Some("PM USA".to_string()),
            category: "CIG".to_string(),
            program_eligibility: Some("TIER3".to_string()),
            carton: CartonBlock {
                upc: Some(MARLBORO_CARTON_UPC.to_string()),
                suppressed_upc: Some("28200001190".to_string()),
                conversion_factor: Some(Decimal::new(10, 0)),
                is_promotional: false,
            },
            pack: PackBlock {
                upc: Some(MARLBORO_PACK_UPC.to_string()),
                conversion_factor: Some(Decimal::ONE),
                is_promotional: false,
            },
        })
        .expect("seed catalog");

    store
        .upsert_allowance(
            &AllowanceRule {
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
            Some("SKU-MARL"),
        )
        .expect("seed allowance");

    (store, file)
}

/// Engine over a seeded store, pinned to 2024-06-01.
pub fn engine(store: &SqliteStore) -> Tier3Engine {
    Tier3Engine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedClock::on_date(2024, 6, 1)),
        EngineConfig::default(),
    )
}

/// One Marlboro pack line at $7.00.
pub fn pack_line(line_number: u32, quantity: u32) -> BasketLine {
    BasketLine {
        line_number,
        upc: Some(MARLBORO_PACK_UPC.to_string()),
        quantity,
        unit_price: Decimal::new(700, 2),
        description: Some("MARLBORO KS BOX".to_string()),
    }
}

/// A complete rewards request for the seeded fixture.
pub fn request(
    loyalty_id: &str,
    avt: Option<AvtStatus>,
    lines: Vec<BasketLine>,
) -> RewardsRequest {
    RewardsRequest {
        store_location_id: Some("STORE-1".to_string()),
        transaction_id: Some("TXN-1001".to_string()),
        cashier_id: Some("CASHIER-7".to_string()),
        loyalty_id: Some(loyalty_id.to_string()),
        avt_status: avt,
        lines,
    }
}
