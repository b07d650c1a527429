//! SQLite persistence for the decision pipeline.
//!
//! One [`SqliteStore`] implements both storage traits on a single shared
//! connection. The connection mutex is what provides the per-loyalty-id
//! serialization contract: the daily-count upsert and its post-increment
//! read run under one lock acquisition, so the count a request observes is
//! the count it wrote.
//!
//! # Schema
//!
//! Loyalty side: `customer_profiles`, `daily_transaction_counts`,
//! `loyalty_validation_log`, `avt_transactions`, `transactions`,
//! `transaction_lines`. Catalog side (written by the upstream synchronizer,
//! read-only during request processing): `upc_master`,
//! `loyalty_allowances`, `loyalty_allowance_skus`.
//!
//! Monetary columns are stored as TEXT and parsed into `Decimal`; dates are
//! ISO-8601 TEXT; timestamps are RFC 3339 TEXT.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

use tier3_core::catalog::{
    AllowanceRule, CartonBlock, CatalogEntry, PackBlock, UnitOfMeasure, UpcMatchKind,
    UpcResolution,
};
use tier3_core::lid::{derive_cid_customer_id, LidFormat};
use tier3_core::store::{
    AvtRecord, CatalogStore, CustomerProfile, LoyaltyStore, StoreError, TransactionRecord,
    ValidationLogEntry,
};

/// Durable store backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and initializes the
    /// schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
            message: format!("failed to open database {}: {e}", path.display()),
        })?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            message: format!("failed to open in-memory database: {e}"),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "busy_timeout", 10_000).ok();
        Self::init_schema(&conn).map_err(|e| StoreError::Unavailable {
            message: format!("schema initialization failed: {e}"),
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates all tables and indexes if they do not exist.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS customer_profiles (
                loyalty_id TEXT PRIMARY KEY,
                cid_customer_id TEXT NOT NULL UNIQUE,
                format_type TEXT NOT NULL,
                store_id TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                total_transactions INTEGER NOT NULL DEFAULT 0,
                is_manager_card INTEGER NOT NULL DEFAULT 0,
                avt_verified INTEGER NOT NULL DEFAULT 0,
                eaiv_verified INTEGER NOT NULL DEFAULT 0,
                last_avt_verified TEXT,
                last_eaiv_verified TEXT
            );

            CREATE TABLE IF NOT EXISTS daily_transaction_counts (
                loyalty_id TEXT NOT NULL,
                transaction_date TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                UNIQUE(loyalty_id, transaction_date)
            );

            CREATE TABLE IF NOT EXISTS loyalty_validation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                loyalty_id TEXT NOT NULL,
                store_id TEXT,
                valid INTEGER NOT NULL,
                eligible_for_tier3 INTEGER NOT NULL,
                eligible_for_cid_fund INTEGER NOT NULL,
                is_manager_card INTEGER NOT NULL,
                daily_count INTEGER NOT NULL,
                reason TEXT NOT NULL,
                logged_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS avt_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                loyalty_id TEXT,
                cid_customer_id TEXT,
                avt_performed INTEGER NOT NULL,
                avt_method TEXT NOT NULL,
                avt_timestamp TEXT NOT NULL,
                cashier_id TEXT,
                eaiv_verified INTEGER
            );

            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                store_id TEXT,
                loyalty_id TEXT,
                age_verified INTEGER NOT NULL,
                eaiv_verified INTEGER NOT NULL,
                tier3_eligible INTEGER NOT NULL,
                cid_fund_eligible INTEGER NOT NULL,
                total_discount TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transaction_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL,
                line_number INTEGER NOT NULL,
                upc TEXT NOT NULL,
                skuguid TEXT,
                quantity INTEGER NOT NULL,
                unit_price TEXT NOT NULL,
                loyalty_discount TEXT NOT NULL,
                manufacturer_discount TEXT NOT NULL,
                multi_unit_discount TEXT NOT NULL,
                retailer_discount TEXT NOT NULL,
                other_manufacturer_discount TEXT NOT NULL,
                transaction_discount TEXT NOT NULL,
                total_discount TEXT NOT NULL,
                final_extended_price TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS upc_master (
                skuguid TEXT PRIMARY KEY,
                sku_name TEXT,
                brand TEXT,
                manufacturer TEXT,
                category TEXT NOT NULL,
                program_eligibility TEXT,
                carton_upc TEXT,
                carton_suppressed_upc TEXT,
                carton_conversion_factor TEXT,
                carton_is_promotional INTEGER NOT NULL DEFAULT 0,
                pack_upc TEXT,
                pack_conversion_factor TEXT,
                pack_is_promotional INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS loyalty_allowances (
                allowance_id TEXT PRIMARY KEY,
                allowance_type TEXT NOT NULL,
                min_qty INTEGER NOT NULL DEFAULT 1,
                max_allowance_per_transaction TEXT,
                max_daily_transactions_per_loyalty INTEGER,
                manufacturer_funded_amount TEXT,
                promo_code TEXT,
                promotional_upcs_eligible INTEGER NOT NULL DEFAULT 0,
                eligible_uoms TEXT,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS loyalty_allowance_skus (
                allowance_id TEXT NOT NULL,
                skuguid TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_validation_log_lid
                ON loyalty_validation_log(loyalty_id);
            CREATE INDEX IF NOT EXISTS idx_avt_transaction_id
                ON avt_transactions(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_txn_lines_txn
                ON transaction_lines(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_upc_master_carton ON upc_master(carton_upc);
            CREATE INDEX IF NOT EXISTS idx_upc_master_pack ON upc_master(pack_upc);
            CREATE INDEX IF NOT EXISTS idx_upc_master_suppressed
                ON upc_master(carton_suppressed_upc);
            CREATE INDEX IF NOT EXISTS idx_allowance_skus_sku
                ON loyalty_allowance_skus(skuguid);",
        )
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Unavailable {
            message: "connection lock poisoned".to_string(),
        })
    }

    /// Deletes daily-count rows older than `cutoff`. Runs at startup so the
    /// table stays bounded; seven days of history is all the cap ever needs.
    pub fn sweep_daily_counts(&self, cutoff: NaiveDate) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM daily_transaction_counts WHERE transaction_date < ?1",
                params![cutoff.to_string()],
            )
            .map_err(query_err)?;
        if deleted > 0 {
            info!(deleted, "swept stale daily transaction counts");
        }
        Ok(deleted)
    }

    /// Inserts or replaces a catalog row. This is the write surface the
    /// upstream catalog synchronizer batches through; tests use it to seed
    /// fixtures.
    pub fn upsert_catalog_entry(&self, entry: &CatalogEntry) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO upc_master (
                skuguid, sku_name, brand, manufacturer, category,
                program_eligibility, carton_upc, carton_suppressed_upc,
                carton_conversion_factor, carton_is_promotional,
                pack_upc, pack_conversion_factor, pack_is_promotional
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.skuguid,
                entry.sku_name,
                entry.brand,
                entry.manufacturer,
                entry.category,
                entry.program_eligibility,
                entry.carton.upc,
                entry.carton.suppressed_upc,
                entry.carton.conversion_factor.map(|d| d.to_string()),
                entry.carton.is_promotional,
                entry.pack.upc,
                entry.pack.conversion_factor.map(|d| d.to_string()),
                entry.pack.is_promotional,
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    /// Inserts an allowance rule with one SKU mapping; a `None` mapping
    /// applies the rule to all products.
    pub fn upsert_allowance(
        &self,
        rule: &AllowanceRule,
        skuguid: Option<&str>,
    ) -> Result<(), StoreError> {
        let uoms = if rule.eligible_uoms.is_empty() {
            None
        } else {
            Some(
                rule.eligible_uoms
                    .iter()
                    .map(|u| u.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO loyalty_allowances (
                allowance_id, allowance_type, min_qty,
                max_allowance_per_transaction, max_daily_transactions_per_loyalty,
                manufacturer_funded_amount, promo_code, promotional_upcs_eligible,
                eligible_uoms, start_date, end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rule.allowance_id,
                rule.allowance_type,
                rule.min_qty,
                rule.max_allowance_per_transaction.map(|d| d.to_string()),
                rule.max_daily_transactions_per_loyalty,
                rule.manufacturer_funded_amount.map(|d| d.to_string()),
                rule.promo_code,
                rule.promotional_upcs_eligible,
                uoms,
                rule.start_date.to_string(),
                rule.end_date.to_string(),
            ],
        )
        .map_err(query_err)?;
        conn.execute(
            "INSERT INTO loyalty_allowance_skus (allowance_id, skuguid) VALUES (?1, ?2)",
            params![rule.allowance_id, skuguid],
        )
        .map_err(query_err)?;
        Ok(())
    }

    /// Seeds or updates the EAIV flag on a profile, as the companion app's
    /// backend does after an identity verification.
    pub fn set_profile_eaiv(
        &self,
        loyalty_id: &str,
        verified: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE customer_profiles
             SET eaiv_verified = ?2, last_eaiv_verified = ?3
             WHERE loyalty_id = ?1",
            params![loyalty_id, verified, at.to_rfc3339()],
        )
        .map_err(query_err)?;
        Ok(())
    }

    /// Counts validation-log rows, for tests and operator queries.
    pub fn validation_log_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM loyalty_validation_log", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(query_err)
    }

    /// Counts AVT audit rows for one transaction id.
    pub fn avt_count_for_transaction(&self, transaction_id: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM avt_transactions WHERE transaction_id = ?1",
            params![transaction_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(query_err)
    }

    /// Loads a persisted transaction header with its line count.
    pub fn transaction_line_count(&self, transaction_id: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM transaction_lines WHERE transaction_id = ?1",
            params![transaction_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(query_err)
    }
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query {
        message: e.to_string(),
    }
}

fn parse_opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Decimal::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_timestamp(idx, &t)).transpose()
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<CustomerProfile> {
    let format_text: String = row.get(2)?;
    let format_type = LidFormat::parse(&format_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown loyalty id format {format_text:?}").into(),
        )
    })?;
    let first_seen: String = row.get(4)?;
    let last_seen: String = row.get(5)?;
    Ok(CustomerProfile {
        loyalty_id: row.get(0)?,
        cid_customer_id: row.get(1)?,
        format_type,
        store_id: row.get(3)?,
        first_seen: parse_timestamp(4, &first_seen)?,
        last_seen: parse_timestamp(5, &last_seen)?,
        total_transactions: row.get::<_, i64>(6)? as u64,
        is_manager_card: row.get(7)?,
        avt_verified: row.get(8)?,
        eaiv_verified: row.get(9)?,
        last_avt_verified: parse_opt_timestamp(row, 10)?,
        last_eaiv_verified: parse_opt_timestamp(row, 11)?,
    })
}

const PROFILE_COLUMNS: &str = "loyalty_id, cid_customer_id, format_type, store_id, first_seen, \
     last_seen, total_transactions, is_manager_card, avt_verified, eaiv_verified, \
     last_avt_verified, last_eaiv_verified";

impl LoyaltyStore for SqliteStore {
    fn increment_daily_count(
        &self,
        loyalty_id: &str,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        // Upsert and read under one lock hold; the mutex serializes racing
        // requests so each observes its own increment.
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO daily_transaction_counts (loyalty_id, transaction_date, count, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(loyalty_id, transaction_date)
             DO UPDATE SET count = count + 1, updated_at = ?3",
            params![loyalty_id, date.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(query_err)?;

        let count: i64 = conn
            .query_row(
                "SELECT count FROM daily_transaction_counts
                 WHERE loyalty_id = ?1 AND transaction_date = ?2",
                params![loyalty_id, date.to_string()],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        debug!(loyalty_id, %date, count, "daily count incremented");
        Ok(count as u32)
    }

    fn daily_count(&self, loyalty_id: &str, date: NaiveDate) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM daily_transaction_counts
                 WHERE loyalty_id = ?1 AND transaction_date = ?2",
                params![loyalty_id, date.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        Ok(count.unwrap_or(0) as u32)
    }

    fn upsert_profile(
        &self,
        loyalty_id: &str,
        format: LidFormat,
        store_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<CustomerProfile, StoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE customer_profiles
                 SET last_seen = ?2, total_transactions = total_transactions + 1
                 WHERE loyalty_id = ?1",
                params![loyalty_id, seen_at.to_rfc3339()],
            )
            .map_err(query_err)?;
        if updated == 0 {
            // First sighting: insert-only fields are set here and never
            // rewritten afterwards.
            conn.execute(
                "INSERT INTO customer_profiles (
                    loyalty_id, cid_customer_id, format_type, store_id,
                    first_seen, last_seen, total_transactions
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
                params![
                    loyalty_id,
                    derive_cid_customer_id(loyalty_id),
                    format.as_str(),
                    store_id,
                    seen_at.to_rfc3339(),
                ],
            )
            .map_err(query_err)?;
        }
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM customer_profiles WHERE loyalty_id = ?1"),
            params![loyalty_id],
            profile_from_row,
        )
        .map_err(query_err)
    }

    fn mark_manager_card(&self, loyalty_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE customer_profiles SET is_manager_card = 1 WHERE loyalty_id = ?1",
            params![loyalty_id],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn find_profile(&self, loyalty_id: &str) -> Result<Option<CustomerProfile>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM customer_profiles WHERE loyalty_id = ?1"),
            params![loyalty_id],
            profile_from_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn append_validation_log(&self, entry: &ValidationLogEntry) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO loyalty_validation_log (
                loyalty_id, store_id, valid, eligible_for_tier3,
                eligible_for_cid_fund, is_manager_card, daily_count, reason, logged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.loyalty_id,
                entry.store_id,
                entry.valid,
                entry.eligible_for_tier3,
                entry.eligible_for_cid_fund,
                entry.is_manager_card,
                entry.daily_count,
                entry.reason,
                entry.logged_at.to_rfc3339(),
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn record_avt_confirmation(&self, record: &AvtRecord) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute(
            "INSERT INTO avt_transactions (
                transaction_id, store_id, loyalty_id, cid_customer_id,
                avt_performed, avt_method, avt_timestamp, cashier_id, eaiv_verified
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.transaction_id,
                record.store_id,
                record.loyalty_id,
                record.cid_customer_id,
                record.avt_performed,
                record.avt_method,
                record.avt_timestamp.to_rfc3339(),
                record.cashier_id,
                record.eaiv_verified,
            ],
        )
        .map_err(query_err)?;
        if let Some(loyalty_id) = record.loyalty_id.as_deref() {
            tx.execute(
                "UPDATE customer_profiles
                 SET avt_verified = 1, last_avt_verified = ?2
                 WHERE loyalty_id = ?1",
                params![loyalty_id, record.avt_timestamp.to_rfc3339()],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn record_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO transactions (
                transaction_id, store_id, loyalty_id, age_verified, eaiv_verified,
                tier3_eligible, cid_fund_eligible, total_discount, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.transaction_id,
                record.store_id,
                record.loyalty_id,
                record.age_verified,
                record.eaiv_verified,
                record.tier3_eligible,
                record.cid_fund_eligible,
                record.total_discount.to_string(),
                record.recorded_at.to_rfc3339(),
            ],
        )
        .map_err(query_err)?;
        // Replays of the same POS transaction replace its lines wholesale.
        tx.execute(
            "DELETE FROM transaction_lines WHERE transaction_id = ?1",
            params![record.transaction_id],
        )
        .map_err(query_err)?;
        for line in &record.lines {
            tx.execute(
                "INSERT INTO transaction_lines (
                    transaction_id, line_number, upc, skuguid, quantity, unit_price,
                    loyalty_discount, manufacturer_discount, multi_unit_discount,
                    retailer_discount, other_manufacturer_discount, transaction_discount,
                    total_discount, final_extended_price
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.transaction_id,
                    line.line_number,
                    line.upc,
                    line.skuguid,
                    line.quantity,
                    line.unit_price.to_string(),
                    line.loyalty_discount.to_string(),
                    line.manufacturer_discount.to_string(),
                    line.multi_unit_discount.to_string(),
                    line.retailer_discount.to_string(),
                    line.other_manufacturer_discount.to_string(),
                    line.transaction_discount.to_string(),
                    line.total_discount.to_string(),
                    line.final_extended_price.to_string(),
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }
}

const CATALOG_COLUMNS: &str = "skuguid, sku_name, brand, manufacturer, category, \
     program_eligibility, carton_upc, carton_suppressed_upc, carton_conversion_factor, \
     carton_is_promotional, pack_upc, pack_conversion_factor, pack_is_promotional";

fn catalog_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        skuguid: row.get(0)?,
        sku_name: row.get(1)?,
        brand: row.get(2)?,
        manufacturer: row.get(3)?,
        category: row.get(4)?,
        program_eligibility: row.get(5)?,
        carton: CartonBlock {
            upc: row.get(6)?,
            suppressed_upc: row.get(7)?,
            conversion_factor: parse_opt_decimal_col(row, 8)?,
            is_promotional: row.get(9)?,
        },
        pack: PackBlock {
            upc: row.get(10)?,
            conversion_factor: parse_opt_decimal_col(row, 11)?,
            is_promotional: row.get(12)?,
        },
    })
}

impl CatalogStore for SqliteStore {
    fn resolve_upc(&self, upc: &str) -> Result<Option<UpcResolution>, StoreError> {
        let conn = self.lock()?;
        // Fixed probe order: carton, pack, suppressed carton; first hit wins.
        let probes: [(&str, UpcMatchKind); 3] = [
            ("carton_upc", UpcMatchKind::Carton),
            ("pack_upc", UpcMatchKind::Pack),
            ("carton_suppressed_upc", UpcMatchKind::CartonSuppressed),
        ];
        for (column, matched) in probes {
            let entry = conn
                .query_row(
                    &format!("SELECT {CATALOG_COLUMNS} FROM upc_master WHERE {column} = ?1"),
                    params![upc],
                    catalog_entry_from_row,
                )
                .optional()
                .map_err(query_err)?;
            if let Some(entry) = entry {
                return Ok(Some(UpcResolution { entry, matched }));
            }
        }
        Ok(None)
    }

    fn active_allowances_for_sku(
        &self,
        skuguid: &str,
        today: NaiveDate,
    ) -> Result<Vec<AllowanceRule>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT a.allowance_id, a.allowance_type, a.min_qty,
                        a.max_allowance_per_transaction, a.max_daily_transactions_per_loyalty,
                        a.manufacturer_funded_amount, a.promo_code, a.promotional_upcs_eligible,
                        a.eligible_uoms, a.start_date, a.end_date
                 FROM loyalty_allowances a
                 JOIN loyalty_allowance_skus m ON m.allowance_id = a.allowance_id
                 WHERE (m.skuguid = ?1 OR m.skuguid IS NULL)
                   AND a.start_date <= ?2 AND a.end_date >= ?2
                 ORDER BY a.allowance_id",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![skuguid, today.to_string()], |row| {
                let uoms_text: Option<String> = row.get(8)?;
                let eligible_uoms = uoms_text
                    .as_deref()
                    .map(|t| {
                        t.split(',')
                            .filter_map(|p| UnitOfMeasure::parse(p.trim()))
                            .collect()
                    })
                    .unwrap_or_default();
                let start_date: String = row.get(9)?;
                let end_date: String = row.get(10)?;
                Ok(AllowanceRule {
                    allowance_id: row.get(0)?,
                    allowance_type: row.get(1)?,
                    min_qty: row.get::<_, i64>(2)? as u32,
                    max_allowance_per_transaction: parse_opt_decimal_col(row, 3)?,
                    max_daily_transactions_per_loyalty: row
                        .get::<_, Option<i64>>(4)?
                        .map(|n| n as u32),
                    manufacturer_funded_amount: parse_opt_decimal_col(row, 5)?,
                    promo_code: row.get(6)?,
                    promotional_upcs_eligible: row.get(7)?,
                    eligible_uoms,
                    start_date: parse_date(9, &start_date)?,
                    end_date: parse_date(10, &end_date)?,
                })
            })
            .map_err(query_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

fn parse_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
