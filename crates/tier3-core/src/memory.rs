//! In-memory implementations of the storage traits.
//!
//! Used by unit tests and anywhere a throwaway store is handy. Semantics
//! mirror the SQLite implementations in the daemon: atomic daily-count
//! increments, insert-once profile fields, append-only logs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use crate::catalog::{AllowanceRule, CatalogEntry, UpcMatchKind, UpcResolution};
use crate::lid::{derive_cid_customer_id, LidFormat};
use crate::store::{
    AvtRecord, CatalogStore, CustomerProfile, LoyaltyStore, StoreError, TransactionRecord,
    ValidationLogEntry,
};

/// Lock-protected hash-map store; all five write paths in one mutex so the
/// per-id serialization contract holds trivially.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    daily_counts: HashMap<(String, NaiveDate), u32>,
    profiles: HashMap<String, CustomerProfile>,
    validation_log: Vec<ValidationLogEntry>,
    avt_log: Vec<AvtRecord>,
    transactions: Vec<TransactionRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a profile, e.g. one the companion app created with EAIV set.
    pub fn seed_profile(&self, profile: CustomerProfile) {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.profiles.insert(profile.loyalty_id.clone(), profile);
    }

    #[must_use]
    pub fn validation_log(&self) -> Vec<ValidationLogEntry> {
        self.inner.lock().expect("memory store lock").validation_log.clone()
    }

    #[must_use]
    pub fn avt_log(&self) -> Vec<AvtRecord> {
        self.inner.lock().expect("memory store lock").avt_log.clone()
    }

    #[must_use]
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.inner.lock().expect("memory store lock").transactions.clone()
    }
}

impl LoyaltyStore for MemoryStore {
    fn increment_daily_count(
        &self,
        loyalty_id: &str,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let count = inner
            .daily_counts
            .entry((loyalty_id.to_string(), date))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn daily_count(&self, loyalty_id: &str, date: NaiveDate) -> Result<u32, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner
            .daily_counts
            .get(&(loyalty_id.to_string(), date))
            .copied()
            .unwrap_or(0))
    }

    fn upsert_profile(
        &self,
        loyalty_id: &str,
        format: LidFormat,
        store_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<CustomerProfile, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let profile = inner
            .profiles
            .entry(loyalty_id.to_string())
            .and_modify(|p| {
                p.last_seen = seen_at;
                p.total_transactions += 1;
            })
            .or_insert_with(|| CustomerProfile {
                loyalty_id: loyalty_id.to_string(),
                cid_customer_id: derive_cid_customer_id(loyalty_id),
                format_type: format,
                store_id: store_id.map(str::to_string),
                first_seen: seen_at,
                last_seen: seen_at,
                total_transactions: 1,
                is_manager_card: false,
                avt_verified: false,
                eaiv_verified: false,
                last_avt_verified: None,
                last_eaiv_verified: None,
            });
        Ok(profile.clone())
    }

    fn mark_manager_card(&self, loyalty_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if let Some(profile) = inner.profiles.get_mut(loyalty_id) {
            profile.is_manager_card = true;
        }
        Ok(())
    }

    fn find_profile(&self, loyalty_id: &str) -> Result<Option<CustomerProfile>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.profiles.get(loyalty_id).cloned())
    }

    fn append_validation_log(&self, entry: &ValidationLogEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.validation_log.push(entry.clone());
        Ok(())
    }

    fn record_avt_confirmation(&self, record: &AvtRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.avt_log.push(record.clone());
        if let Some(id) = record.loyalty_id.as_deref() {
            if let Some(profile) = inner.profiles.get_mut(id) {
                profile.avt_verified = true;
                profile.last_avt_verified = Some(record.avt_timestamp);
            }
        }
        Ok(())
    }

    fn record_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.transactions.push(record.clone());
        Ok(())
    }
}

/// In-memory catalog with the same resolution order as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Vec<CatalogEntry>,
    /// `(rule, mapped skuguid)`; `None` maps the rule to every product.
    allowances: Vec<(AllowanceRule, Option<String>)>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn add_allowance(&mut self, rule: AllowanceRule, skuguid: Option<String>) {
        self.allowances.push((rule, skuguid));
    }
}

impl CatalogStore for MemoryCatalog {
    fn resolve_upc(&self, upc: &str) -> Result<Option<UpcResolution>, StoreError> {
        // Column precedence over the whole table, mirroring the SQL probes:
        // any carton match wins over any pack match, which wins over any
        // suppressed-carton match.
        type Probe = fn(&CatalogEntry, &str) -> bool;
        let probes: [(Probe, UpcMatchKind); 3] = [
            (
                |e, u| e.carton.upc.as_deref() == Some(u),
                UpcMatchKind::Carton,
            ),
            (|e, u| e.pack.upc.as_deref() == Some(u), UpcMatchKind::Pack),
            (
                |e, u| e.carton.suppressed_upc.as_deref() == Some(u),
                UpcMatchKind::CartonSuppressed,
            ),
        ];
        for (probe, matched) in probes {
            for entry in &self.entries {
                if probe(entry, upc) {
                    return Ok(Some(UpcResolution {
                        entry: entry.clone(),
                        matched,
                    }));
                }
            }
        }
        Ok(None)
    }

    fn active_allowances_for_sku(
        &self,
        skuguid: &str,
        today: NaiveDate,
    ) -> Result<Vec<AllowanceRule>, StoreError> {
        let mut rules: Vec<AllowanceRule> = self
            .allowances
            .iter()
            .filter(|(rule, mapped)| {
                rule.is_active(today) && mapped.as_deref().map_or(true, |s| s == skuguid)
            })
            .map(|(rule, _)| rule.clone())
            .collect();
        rules.sort_by(|a, b| a.allowance_id.cmp(&b.allowance_id));
        rules.dedup_by(|a, b| a.allowance_id == b.allowance_id);
        Ok(rules)
    }
}
