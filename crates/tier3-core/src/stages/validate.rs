//! Stage one: loyalty-ID validation and daily-cap enforcement.
//!
//! Decision order is fixed: classify the input, then atomically bump the
//! daily count, then upsert the profile, then decide the manager-card
//! outcome from the count this request wrote, then append the validation
//! log. The cap check must use the returned post-increment value so that
//! when two requests race, exactly one of them serializes as the sixth.

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::lid::{LidFormat, LoyaltyId};
use crate::store::{CustomerProfile, LoyaltyStore, StoreError, ValidationLogEntry};

/// A loyalty id becomes a presumed manager/store card past this many
/// transactions in one calendar day.
pub const DAILY_TRANSACTION_CAP: u32 = 5;

/// Stage-one outcome, carried on the decision context.
#[derive(Debug, Clone, PartialEq)]
pub struct LidValidation {
    pub valid: bool,
    pub eligible_for_tier3: bool,
    pub eligible_for_cid_fund: bool,
    pub is_manager_card: bool,
    pub normalized_id: Option<String>,
    pub format_type: Option<LidFormat>,
    pub daily_count: u32,
    pub reason: String,
}

impl LidValidation {
    fn rejected(reason: String) -> Self {
        Self {
            valid: false,
            eligible_for_tier3: false,
            eligible_for_cid_fund: false,
            is_manager_card: false,
            normalized_id: None,
            format_type: None,
            daily_count: 0,
            reason,
        }
    }
}

/// Validates the loyalty id and applies the daily cap.
///
/// Returns the validation outcome together with the upserted profile when
/// the id is valid; the profile feeds the age gate's EAIV read. A storage
/// failure is fatal to the pipeline, but the validation-log append is
/// best-effort: losing the log row must not take down an otherwise decided
/// request.
pub fn validate_loyalty_id(
    store: &dyn LoyaltyStore,
    clock: &dyn Clock,
    raw_loyalty_id: Option<&str>,
    store_id: Option<&str>,
) -> Result<(LidValidation, Option<CustomerProfile>), StoreError> {
    let classified = LoyaltyId::classify(raw_loyalty_id);

    let (normalized_id, format) = match &classified {
        LoyaltyId::Invalid { reason } => {
            debug!(reason = %reason, "loyalty id rejected");
            let outcome = LidValidation::rejected(reason.clone());
            log_attempt(
                store,
                clock,
                raw_loyalty_id.unwrap_or_default(),
                store_id,
                &outcome,
            );
            return Ok((outcome, None));
        }
        LoyaltyId::Phone(id) => (id.clone(), LidFormat::PhoneNumber),
        LoyaltyId::Qr(id) => (id.clone(), LidFormat::QrCode),
    };

    // The count upsert is the first observable write of the request; the
    // profile upsert follows it, and both precede the log append.
    let daily_count = store.increment_daily_count(&normalized_id, clock.today())?;
    let mut profile = store.upsert_profile(&normalized_id, format, store_id, clock.now())?;

    let outcome = if daily_count > DAILY_TRANSACTION_CAP {
        store.mark_manager_card(&normalized_id)?;
        profile.is_manager_card = true;
        warn!(
            loyalty_id = %normalized_id,
            daily_count,
            "manager/store card detected, fund eligibility withdrawn"
        );
        LidValidation {
            valid: true,
            eligible_for_tier3: true,
            eligible_for_cid_fund: false,
            is_manager_card: true,
            normalized_id: Some(normalized_id.clone()),
            format_type: Some(format),
            daily_count,
            reason: format!(
                "Manager/store card detected: {daily_count} transactions today (exceeds cap of {DAILY_TRANSACTION_CAP})"
            ),
        }
    } else {
        LidValidation {
            valid: true,
            eligible_for_tier3: true,
            eligible_for_cid_fund: true,
            is_manager_card: false,
            normalized_id: Some(normalized_id.clone()),
            format_type: Some(format),
            daily_count,
            reason: "LoyaltyID valid and eligible".to_string(),
        }
    };

    log_attempt(store, clock, &normalized_id, store_id, &outcome);
    Ok((outcome, Some(profile)))
}

fn log_attempt(
    store: &dyn LoyaltyStore,
    clock: &dyn Clock,
    loyalty_id: &str,
    store_id: Option<&str>,
    outcome: &LidValidation,
) {
    let entry = ValidationLogEntry {
        loyalty_id: loyalty_id.to_string(),
        store_id: store_id.map(str::to_string),
        valid: outcome.valid,
        eligible_for_tier3: outcome.eligible_for_tier3,
        eligible_for_cid_fund: outcome.eligible_for_cid_fund,
        is_manager_card: outcome.is_manager_card,
        daily_count: outcome.daily_count,
        reason: outcome.reason.clone(),
        logged_at: clock.now(),
    };
    if let Err(err) = store.append_validation_log(&entry) {
        warn!(error = %err, loyalty_id, "validation log append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryStore;

    fn clock() -> FixedClock {
        FixedClock::on_date(2024, 6, 1)
    }

    #[test]
    fn missing_id_rejects_without_daily_count() {
        let store = MemoryStore::new();
        let (outcome, profile) =
            validate_loyalty_id(&store, &clock(), Some("  "), Some("STORE-1")).unwrap();
        assert!(!outcome.valid);
        assert!(!outcome.eligible_for_tier3);
        assert!(!outcome.eligible_for_cid_fund);
        assert_eq!(outcome.reason, "LoyaltyID is missing");
        assert_eq!(outcome.daily_count, 0);
        assert!(profile.is_none());
        // Every attempt still lands in the validation log.
        let log = store.validation_log();
        assert_eq!(log.len(), 1);
        assert!(!log[0].valid);
    }

    #[test]
    fn first_visit_creates_profile_and_counts_one() {
        let store = MemoryStore::new();
        let (outcome, profile) =
            validate_loyalty_id(&store, &clock(), Some("5551239876"), Some("STORE-1")).unwrap();
        assert!(outcome.valid);
        assert!(outcome.eligible_for_tier3);
        assert!(outcome.eligible_for_cid_fund);
        assert!(!outcome.is_manager_card);
        assert_eq!(outcome.daily_count, 1);
        assert_eq!(outcome.format_type, Some(LidFormat::PhoneNumber));

        let profile = profile.unwrap();
        assert_eq!(profile.loyalty_id, "5551239876");
        assert_eq!(profile.total_transactions, 1);
        assert!(profile.cid_customer_id.starts_with("CID_"));
    }

    #[test]
    fn sixth_transaction_flags_manager_card() {
        let store = MemoryStore::new();
        let clock = clock();
        for _ in 0..5 {
            let (outcome, _) =
                validate_loyalty_id(&store, &clock, Some("5551239876"), None).unwrap();
            assert!(outcome.eligible_for_cid_fund);
            assert!(!outcome.is_manager_card);
        }
        let (outcome, profile) =
            validate_loyalty_id(&store, &clock, Some("5551239876"), None).unwrap();
        assert!(outcome.valid);
        assert!(outcome.eligible_for_tier3);
        assert!(!outcome.eligible_for_cid_fund);
        assert!(outcome.is_manager_card);
        assert_eq!(outcome.daily_count, 6);
        assert_eq!(
            outcome.reason,
            "Manager/store card detected: 6 transactions today (exceeds cap of 5)"
        );
        assert!(profile.unwrap().is_manager_card);
        assert!(store.find_profile("5551239876").unwrap().unwrap().is_manager_card);
    }

    #[test]
    fn nine_digit_number_reports_its_length() {
        let store = MemoryStore::new();
        let (outcome, _) =
            validate_loyalty_id(&store, &clock(), Some("123456789"), None).unwrap();
        assert_eq!(
            outcome.reason,
            "LoyaltyID format invalid: length 9 not in range [10, 12]"
        );
        // No count row is created for invalid ids.
        assert_eq!(
            store
                .daily_count("123456789", clock().today())
                .unwrap(),
            0
        );
    }

    #[test]
    fn concurrent_requests_each_observe_their_own_count() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let clock = FixedClock::on_date(2024, 6, 1);
                let (outcome, _) =
                    validate_loyalty_id(store.as_ref(), &clock, Some("5551239876"), None).unwrap();
                outcome
            }));
        }
        let mut counts: Vec<u32> = handles
            .into_iter()
            .map(|h| h.join().unwrap().daily_count)
            .collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=8).collect::<Vec<_>>());
        // Exactly the requests that crossed the cap were denied the fund.
        let manager_flags = store
            .validation_log()
            .iter()
            .filter(|e| e.is_manager_card)
            .count();
        assert_eq!(manager_flags, 3); // counts 6, 7, 8
    }
}
