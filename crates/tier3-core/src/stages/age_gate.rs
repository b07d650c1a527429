//! Stage two: age gating.
//!
//! Two independent verification signals meet here. AVT is the cashier's
//! in-person confirmation and arrives with the request; it alone decides
//! whether tobacco incentives may flow. EAIV is the app-side identity proof
//! and is read from the customer profile — never from the POS. When the
//! cashier confirmed, one audit row is appended before any response is sent;
//! losing that row is not an option, so the append failure is fatal.

use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::request::AvtStatus;
use crate::store::{AvtRecord, CustomerProfile, LoyaltyStore, AVT_METHOD_IN_PERSON};

/// Stage-two outcome, carried on the decision context.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeGateOutcome {
    pub age_verified: bool,
    pub eaiv_verified: bool,
    pub eligible_for_tier3_incentives: bool,
    pub eligible_for_eaiv_only_incentives: bool,
    pub reason: String,
}

/// Applies the age gate and, when the cashier confirmed, records the audit
/// row.
///
/// The later stages still run when age verification fails — the POS gets a
/// complete zero-reward response, not an error — so this function only sets
/// flags and never short-circuits.
pub fn confirm_age(
    store: &dyn LoyaltyStore,
    clock: &dyn Clock,
    avt_status: Option<AvtStatus>,
    profile: Option<&CustomerProfile>,
    loyalty_id: Option<&str>,
    store_id: Option<&str>,
    transaction_id: Option<&str>,
    cashier_id: Option<&str>,
) -> Result<AgeGateOutcome, EngineError> {
    let age_verified = avt_status == Some(AvtStatus::Verified);
    let eaiv_verified = profile.is_some_and(|p| p.eaiv_verified);

    let reason = match (age_verified, eaiv_verified) {
        (true, true) => "Age verified by cashier; EAIV verified on profile".to_string(),
        (true, false) => "Age verified by cashier; EAIV not verified on profile".to_string(),
        (false, _) => "Age not verified: cashier confirmation missing".to_string(),
    };

    let outcome = AgeGateOutcome {
        age_verified,
        eaiv_verified,
        eligible_for_tier3_incentives: age_verified,
        eligible_for_eaiv_only_incentives: age_verified && eaiv_verified,
        reason,
    };

    if age_verified {
        if let (Some(transaction_id), Some(store_id)) = (transaction_id, store_id) {
            let record = AvtRecord {
                transaction_id: transaction_id.to_string(),
                store_id: store_id.to_string(),
                loyalty_id: loyalty_id.map(str::to_string),
                cid_customer_id: profile.map(|p| p.cid_customer_id.clone()),
                avt_performed: true,
                avt_method: AVT_METHOD_IN_PERSON.to_string(),
                avt_timestamp: clock.now(),
                cashier_id: cashier_id.map(str::to_string),
                eaiv_verified: Some(eaiv_verified),
            };
            store
                .record_avt_confirmation(&record)
                .map_err(EngineError::AvtAuditWrite)?;
            info!(transaction_id, store_id, "AVT audit row recorded");
        } else {
            debug!("cashier confirmed age but transaction or store id missing, audit skipped");
        }
    }

    Ok(outcome)
}
