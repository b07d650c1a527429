//! Loyalty-identifier classification.
//!
//! A loyalty ID arrives from the POS as an opaque string and is one of two
//! accepted shapes: a 10–12 digit phone number, or an RTNSmart QR-code URL
//! whose payload is Base64 text. Anything else is invalid, with a
//! human-readable reason that ends up in the validation log. The raw form
//! (full URL or digit string) is the normalization key everywhere downstream;
//! the phone and QR forms of the same person are distinct identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed URL prefix of an RTNSmart app QR code.
pub const QR_BASE_PREFIX: &str = "https://rtnsmart.com/rtnsmartapp/?USER_";

/// Minimum accepted phone-number length in digits.
pub const PHONE_MIN_DIGITS: usize = 10;

/// Maximum accepted phone-number length in digits.
pub const PHONE_MAX_DIGITS: usize = 12;

/// Wire form of a loyalty identifier, as stored on customer profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LidFormat {
    PhoneNumber,
    QrCode,
}

impl LidFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::QrCode => "QR_CODE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PHONE_NUMBER" => Some(Self::PhoneNumber),
            "QR_CODE" => Some(Self::QrCode),
            _ => None,
        }
    }
}

impl std::fmt::Display for LidFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified loyalty identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoyaltyId {
    /// 10–12 digit phone number; the digits are the normalized id.
    Phone(String),
    /// RTNSmart QR-code URL; the full URL is the normalized id.
    Qr(String),
    /// Rejected input, with the reason recorded in the validation log.
    Invalid { reason: String },
}

impl LoyaltyId {
    /// Classifies a raw POS-supplied loyalty string.
    ///
    /// The decision order matters: missing input first, then the QR prefix
    /// (so a digit-bearing URL is never mistaken for a phone number), then
    /// all-digit strings, then everything else.
    #[must_use]
    pub fn classify(raw: Option<&str>) -> Self {
        let trimmed = raw.unwrap_or_default().trim();
        if trimmed.is_empty() {
            return Self::Invalid {
                reason: "LoyaltyID is missing".to_string(),
            };
        }

        if let Some(payload) = trimmed.strip_prefix(QR_BASE_PREFIX) {
            if payload.is_empty() || !payload.chars().all(is_base64_char) {
                return Self::Invalid {
                    reason: "LoyaltyID QR code format invalid: invalid URL or encoded parameter"
                        .to_string(),
                };
            }
            return Self::Qr(trimmed.to_string());
        }

        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            let len = trimmed.len();
            if (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&len) {
                return Self::Phone(trimmed.to_string());
            }
            return Self::Invalid {
                reason: format!(
                    "LoyaltyID format invalid: length {len} not in range [{PHONE_MIN_DIGITS}, {PHONE_MAX_DIGITS}]"
                ),
            };
        }

        Self::Invalid {
            reason: "LoyaltyID format unrecognized (must be phone number or RTNSmart QR code)"
                .to_string(),
        }
    }

    /// Normalization key used for daily counts, profiles and audit rows.
    #[must_use]
    pub fn normalized(&self) -> Option<&str> {
        match self {
            Self::Phone(id) | Self::Qr(id) => Some(id),
            Self::Invalid { .. } => None,
        }
    }

    #[must_use]
    pub const fn format(&self) -> Option<LidFormat> {
        match self {
            Self::Phone(_) => Some(LidFormat::PhoneNumber),
            Self::Qr(_) => Some(LidFormat::QrCode),
            Self::Invalid { .. } => None,
        }
    }
}

const fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}

/// Derives the stable CID customer surrogate for a normalized loyalty id.
///
/// The surrogate is reported to manufacturer fund programs instead of the
/// loyalty id itself, so it must be deterministic, globally unique per
/// normalized id, and never equal to the id. A truncated SHA-256 keeps it
/// short enough for fund-report columns while making collisions negligible.
#[must_use]
pub fn derive_cid_customer_id(normalized_id: &str) -> String {
    let digest = Sha256::digest(normalized_id.as_bytes());
    let prefix = hex::encode(&digest[..8]).to_uppercase();
    format!("CID_{prefix}")
}
