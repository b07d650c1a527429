//! SKU catalog and allowance-rule types.
//!
//! One catalog row describes a SKU and carries both its carton and pack UPC
//! blocks; either block may be absent. A physical UPC appears in at most one
//! row across the three searched columns, and resolution always probes the
//! carton UPC first, then the pack UPC, then the suppressed carton UPC.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::basket::NormalizedLine;

/// Category assigned to basket lines whose UPC is not in the catalog.
pub const UNKNOWN_TOBACCO_CATEGORY: &str = "UNKNOWN_TOBACCO";

/// Unit of measure implied by the catalog column a UPC matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Carton,
    Pack,
}

impl UnitOfMeasure {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Carton => "CARTON",
            Self::Pack => "PACK",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CARTON" => Some(Self::Carton),
            "PACK" => Some(Self::Pack),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnitOfMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which catalog column matched during UPC resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpcMatchKind {
    Carton,
    Pack,
    CartonSuppressed,
}

impl UpcMatchKind {
    /// The unit of measure implied by the matched column family.
    #[must_use]
    pub const fn unit_of_measure(self) -> UnitOfMeasure {
        match self {
            Self::Carton | Self::CartonSuppressed => UnitOfMeasure::Carton,
            Self::Pack => UnitOfMeasure::Pack,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Carton => "CARTON",
            Self::Pack => "PACK",
            Self::CartonSuppressed => "CARTON_SUPPRESSED",
        }
    }
}

/// Carton-side UPC block of a catalog row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartonBlock {
    pub upc: Option<String>,
    pub suppressed_upc: Option<String>,
    pub conversion_factor: Option<Decimal>,
    pub is_promotional: bool,
}

/// Pack-side UPC block of a catalog row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackBlock {
    pub upc: Option<String>,
    pub conversion_factor: Option<Decimal>,
    pub is_promotional: bool,
}

/// One SKU row from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub skuguid: String,
    pub sku_name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub category: String,
    pub program_eligibility: Option<String>,
    pub carton: CartonBlock,
    pub pack: PackBlock,
}

impl CatalogEntry {
    /// Resolves a UPC against this row, probing columns in the fixed order.
    #[must_use]
    pub fn match_upc(&self, upc: &str) -> Option<UpcMatchKind> {
        if self.carton.upc.as_deref() == Some(upc) {
            Some(UpcMatchKind::Carton)
        } else if self.pack.upc.as_deref() == Some(upc) {
            Some(UpcMatchKind::Pack)
        } else if self.carton.suppressed_upc.as_deref() == Some(upc) {
            Some(UpcMatchKind::CartonSuppressed)
        } else {
            None
        }
    }

    /// Promotional flag of the block a match came from.
    #[must_use]
    pub const fn is_promotional(&self, matched: UpcMatchKind) -> bool {
        match matched {
            UpcMatchKind::Carton | UpcMatchKind::CartonSuppressed => self.carton.is_promotional,
            UpcMatchKind::Pack => self.pack.is_promotional,
        }
    }
}

/// Successful UPC resolution: the row plus the column that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct UpcResolution {
    pub entry: CatalogEntry,
    pub matched: UpcMatchKind,
}

/// One allowance-program row, joined to SKUs through a mapping table.
///
/// A mapping row with a null SKUGUID makes the allowance apply to every
/// product. A rule is active when today falls inside its effective range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowanceRule {
    pub allowance_id: String,
    pub allowance_type: String,
    pub min_qty: u32,
    pub max_allowance_per_transaction: Option<Decimal>,
    pub max_daily_transactions_per_loyalty: Option<u32>,
    pub manufacturer_funded_amount: Option<Decimal>,
    pub promo_code: Option<String>,
    pub promotional_upcs_eligible: bool,
    /// Empty means any unit of measure is eligible.
    pub eligible_uoms: Vec<UnitOfMeasure>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl AllowanceRule {
    /// Active iff `start_date <= today <= end_date`.
    #[must_use]
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.start_date <= today && today <= self.end_date
    }

    /// Line-level applicability: quantity floor, UOM set, promo-UPC policy.
    #[must_use]
    pub fn applies_to(&self, line: &NormalizedLine) -> bool {
        if line.quantity < self.min_qty {
            return false;
        }
        if let Some(uom) = line.unit_of_measure {
            if !self.eligible_uoms.is_empty() && !self.eligible_uoms.contains(&uom) {
                return false;
            }
        } else {
            // Unknown-UPC lines never match an allowance.
            return false;
        }
        if line.is_promotional_upc && !self.promotional_upcs_eligible {
            return false;
        }
        true
    }
}
