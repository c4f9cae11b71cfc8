//! Listing field vocabulary.
//!
//! These choices matter to the engine only as activation-readiness predicates
//! and as inputs to pricing and return computation; dashboards render their
//! labels.

use serde::{Deserialize, Serialize};

use plotfund_core::{DomainError, DomainResult, Percent};

/// Property use class (current or intended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseType {
    Commercial,
    Residential,
    Industrial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    England,
    Scotland,
    Wales,
}

/// How investors are paid back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    EquityShare,
    FinancialPayback,
}

/// Closed fundraising range in whole pounds; the upper bound is the funding
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundingBand {
    #[serde(rename = "10000_20000")]
    B10kTo20k,
    #[serde(rename = "21000_30000")]
    B21kTo30k,
    #[serde(rename = "31000_40000")]
    B31kTo40k,
    #[serde(rename = "41000_50000")]
    B41kTo50k,
    #[serde(rename = "51000_75000")]
    B51kTo75k,
    #[serde(rename = "76000_100000")]
    B76kTo100k,
    #[serde(rename = "100000_150000")]
    B100kTo150k,
    #[serde(rename = "151000_250000")]
    B151kTo250k,
}

impl FundingBand {
    pub const ALL: [FundingBand; 8] = [
        FundingBand::B10kTo20k,
        FundingBand::B21kTo30k,
        FundingBand::B31kTo40k,
        FundingBand::B41kTo50k,
        FundingBand::B51kTo75k,
        FundingBand::B76kTo100k,
        FundingBand::B100kTo150k,
        FundingBand::B151kTo250k,
    ];

    /// Closed range in whole pounds.
    pub fn bounds_pounds(&self) -> (i64, i64) {
        match self {
            FundingBand::B10kTo20k => (10_000, 20_000),
            FundingBand::B21kTo30k => (21_000, 30_000),
            FundingBand::B31kTo40k => (31_000, 40_000),
            FundingBand::B41kTo50k => (41_000, 50_000),
            FundingBand::B51kTo75k => (51_000, 75_000),
            FundingBand::B76kTo100k => (76_000, 100_000),
            FundingBand::B100kTo150k => (100_000, 150_000),
            FundingBand::B151kTo250k => (151_000, 250_000),
        }
    }

    /// Funding target (the band's upper bound) in pence.
    pub fn target_pence(&self) -> i64 {
        self.bounds_pounds().1 * 100
    }
}

impl core::fmt::Display for FundingBand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (low, high) = self.bounds_pounds();
        write!(f, "£{low} - £{high}")
    }
}

/// Closed total-return percentage range offered to investors.
///
/// Pledges are written at the band midpoint; previews show the full span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnBand {
    #[serde(rename = "2_4")]
    R2To4,
    #[serde(rename = "5_9")]
    R5To9,
    #[serde(rename = "10_14")]
    R10To14,
    #[serde(rename = "15_17_5")]
    R15To17_5,
}

impl ReturnBand {
    pub const ALL: [ReturnBand; 4] = [
        ReturnBand::R2To4,
        ReturnBand::R5To9,
        ReturnBand::R10To14,
        ReturnBand::R15To17_5,
    ];

    /// Closed percentage range `(min, max)`.
    pub fn range(&self) -> (Percent, Percent) {
        match self {
            ReturnBand::R2To4 => (Percent::from_percent(2), Percent::from_percent(4)),
            ReturnBand::R5To9 => (Percent::from_percent(5), Percent::from_percent(9)),
            ReturnBand::R10To14 => (Percent::from_percent(10), Percent::from_percent(14)),
            ReturnBand::R15To17_5 => (
                Percent::from_percent(15),
                Percent::from_basis_points(1_750),
            ),
        }
    }

    /// The effective rate a pledge is written at.
    pub fn midpoint(&self) -> Percent {
        let (low, high) = self.range();
        Percent::midpoint(low, high)
    }
}

impl core::fmt::Display for ReturnBand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (low, high) = self.range();
        write!(f, "{low} - {high}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

/// Typed partial update for a draft listing.
///
/// One field per editable attribute; `None` clears. The web layer owns form
/// parsing, so by the time a patch reaches the aggregate every field is either
/// absent or a well-typed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPatch {
    pub project_name: Option<String>,
    pub source_use: Option<UseType>,
    pub target_use: Option<UseType>,
    pub country: Option<Country>,
    pub county: Option<String>,
    pub postcode_prefix: Option<String>,
    pub funding_band: Option<FundingBand>,
    pub return_type: Option<ReturnType>,
    pub return_band: Option<ReturnBand>,
    /// How long the listing stays active to secure funding (days).
    pub duration_days: Option<u32>,
    /// How long the underlying project is expected to run (days).
    pub project_duration_days: Option<u32>,
}

impl DraftPatch {
    /// Validate the patch in isolation.
    ///
    /// Blank strings are rejected rather than coerced: clearing a field is
    /// expressed with `None`.
    pub fn validate(&self) -> DomainResult<()> {
        if self.duration_days == Some(0) {
            return Err(DomainError::validation("duration_days must be positive"));
        }
        if self.project_duration_days == Some(0) {
            return Err(DomainError::validation(
                "project_duration_days must be positive",
            ));
        }
        for (field, value) in [
            ("project_name", &self.project_name),
            ("county", &self.county),
            ("postcode_prefix", &self.postcode_prefix),
        ] {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "{field} must not be blank (use null to clear)"
                    )));
                }
            }
        }
        Ok(())
    }
}
