//! Activation fee tariff.
//!
//! The fee an owner pays to take a listing live is the sum of a funding-tier
//! price and a duration-tier price. The tables are immutable configuration:
//! built once at process start and passed by reference into the services.

use std::collections::HashMap;

use plotfund_core::{DomainError, DomainResult};

use crate::fields::FundingBand;

/// Static activation fee tariff keyed by (funding band, listing duration).
#[derive(Debug, Clone)]
pub struct PricingTable {
    funding_tier_pence: HashMap<FundingBand, i64>,
    duration_tier_pence: HashMap<u32, i64>,
}

impl PricingTable {
    pub fn new(
        funding_tier_pence: HashMap<FundingBand, i64>,
        duration_tier_pence: HashMap<u32, i64>,
    ) -> Self {
        Self {
            funding_tier_pence,
            duration_tier_pence,
        }
    }

    /// Durations (days) this tariff prices.
    pub fn supported_durations(&self) -> Vec<u32> {
        let mut durations: Vec<u32> = self.duration_tier_pence.keys().copied().collect();
        durations.sort_unstable();
        durations
    }

    /// Activation fee in pence for a (funding band, duration) pair.
    ///
    /// Fails with a validation error when either key is missing or not in the
    /// tariff; pricing never guesses.
    pub fn price_for_activation(
        &self,
        funding_band: Option<FundingBand>,
        duration_days: Option<u32>,
    ) -> DomainResult<i64> {
        let band = funding_band
            .ok_or_else(|| DomainError::validation("funding band is required for pricing"))?;
        let duration = duration_days
            .ok_or_else(|| DomainError::validation("duration_days is required for pricing"))?;

        let band_price = self
            .funding_tier_pence
            .get(&band)
            .ok_or_else(|| DomainError::validation(format!("invalid funding band: {band}")))?;
        let duration_price = self
            .duration_tier_pence
            .get(&duration)
            .ok_or_else(|| DomainError::validation(format!("invalid duration: {duration} days")))?;

        Ok(band_price + duration_price)
    }
}

impl Default for PricingTable {
    /// Production tariff.
    fn default() -> Self {
        let funding_tier_pence = HashMap::from([
            (FundingBand::B10kTo20k, 1_999),
            (FundingBand::B21kTo30k, 2_499),
            (FundingBand::B31kTo40k, 2_999),
            (FundingBand::B41kTo50k, 3_499),
            (FundingBand::B51kTo75k, 4_999),
            (FundingBand::B76kTo100k, 6_499),
            (FundingBand::B100kTo150k, 8_499),
            (FundingBand::B151kTo250k, 10_999),
        ]);
        let duration_tier_pence = HashMap::from([
            (7, 499),
            (14, 799),
            (30, 1_299),
            (60, 1_999),
        ]);

        Self::new(funding_tier_pence, duration_tier_pence)
    }
}
