//! Integer minor-unit money arithmetic.
//!
//! All monetary values are stored and compared as integer pence. Percentages
//! are carried in basis points so band midpoints (e.g. 16.25%) stay exact and
//! return computation never touches floating point.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// A percentage with two fractional digits of precision, stored in basis
/// points (17.5% == 1750 bp).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);

    pub fn from_basis_points(bp: i64) -> Self {
        Self(bp)
    }

    /// Whole-number percentage (7 -> 7.00%).
    pub fn from_percent(pct: i64) -> Self {
        Self(pct * 100)
    }

    pub fn basis_points(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Midpoint of a closed percentage range, used as a pledge's effective rate.
    pub fn midpoint(low: Percent, high: Percent) -> Percent {
        Percent((low.0 + high.0) / 2)
    }
}

impl core::fmt::Display for Percent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let whole = self.0 / 100;
        let frac = (self.0 % 100).abs();
        if frac == 0 {
            write!(f, "{whole}%")
        } else if frac % 10 == 0 {
            write!(f, "{whole}.{}%", frac / 10)
        } else {
            write!(f, "{whole}.{frac:02}%")
        }
    }
}

impl ValueObject for Percent {}

/// Expected return figures for a pledge, frozen at creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnFigures {
    /// Expected profit in pence.
    pub expected_return_pence: i64,
    /// Amount plus expected profit, in pence.
    pub expected_total_back_pence: i64,
}

impl ValueObject for ReturnFigures {}

/// Compute the expected return for `amount_pence` at a total (non-annualised,
/// non-prorated) `rate`.
///
/// Rounding is half-away-from-zero to the nearest pence. Non-positive amount
/// or rate yields a zero return and a total of `max(amount, 0)`.
pub fn return_for(amount_pence: i64, rate: Percent) -> ReturnFigures {
    if amount_pence <= 0 || !rate.is_positive() {
        return ReturnFigures {
            expected_return_pence: 0,
            expected_total_back_pence: amount_pence.max(0),
        };
    }

    // amount * bp / 10_000, rounded half up. Both operands are positive here,
    // so adding half the divisor before dividing rounds away from zero.
    let product = amount_pence as i128 * rate.basis_points() as i128;
    let expected_return = ((product + 5_000) / 10_000) as i64;

    ReturnFigures {
        expected_return_pence: expected_return,
        expected_total_back_pence: amount_pence + expected_return,
    }
}

/// Best/worst-case return preview for a closed percentage range.
///
/// Display-side companion to [`return_for`]: pledges are written at the band
/// midpoint, but investors are shown the full band span before committing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnEstimate {
    pub min_pct: Percent,
    pub max_pct: Percent,
    pub at_min: ReturnFigures,
    pub at_max: ReturnFigures,
}

impl ReturnEstimate {
    pub fn for_range(amount_pence: i64, min_pct: Percent, max_pct: Percent) -> Self {
        Self {
            min_pct,
            max_pct,
            at_min: return_for(amount_pence, min_pct),
            at_max: return_for(amount_pence, max_pct),
        }
    }
}

impl ValueObject for ReturnEstimate {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seven_percent_of_one_hundred_pounds() {
        let figures = return_for(10_000, Percent::from_percent(7));
        assert_eq!(figures.expected_return_pence, 700);
        assert_eq!(figures.expected_total_back_pence, 10_700);
    }

    #[test]
    fn fractional_rate_rounds_half_up() {
        // 2550 * 0.175 = 446.25 -> 446
        let figures = return_for(2_550, Percent::from_basis_points(1_750));
        assert_eq!(figures.expected_return_pence, 446);
        assert_eq!(figures.expected_total_back_pence, 2_996);
    }

    #[test]
    fn exact_half_rounds_away_from_zero() {
        // 10 * 0.05 = 0.5 -> 1
        let figures = return_for(10, Percent::from_percent(5));
        assert_eq!(figures.expected_return_pence, 1);
        assert_eq!(figures.expected_total_back_pence, 11);
    }

    #[test]
    fn below_half_rounds_down() {
        // 10 * 0.025 = 0.25 -> 0
        let figures = return_for(10, Percent::from_basis_points(250));
        assert_eq!(figures.expected_return_pence, 0);
        assert_eq!(figures.expected_total_back_pence, 10);
    }

    #[test]
    fn smallest_amount_at_zero_rate() {
        let figures = return_for(1, Percent::ZERO);
        assert_eq!(figures.expected_return_pence, 0);
        assert_eq!(figures.expected_total_back_pence, 1);
    }

    #[test]
    fn non_positive_amount_yields_zero_return() {
        assert_eq!(
            return_for(0, Percent::from_percent(7)),
            ReturnFigures {
                expected_return_pence: 0,
                expected_total_back_pence: 0,
            }
        );
        assert_eq!(
            return_for(-500, Percent::from_percent(7)),
            ReturnFigures {
                expected_return_pence: 0,
                expected_total_back_pence: 0,
            }
        );
    }

    #[test]
    fn non_positive_rate_yields_zero_return() {
        let figures = return_for(10_000, Percent::from_basis_points(-100));
        assert_eq!(figures.expected_return_pence, 0);
        assert_eq!(figures.expected_total_back_pence, 10_000);
    }

    #[test]
    fn midpoint_of_fractional_band_is_exact() {
        let mid = Percent::midpoint(
            Percent::from_percent(15),
            Percent::from_basis_points(1_750),
        );
        assert_eq!(mid.basis_points(), 1_625);
        assert_eq!(mid.to_string(), "16.25%");
    }

    #[test]
    fn percent_display_trims_trailing_zeroes() {
        assert_eq!(Percent::from_percent(7).to_string(), "7%");
        assert_eq!(Percent::from_basis_points(1_750).to_string(), "17.5%");
    }

    #[test]
    fn estimate_covers_both_ends_of_the_range() {
        let estimate = ReturnEstimate::for_range(
            10_000,
            Percent::from_percent(5),
            Percent::from_percent(9),
        );
        assert_eq!(estimate.at_min.expected_return_pence, 500);
        assert_eq!(estimate.at_max.expected_return_pence, 900);
        assert_eq!(estimate.at_max.expected_total_back_pence, 10_900);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: same inputs always yield the same integer outputs.
        #[test]
        fn return_computation_is_deterministic(
            amount in 1i64..1_000_000_000i64,
            bp in 1i64..10_000i64,
        ) {
            let rate = Percent::from_basis_points(bp);
            prop_assert_eq!(return_for(amount, rate), return_for(amount, rate));
        }

        /// Property: total paid back is always amount plus expected return.
        #[test]
        fn total_is_amount_plus_return(
            amount in 1i64..1_000_000_000i64,
            bp in 1i64..10_000i64,
        ) {
            let figures = return_for(amount, Percent::from_basis_points(bp));
            prop_assert_eq!(
                figures.expected_total_back_pence,
                amount + figures.expected_return_pence
            );
        }

        /// Property: rounding error against exact arithmetic is at most half a pence.
        #[test]
        fn rounded_return_is_within_half_a_pence(
            amount in 1i64..1_000_000_000i64,
            bp in 1i64..10_000i64,
        ) {
            let figures = return_for(amount, Percent::from_basis_points(bp));
            let twice_exact = amount as i128 * bp as i128 * 2;
            let twice_rounded = figures.expected_return_pence as i128 * 10_000 * 2;
            prop_assert!((twice_rounded - twice_exact).abs() <= 10_000);
        }
    }
}
