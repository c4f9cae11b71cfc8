//! Read-model projections over listing streams.
//!
//! Three disposable read models are maintained:
//! - the **listings table** (lifecycle state, field values, active window)
//! - the **investments table** (one row per pledge, status included)
//! - the **funding rollup** (pledged totals per listing)
//!
//! Each projection is idempotent via a per-stream sequence cursor, so the
//! at-least-once bus and direct post-dispatch application can both feed it
//! without double-counting.

use thiserror::Error;

pub mod funding;
pub mod investments;
pub mod listings;

pub use funding::{FundingProgress, FundingRollupProjection};
pub use investments::{InvestmentReadModel, InvestmentsProjection};
pub use listings::{ListingReadModel, ListingsProjection};

#[derive(Debug, Error)]
pub enum ProjectionApplyError {
    #[error("failed to deserialize listing event: {0}")]
    Deserialize(String),
}
