//! Binary search for the largest accepted value of a probed dimension.
//!
//! The search assumes monotonic failure: once a value fails, every larger
//! value fails too. A broker that violates this still lets the search
//! terminate, but the boundary then only reflects the values that were probed.

use crate::error::Result;
use crate::result::{ProbeOutcome, ProbeResult};
use async_trait::async_trait;
use tracing::debug;

/// One evaluation of a candidate value. Implementations may keep connections
/// open across calls.
#[async_trait]
pub trait BoundaryProbe: Send {
    /// An `Err` aborts the whole search; every protocol-level failure must be
    /// returned as an outcome instead.
    async fn attempt(&mut self, value: u32) -> Result<ProbeOutcome>;
}

#[async_trait]
impl<F> BoundaryProbe for F
where
    F: FnMut(u32) -> ProbeOutcome + Send,
{
    async fn attempt(&mut self, value: u32) -> Result<ProbeOutcome> {
        Ok((self)(value))
    }
}

/// Searches `[low, high]` (both inclusive), recording exactly one trial per
/// iteration in visitation order.
pub async fn find_boundary<P>(probe: &mut P, low: u32, high: u32) -> Result<ProbeResult>
where
    P: BoundaryProbe + ?Sized,
{
    let mut result = ProbeResult::new();
    let mut low = i64::from(low);
    let mut high = i64::from(high);

    while low <= high {
        let mid = low + (high - low) / 2;
        let value = mid as u32;
        let outcome = probe.attempt(value).await?;
        debug!(value, %outcome, "trial");
        result.record(value, outcome);

        if outcome.is_ok() {
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    Ok(result)
}
