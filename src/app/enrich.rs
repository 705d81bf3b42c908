//! Enrichment: join populated places against the admin hierarchy
//!
//! Dispatches one name lookup per populated record and collects exactly that
//! many replies, in whatever order they come back. Downstream persistence
//! treats the list as a set, so reordering is fine. Replies lost to a dead
//! service shrink the output; the delta is logged rather than swallowed.

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::warn;

use crate::app::hierarchy::HierarchyHandle;
use crate::app::models::GeonameRecord;

/// Attach admin labels to every populated record the hierarchy can answer for
pub async fn enrich(
    cc: &str,
    populated: Vec<GeonameRecord>,
    hierarchy: &HierarchyHandle,
) -> Vec<GeonameRecord> {
    let total = populated.len();
    let mut lookups: FuturesUnordered<_> = populated
        .into_iter()
        .map(|record| hierarchy.name_lookup(record))
        .collect();

    let mut enriched = Vec::with_capacity(total);
    while let Some(reply) = lookups.next().await {
        if let Some(record) = reply {
            enriched.push(record);
        }
    }

    let dropped = total - enriched.len();
    if dropped > 0 {
        warn!("{cc}: {dropped} of {total} name lookups went unanswered");
    }
    enriched
}
