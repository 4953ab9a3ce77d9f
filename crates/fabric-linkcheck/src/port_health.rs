//! Port health filter.
//!
//! Keeps validated links whose two ports are active in a given snapshot. A
//! port the device does not report counts as inactive.

use tracing::{debug, info, warn};

use fabric_inventory::InventorySnapshot;

use crate::error::{InactiveSide, SkipReason};
use crate::matcher::SkipRecord;
use crate::types::ValidatedLink;

/// Result of filtering a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthOutcome {
    /// Links with both ports active, in input order.
    pub active: Vec<ValidatedLink>,
    /// Dropped links with the inactive side.
    pub skipped: Vec<SkipRecord>,
}

/// Checks one link; `None` when both ports are active.
///
/// Devices are looked up by bus id, so a snapshot taken after matching can be
/// used to catch ports that changed state since.
pub fn check_link(snapshot: &InventorySnapshot, link: &ValidatedLink) -> Option<InactiveSide> {
    let source_active = snapshot
        .by_bus_id(&link.source_bus_id)
        .is_some_and(|d| d.is_port_active(link.logical.source.port));
    let dest_active = snapshot
        .by_bus_id(&link.dest_bus_id)
        .is_some_and(|d| d.is_port_active(link.logical.destination.port));

    InactiveSide::from_activity(source_active, dest_active)
}

/// Filters a batch of links against `snapshot`.
pub fn filter_active(links: Vec<ValidatedLink>, snapshot: &InventorySnapshot) -> HealthOutcome {
    let mut outcome = HealthOutcome::default();

    for link in links {
        match check_link(snapshot, &link) {
            None => {
                debug!(link = %link.logical, "Both ports active");
                outcome.active.push(link);
            }
            Some(side) => {
                warn!(
                    link = %link.logical,
                    source = %link.source_descriptor(),
                    destination = %link.dest_descriptor(),
                    inactive = %side,
                    "Skipping link with inactive port"
                );
                outcome
                    .skipped
                    .push(SkipRecord::new(link.logical, SkipReason::InactivePort { side }));
            }
        }
    }

    info!(
        active = outcome.active.len(),
        inactive = outcome.skipped.len(),
        "Port health check complete"
    );

    outcome
}
