//! Topology matcher.
//!
//! Resolves descriptor links against an inventory snapshot. Matching is a
//! pure function: the same links and snapshot always produce the same
//! validated links in the same (input) order.

use serde::Serialize;
use tracing::{debug, info};

use fabric_inventory::{InventorySnapshot, PhysicalDevice};

use crate::error::{LinkSide, SkipReason};
use crate::types::{LogicalLink, ValidatedLink};

/// A link that will not be tested, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    /// The descriptor entry.
    pub link: LogicalLink,
    /// Why it was skipped.
    pub reason: SkipReason,
}

impl SkipRecord {
    /// Creates a skip record.
    pub fn new(link: LogicalLink, reason: SkipReason) -> Self {
        Self { link, reason }
    }
}

/// Result of one matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Links whose two ends resolved, in descriptor order.
    pub validated: Vec<ValidatedLink>,
    /// Every dropped link, in descriptor order.
    pub skipped: Vec<SkipRecord>,
    /// Links with the same module on both ends.
    pub skipped_same_module: usize,
    /// Links whose source module has no device.
    pub skipped_missing_source: usize,
    /// Links whose destination module has no device (source resolved).
    pub skipped_missing_destination: usize,
}

impl MatchOutcome {
    /// Links dropped for an unresolved module on either side.
    pub fn skipped_missing_device(&self) -> usize {
        self.skipped_missing_source + self.skipped_missing_destination
    }
}

/// Matches `links` against `snapshot`.
///
/// Self-loops are removed first. A link with both ends unresolved is
/// recorded once, against its source.
pub fn match_links(links: &[LogicalLink], snapshot: &InventorySnapshot) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    for link in links {
        if link.is_self_loop() {
            outcome.skipped_same_module += 1;
            outcome.skipped.push(SkipRecord::new(
                *link,
                SkipReason::SelfLoopLink {
                    module_id: link.source.module_id,
                },
            ));
            continue;
        }

        let source = snapshot.by_module_id(link.source.module_id);
        let dest = snapshot.by_module_id(link.destination.module_id);

        match (source, dest) {
            (Some(source), Some(dest)) => {
                debug!(link = %link, source_bus = %source.bus_id, dest_bus = %dest.bus_id, "Resolved link");
                outcome.validated.push(validate(link, source, dest));
            }
            (None, _) => {
                outcome.skipped_missing_source += 1;
                outcome.skipped.push(SkipRecord::new(
                    *link,
                    SkipReason::UnresolvedDevice {
                        side: LinkSide::Source,
                        module_id: link.source.module_id,
                    },
                ));
            }
            (Some(_), None) => {
                outcome.skipped_missing_destination += 1;
                outcome.skipped.push(SkipRecord::new(
                    *link,
                    SkipReason::UnresolvedDevice {
                        side: LinkSide::Destination,
                        module_id: link.destination.module_id,
                    },
                ));
            }
        }
    }

    info!(
        links = links.len(),
        validated = outcome.validated.len(),
        same_module = outcome.skipped_same_module,
        missing_source = outcome.skipped_missing_source,
        missing_destination = outcome.skipped_missing_destination,
        "Topology matching complete"
    );

    outcome
}

fn validate(link: &LogicalLink, source: &PhysicalDevice, dest: &PhysicalDevice) -> ValidatedLink {
    ValidatedLink {
        logical: *link,
        source_bus_id: source.bus_id.clone(),
        dest_bus_id: dest.bus_id.clone(),
        source_interface: source.fabric_interface_name.clone(),
        dest_interface: dest.fabric_interface_name.clone(),
        source_address: source.port_address(link.source.port).map(str::to_string),
        dest_address: dest.port_address(link.destination.port).map(str::to_string),
    }
}
