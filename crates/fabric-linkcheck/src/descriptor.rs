//! Connectivity descriptor parser.
//!
//! The descriptor lists intended wiring, one link per line:
//!
//! ```text
//! # src_module  src_port  dst_module  dst_port
//! 0   1   1   1
//! 1	2	0	1
//! ```
//!
//! Fields are separated by any run of spaces or tabs. Extra columns are
//! ignored; lines with fewer than four integers are skipped with a warning.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{LinkcheckError, LinkcheckResult};
use crate::types::{LogicalLink, ModuleEndpoint};

/// A line that could not be turned into a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number.
    pub line: usize,
    /// The line text, trimmed.
    pub text: String,
    /// Why the line was rejected.
    pub reason: String,
}

/// Parsed descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityDescriptor {
    /// Links in file order.
    pub links: Vec<LogicalLink>,
    /// Lines skipped for being malformed.
    pub rejected: Vec<RejectedLine>,
}

impl ConnectivityDescriptor {
    /// Reads and parses the descriptor at `path`.
    pub fn load(path: &Path) -> LinkcheckResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| LinkcheckError::DescriptorRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let descriptor = Self::parse(&content);
        info!(
            path = %path.display(),
            links = descriptor.links.len(),
            rejected = descriptor.rejected.len(),
            "Parsed connectivity descriptor"
        );
        Ok(descriptor)
    }

    /// Parses descriptor text.
    pub fn parse(content: &str) -> Self {
        let mut descriptor = Self::default();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Ok(link) => descriptor.links.push(link),
                Err(reason) => {
                    warn!(line = idx + 1, text = %line, reason = %reason, "Skipping descriptor line");
                    descriptor.rejected.push(RejectedLine {
                        line: idx + 1,
                        text: line.to_string(),
                        reason,
                    });
                }
            }
        }

        descriptor
    }

    /// Endpoints that appear in more than one link, with their counts.
    pub fn duplicate_endpoints(&self) -> Vec<(ModuleEndpoint, usize)> {
        let mut counts: BTreeMap<ModuleEndpoint, usize> = BTreeMap::new();
        for link in &self.links {
            *counts.entry(link.source).or_default() += 1;
            *counts.entry(link.destination).or_default() += 1;
        }
        counts.into_iter().filter(|(_, n)| *n > 1).collect()
    }

    /// Logs a warning for every endpoint used by more than one link.
    pub fn report_duplicates(&self) {
        for (endpoint, count) in self.duplicate_endpoints() {
            warn!(
                module_id = endpoint.module_id,
                port = endpoint.port,
                links = count,
                "Endpoint appears in more than one link"
            );
        }
    }
}

fn parse_line(line: &str) -> Result<LogicalLink, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    }

    let mut values = [0u32; 4];
    for (slot, field) in values.iter_mut().zip(&fields) {
        *slot = field
            .parse()
            .map_err(|_| format!("'{}' is not a non-negative integer", field))?;
    }

    Ok(LogicalLink::new((values[0], values[1]), (values[2], values[3])))
}
