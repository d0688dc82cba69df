//! Spirescope identity correlator: parses `spire-server entry show` listings
//! and matches a workload's (namespace, service account) pair to its
//! registration entry. Pure text processing, no I/O.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

/// Line prefix that opens a new entry block in the listing.
const ENTRY_BOUNDARY: &str = "Entry ID";

/// Identity metadata projected out of one registration entry. Absent fields
/// are `None`/empty; partial listings are normal, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityEntry {
    pub has_registration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spiffe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub selectors: SmallVec<[String; 4]>,
}

impl IdentityEntry {
    /// The negative result: no matching registration.
    pub fn unregistered() -> Self {
        Self::default()
    }
}

/// Find the first entry whose selectors cover both the namespace and the
/// service account, and project it. `None` when nothing matches or the
/// listing is empty/unavailable.
pub fn correlate(listing: &str, namespace: &str, service_account: &str) -> Option<IdentityEntry> {
    if listing.trim().is_empty() {
        return None;
    }
    let ns_token = format!("k8s:ns:{}", namespace);
    let sa_token = format!("k8s:sa:{}", service_account);
    for block in split_entries(listing) {
        if block.contains(&ns_token) && block.contains(&sa_token) {
            let entry = parse_entry(&block);
            debug!(spiffe_id = ?entry.spiffe_id, ns = %namespace, sa = %service_account, "correlate: matched entry");
            return Some(entry);
        }
    }
    None
}

/// Split the listing into per-entry blocks, segmented on the `Entry ID`
/// boundary. Preamble lines ("Found N entries") are discarded.
fn split_entries(listing: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    for line in listing.lines() {
        if line.trim_start().starts_with(ENTRY_BOUNDARY) {
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(String::new());
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    if let Some(done) = current {
        blocks.push(done);
    }
    blocks
}

/// Extract the value following `<label> :`, anchored at line start.
fn label_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix(label)?;
    let rest = rest.trim_start().strip_prefix(':')?;
    Some(rest.trim())
}

fn parse_entry(block: &str) -> IdentityEntry {
    let mut entry = IdentityEntry {
        has_registration: true,
        ..Default::default()
    };
    for line in block.lines() {
        if let Some(v) = label_value(line, "SPIFFE ID") {
            if entry.spiffe_id.is_none() && !v.is_empty() {
                entry.spiffe_id = Some(v.to_string());
            }
        } else if let Some(v) = label_value(line, "Parent ID") {
            if entry.parent_id.is_none() && !v.is_empty() {
                entry.parent_id = Some(v.to_string());
            }
        } else if let Some(v) = label_value(line, "TTL") {
            if entry.ttl.is_none() && !v.is_empty() {
                entry.ttl = Some(v.to_string());
            }
        } else if let Some(v) = label_value(line, "Selector") {
            if !v.is_empty() {
                entry.selectors.push(v.to_string());
            }
        }
    }
    entry
}
