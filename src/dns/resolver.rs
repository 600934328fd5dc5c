//! Name Resolver
//!
//! Maps a query name onto a stored location of its zone using closest
//! encloser and wildcard synthesis.
//!
//! ```text
//! bar.foo.example.com  (zone example.com)
//!   -> relative name "bar.foo"
//!   -> exact location "bar.foo"?                  answer it
//!   -> closest encloser "foo" exists?  "*.foo"?   answer it / NXDOMAIN
//!   -> closest encloser ""   exists?   "*"?       answer it / NXDOMAIN
//! ```

use std::fmt;

use super::normalize_name;
use super::zone_directory::Zone;

/// Store label of the zone apex
pub const APEX_LABEL: &str = "@";

/// A resolved location inside a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// The zone apex
    Apex,
    /// A stored location matching the query exactly
    Exact(String),
    /// A wildcard location synthesizing the answer
    Wildcard(String),
}

impl Location {
    /// Hash field under which the location's record is stored
    pub fn label(&self) -> &str {
        match self {
            Location::Apex => APEX_LABEL,
            Location::Exact(label) | Location::Wildcard(label) => label,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Location::Wildcard(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Apex => write!(f, "{}", APEX_LABEL),
            Location::Exact(label) => write!(f, "{}", label),
            Location::Wildcard(label) => write!(f, "{} (wildcard)", label),
        }
    }
}

/// Find the location answering `qname` in `zone`, or `None` for NXDOMAIN
///
/// `qname` must be at or below the zone; names are compared without case and
/// without the trailing root dot. Returned labels keep their stored spelling.
pub fn find_location(qname: &str, zone: &Zone) -> Option<Location> {
    let qname = normalize_name(qname);
    let zone_name = normalize_name(&zone.name);

    if qname == zone_name {
        return Some(Location::Apex);
    }

    let relative = if zone_name.is_empty() {
        qname.as_str()
    } else {
        qname.strip_suffix(zone_name.as_str())?.strip_suffix('.')?
    };

    if let Some(stored) = zone.stored_label(relative) {
        return Some(Location::Exact(stored.to_string()));
    }

    let mut current = relative;
    while let Some((closest_encloser, source_of_synthesis)) = split_query(current) {
        let encloser_exists =
            zone.contains(closest_encloser) || any_location_ends_with(zone, closest_encloser);

        if encloser_exists {
            // An existing encloser stops the walk: only its own wildcard may answer
            return zone
                .stored_label(&source_of_synthesis)
                .map(|stored| Location::Wildcard(stored.to_string()));
        }
        current = closest_encloser;
    }

    None
}

/// Split off the leftmost label
///
/// Returns the closest encloser candidate and its source of synthesis, or
/// `None` once the name is exhausted.
fn split_query(name: &str) -> Option<(&str, String)> {
    if name.is_empty() {
        return None;
    }
    match name.split_once('.') {
        Some((_, encloser)) => Some((encloser, format!("*.{}", encloser))),
        None => Some(("", "*".to_string())),
    }
}

/// Existence signal for an encloser: some location ends with it
///
/// This is a raw string suffix test, so "xfoo" counts for "foo" and the
/// empty encloser matches any location.
fn any_location_ends_with(zone: &Zone, encloser: &str) -> bool {
    zone.labels().any(|loc| loc.ends_with(encloser))
}
