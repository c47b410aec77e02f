//! The IEEE OUI registry: vendor names mapped to the 24-bit address
//! prefixes used when a MAC policy preserves vendor identity.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::debug;

use crate::err::SimError;

/// Vendor name registry built from the IEEE-published OUI text
/// database.
///
/// Names are normalized (case-folded, whitespace-collapsed) for
/// lookup; the first entry encountered for a name wins, matching the
/// database's own ordering of reissued prefixes.
#[derive(Clone, Debug, Default)]
pub struct OuiRegistry {
    by_name: HashMap<String, ([u8; 3], String)>,
    order: Vec<String>,
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_oui(field: &str) -> Option<[u8; 3]> {
    let mut octets = [0u8; 3];
    let mut parts = field.split('-');
    for octet in octets.iter_mut() {
        *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

impl OuiRegistry {
    /// Parse the registry from a reader over the IEEE text database.
    ///
    /// Only lines of the form `HH-HH-HH   (hex)   Vendor Name` are
    /// consumed; everything else in the file (base-16 lines, address
    /// blocks, headers) is skipped.
    pub fn from_reader<R>(reader: R) -> Result<Self, SimError>
    where
        R: BufRead,
    {
        let mut registry = OuiRegistry::default();
        for line in reader.lines() {
            let line = line?;
            let Some((prefix, rest)) = line.split_once("(hex)") else {
                continue;
            };
            let Some(oui) = parse_oui(prefix.trim()) else {
                continue;
            };
            let canonical = rest.trim().to_string();
            if canonical.is_empty() {
                continue;
            }
            let key = normalize(&canonical);
            if !registry.by_name.contains_key(&key) {
                registry.order.push(key.clone());
                registry.by_name.insert(key, (oui, canonical));
            }
        }
        debug!("loaded {} OUI entries", registry.by_name.len());
        Ok(registry)
    }

    /// Load the registry from the database file at `path`.
    pub fn load<P>(path: P) -> Result<Self, SimError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SimError::missing_resource(format!("{}: {e}", path.display())))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Number of distinct vendor names.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Look a vendor up by name, tolerating partial matches: an exact
    /// normalized match wins, then the first registered name that
    /// contains (or is contained in) the query.
    pub fn lookup(&self, vendor: &str) -> Option<([u8; 3], &str)> {
        let query = normalize(vendor);
        if let Some((oui, canonical)) = self.by_name.get(&query) {
            return Some((*oui, canonical.as_str()));
        }
        self.order
            .iter()
            .find(|name| name.contains(&query) || query.contains(name.as_str()))
            .and_then(|name| self.by_name.get(name))
            .map(|(oui, canonical)| (*oui, canonical.as_str()))
    }
}
