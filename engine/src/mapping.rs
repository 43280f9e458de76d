//! Client-to-server identity mapping rules.
//!
//! A client id maps to at most one server id for its whole lifetime. The
//! first write wins; repeating it is a no-op; a different value is a
//! protocol violation.

use crate::{error::Result, ClientId, Error, ServerId};
use std::collections::HashMap;

/// What a resolve attempt did to the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A new mapping row must be written.
    Inserted,
    /// The same mapping already existed; nothing to write.
    AlreadyMapped,
}

/// Decide whether `client_id -> attempted` may be recorded given the
/// currently stored value.
pub fn check_mapping(
    client_id: &str,
    existing: Option<&str>,
    attempted: &str,
) -> Result<Resolution> {
    match existing {
        None => Ok(Resolution::Inserted),
        Some(existing) if existing == attempted => Ok(Resolution::AlreadyMapped),
        Some(existing) => Err(Error::MappingViolation {
            client_id: client_id.to_string(),
            existing: existing.to_string(),
            attempted: attempted.to_string(),
        }),
    }
}

/// In-memory view of the mapping table with reverse lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    forward: HashMap<ClientId, ServerId>,
    reverse: HashMap<ServerId, ClientId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored rows. Rows violating first-write-wins are rejected.
    pub fn from_rows(rows: impl IntoIterator<Item = (ClientId, ServerId)>) -> Result<Self> {
        let mut map = Self::new();
        for (client_id, server_id) in rows {
            map.insert(client_id, server_id)?;
        }
        Ok(map)
    }

    /// Record a mapping under first-write-wins.
    pub fn insert(
        &mut self,
        client_id: impl Into<ClientId>,
        server_id: impl Into<ServerId>,
    ) -> Result<Resolution> {
        let client_id = client_id.into();
        let server_id = server_id.into();
        let resolution = check_mapping(
            &client_id,
            self.forward.get(&client_id).map(String::as_str),
            &server_id,
        )?;
        if resolution == Resolution::Inserted {
            self.reverse.insert(server_id.clone(), client_id.clone());
            self.forward.insert(client_id, server_id);
        }
        Ok(resolution)
    }

    /// Server identity of a client id.
    pub fn server_id(&self, client_id: &str) -> Option<&ServerId> {
        self.forward.get(client_id)
    }

    /// Client identity that resolved to a server id.
    pub fn client_id(&self, server_id: &str) -> Option<&ClientId> {
        self.reverse.get(server_id)
    }

    pub fn is_resolved(&self, client_id: &str) -> bool {
        self.forward.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_inserts() {
        assert_eq!(
            check_mapping("c-1", None, "srv-1").unwrap(),
            Resolution::Inserted
        );
    }

    #[test]
    fn same_value_is_a_no_op() {
        assert_eq!(
            check_mapping("c-1", Some("srv-1"), "srv-1").unwrap(),
            Resolution::AlreadyMapped
        );
    }

    #[test]
    fn different_value_is_a_violation() {
        let err = check_mapping("c-1", Some("srv-1"), "srv-2").unwrap_err();
        assert_eq!(
            err,
            Error::MappingViolation {
                client_id: "c-1".into(),
                existing: "srv-1".into(),
                attempted: "srv-2".into(),
            }
        );
    }

    #[test]
    fn map_lookups_both_ways() {
        let mut map = IdentityMap::new();
        map.insert("c-1", "srv-1").unwrap();

        assert_eq!(map.server_id("c-1").map(String::as_str), Some("srv-1"));
        assert_eq!(map.client_id("srv-1").map(String::as_str), Some("c-1"));
        assert!(map.is_resolved("c-1"));
        assert!(!map.is_resolved("c-2"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn map_keeps_first_value() {
        let mut map = IdentityMap::new();
        map.insert("c-1", "srv-1").unwrap();

        assert_eq!(map.insert("c-1", "srv-1").unwrap(), Resolution::AlreadyMapped);
        assert!(map.insert("c-1", "srv-2").is_err());
        assert_eq!(map.server_id("c-1").map(String::as_str), Some("srv-1"));
        assert!(map.client_id("srv-2").is_none());
    }

    #[test]
    fn from_rows_rejects_conflicting_rows() {
        let rows = vec![
            ("c-1".to_string(), "srv-1".to_string()),
            ("c-1".to_string(), "srv-2".to_string()),
        ];
        assert!(IdentityMap::from_rows(rows).is_err());
    }
}
