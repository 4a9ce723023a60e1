//! Authority set and virtual-server assignment.
//!
//! Federated servers lead virtual servers (lanes); audit servers follow and
//! emit heartbeats. Lane leadership rotates every minute according to a map
//! seeded by the directory-block height.

use serde::{Deserialize, Serialize};
use shared_types::{PublicKey, ServerId};

/// Number of minutes in a block; the server map has one row per minute.
pub const MINUTES_PER_BLOCK: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerKind {
    Federated,
    Audit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: ServerId,
    pub signing_key: PublicKey,
}

/// Change to the authority set recorded in the admin block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminChange {
    AddServer {
        id: ServerId,
        kind: ServerKind,
        signing_key: PublicKey,
    },
    RemoveServer {
        id: ServerId,
        kind: ServerKind,
    },
    ChangeServerKey {
        id: ServerId,
        signing_key: PublicKey,
    },
}

/// Federated and audit servers for one directory-block height.
///
/// Both lists are kept sorted by server id so every node derives the same
/// server map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySet {
    federated: Vec<ServerEntry>,
    audit: Vec<ServerEntry>,
}

impl AuthoritySet {
    pub fn new(mut federated: Vec<ServerEntry>, mut audit: Vec<ServerEntry>) -> Self {
        federated.sort_by(|a, b| a.id.cmp(&b.id));
        federated.dedup_by(|a, b| a.id == b.id);
        audit.sort_by(|a, b| a.id.cmp(&b.id));
        audit.dedup_by(|a, b| a.id == b.id);
        Self { federated, audit }
    }

    pub fn federated(&self) -> &[ServerEntry] {
        &self.federated
    }

    pub fn audit(&self) -> &[ServerEntry] {
        &self.audit
    }

    pub fn federated_count(&self) -> usize {
        self.federated.len()
    }

    pub fn federated_index(&self, id: &ServerId) -> Option<usize> {
        self.federated.iter().position(|s| &s.id == id)
    }

    pub fn is_federated(&self, id: &ServerId) -> bool {
        self.federated_index(id).is_some()
    }

    pub fn is_audit(&self, id: &ServerId) -> bool {
        self.audit.iter().any(|s| &s.id == id)
    }

    /// Signing key of any federated or audit server.
    pub fn signing_key(&self, id: &ServerId) -> Option<PublicKey> {
        self.federated
            .iter()
            .chain(self.audit.iter())
            .find(|s| &s.id == id)
            .map(|s| s.signing_key)
    }

    /// True if `key` belongs to a federated server.
    pub fn is_federated_key(&self, key: &PublicKey) -> bool {
        self.federated.iter().any(|s| &s.signing_key == key)
    }

    /// Applies an admin change. Removing the last federated server is refused.
    pub fn apply(&mut self, change: &AdminChange) -> bool {
        match change {
            AdminChange::AddServer {
                id,
                kind,
                signing_key,
            } => {
                self.federated.retain(|s| &s.id != id);
                self.audit.retain(|s| &s.id != id);
                let entry = ServerEntry {
                    id: *id,
                    signing_key: *signing_key,
                };
                let list = match kind {
                    ServerKind::Federated => &mut self.federated,
                    ServerKind::Audit => &mut self.audit,
                };
                list.push(entry);
                list.sort_by(|a, b| a.id.cmp(&b.id));
                true
            }
            AdminChange::RemoveServer { id, kind } => match kind {
                ServerKind::Federated => {
                    if self.federated.len() < 2 || !self.is_federated(id) {
                        return false;
                    }
                    self.federated.retain(|s| &s.id != id);
                    true
                }
                ServerKind::Audit => {
                    let before = self.audit.len();
                    self.audit.retain(|s| &s.id != id);
                    before != self.audit.len()
                }
            },
            AdminChange::ChangeServerKey { id, signing_key } => {
                match self
                    .federated
                    .iter_mut()
                    .chain(self.audit.iter_mut())
                    .find(|s| &s.id == id)
                {
                    Some(server) => {
                        server.signing_key = *signing_key;
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

/// Lane-to-federated-server assignment for each minute of one height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerMap {
    rows: Vec<Vec<usize>>,
}

impl ServerMap {
    /// Builds the rotation for `db_height` over `fed_count` federated servers.
    pub fn new(db_height: u32, fed_count: usize) -> Self {
        if fed_count == 0 {
            return Self {
                rows: vec![Vec::new(); MINUTES_PER_BLOCK],
            };
        }
        let mut index = (db_height as usize).wrapping_mul(131) % fed_count;
        let mut rows = Vec::with_capacity(MINUTES_PER_BLOCK);
        for _ in 0..MINUTES_PER_BLOCK {
            index = (index + 1) % fed_count;
            let mut row = Vec::with_capacity(fed_count);
            for _ in 0..fed_count {
                row.push(index);
                index = (index + 1) % fed_count;
            }
            rows.push(row);
        }
        Self { rows }
    }

    /// Federated-server index leading `vm` during `minute`.
    pub fn fed_index(&self, minute: u8, vm: usize) -> Option<usize> {
        self.rows
            .get(clamp_minute(minute))
            .and_then(|row| row.get(vm))
            .copied()
    }

    /// Lane led by federated server `fed_index` during `minute`.
    pub fn vm_for(&self, minute: u8, fed_index: usize) -> Option<usize> {
        self.rows
            .get(clamp_minute(minute))
            .and_then(|row| row.iter().position(|&f| f == fed_index))
    }
}

/// Minute 10 (block sealing) uses the minute-9 row.
fn clamp_minute(minute: u8) -> usize {
    (minute as usize).min(MINUTES_PER_BLOCK - 1)
}

/// Deterministic lane for a message: byte sum of its hash modulo the lane count.
pub fn vm_index_for(hash: &[u8], lanes: usize) -> usize {
    if lanes == 0 {
        return 0;
    }
    let sum: u64 = hash.iter().map(|&b| u64::from(b)).sum();
    (sum % lanes as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: u8) -> ServerEntry {
        ServerEntry {
            id: [id; 32],
            signing_key: [id; 32],
        }
    }

    #[test]
    fn test_server_map_rows_are_permutations() {
        let map = ServerMap::new(7, 3);
        for minute in 0..10u8 {
            let mut row: Vec<usize> = (0..3).filter_map(|vm| map.fed_index(minute, vm)).collect();
            row.sort_unstable();
            assert_eq!(row, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_server_map_rotates_by_minute() {
        let map = ServerMap::new(0, 3);
        assert_eq!(map.fed_index(0, 0), Some(1));
        assert_eq!(map.fed_index(1, 0), Some(2));
        assert_eq!(map.vm_for(0, 1), Some(0));
        assert_eq!(map.fed_index(10, 0), map.fed_index(9, 0));
    }

    #[test]
    fn test_single_server_leads_every_minute() {
        let map = ServerMap::new(42, 1);
        for minute in 0..=10u8 {
            assert_eq!(map.vm_for(minute, 0), Some(0));
        }
    }

    #[test]
    fn test_vm_index_for_is_byte_sum() {
        assert_eq!(vm_index_for(&[1, 2, 3], 4), 2);
        assert_eq!(vm_index_for(&[255; 32], 1), 0);
        assert_eq!(vm_index_for(&[9], 0), 0);
    }

    #[test]
    fn test_cannot_remove_last_federated_server() {
        let mut set = AuthoritySet::new(vec![server(1)], vec![]);
        let removed = set.apply(&AdminChange::RemoveServer {
            id: [1; 32],
            kind: ServerKind::Federated,
        });
        assert!(!removed);
        assert_eq!(set.federated_count(), 1);
    }

    #[test]
    fn test_add_and_change_key() {
        let mut set = AuthoritySet::new(vec![server(2), server(1)], vec![]);
        assert_eq!(set.federated_index(&[1; 32]), Some(0));
        assert!(set.apply(&AdminChange::AddServer {
            id: [3; 32],
            kind: ServerKind::Audit,
            signing_key: [3; 32],
        }));
        assert!(set.is_audit(&[3; 32]));
        assert!(set.apply(&AdminChange::ChangeServerKey {
            id: [3; 32],
            signing_key: [9; 32],
        }));
        assert_eq!(set.signing_key(&[3; 32]), Some([9; 32]));
    }
}
