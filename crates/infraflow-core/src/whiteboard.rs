//! Hierarchical reconciliation state ("whiteboard")
//!
//! The whiteboard is a tree of string keyed nodes. Each node holds leaf
//! slots and named children. A leaf is either live (holding a provider ID
//! or other value) or tombstoned; a key without a slot is unset.
//!
//! For persistence the tree flattens into a single level map whose keys join
//! the path with [`SEPARATOR`] and whose tombstones are stored as
//! [`DELETED_MARKER`]. The flat map is wrapped in a versioned
//! [`PersistedState`].
//!
//! [`Whiteboard`] is a cheap handle onto a node of a shared tree; handles
//! obtained through [`Whiteboard::child`] write into the same tree.

use crate::error::{FlowError, Result};
use crate::keys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Separator of path segments in flat keys
pub const SEPARATOR: &str = "/";

/// Flat value of a tombstoned key
pub const DELETED_MARKER: &str = "<deleted>";

/// Schema version written by this engine
pub const STATE_VERSION: &str = "v1";

/// Root key set once a terraform state was migrated
pub const MARKER_MIGRATED: &str = "MigratedFromTerraform";

/// Root key set once the terraform bookkeeping was removed
pub const MARKER_CLEANED_UP: &str = "TerraformCleanedUp";

const MARKER_TRUE: &str = "true";

/// Persisted form of a whiteboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl PersistedState {
    pub fn new(data: BTreeMap<String, String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            data,
        }
    }

    /// Whether this engine can read the state
    pub fn has_valid_version(&self) -> bool {
        self.version == STATE_VERSION
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Value of a set key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Live(String),
    /// Explicitly deleted, distinct from unset
    Tombstoned,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Board {
    leaves: BTreeMap<String, Slot>,
    children: BTreeMap<String, Board>,
}

impl Board {
    fn node(&self, path: &[String]) -> Option<&Board> {
        path.iter()
            .try_fold(self, |board, name| board.children.get(name))
    }

    fn node_mut(&mut self, path: &[String]) -> &mut Board {
        path.iter().fold(self, |board, name| {
            board.children.entry(name.clone()).or_default()
        })
    }

    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        for (key, slot) in &self.leaves {
            let value = match slot {
                Slot::Live(value) => value.clone(),
                Slot::Tombstoned => DELETED_MARKER.to_string(),
            };
            out.insert(format!("{}{}", prefix, key), value);
        }
        for (name, child) in &self.children {
            child.flatten_into(&format!("{}{}{}", prefix, name, SEPARATOR), out);
        }
    }

    fn clear_tombstones(&mut self) -> usize {
        let before = self.leaves.len();
        self.leaves.retain(|_, slot| *slot != Slot::Tombstoned);
        let mut cleared = before - self.leaves.len();
        for child in self.children.values_mut() {
            cleared += child.clear_tombstones();
        }
        cleared
    }
}

/// Handle onto a node of a shared reconciliation state tree
#[derive(Debug, Clone, Default)]
pub struct Whiteboard {
    root: Arc<RwLock<Board>>,
    path: Vec<String>,
}

impl Whiteboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Board> {
        self.root.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Board> {
        self.root.write().unwrap_or_else(|e| e.into_inner())
    }

    fn with_node<T>(&self, f: impl FnOnce(Option<&Board>) -> T) -> T {
        let root = self.read();
        f(root.node(&self.path))
    }

    fn with_node_mut<T>(&self, f: impl FnOnce(&mut Board) -> T) -> T {
        let mut root = self.write();
        f(root.node_mut(&self.path))
    }

    /// Handle onto the root of the tree
    pub fn root(&self) -> Whiteboard {
        Whiteboard {
            root: self.root.clone(),
            path: Vec::new(),
        }
    }

    /// Path of this node from the root
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Named child node, created on first access
    pub fn child(&self, name: &str) -> Whiteboard {
        let mut path = self.path.clone();
        path.push(name.to_string());
        let child = Whiteboard {
            root: self.root.clone(),
            path,
        };
        child.with_node_mut(|_| ());
        child
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.with_node(|node| node.is_some_and(|n| n.children.contains_key(name)))
    }

    /// Names of the child nodes, sorted
    pub fn children_keys(&self) -> Vec<String> {
        self.with_node(|node| {
            node.map(|n| n.children.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Remove a child node and everything below it
    pub fn clean_child(&self, name: &str) {
        self.with_node_mut(|node| {
            node.children.remove(name);
        });
    }

    pub fn slot(&self, key: &str) -> Option<Slot> {
        self.with_node(|node| node.and_then(|n| n.leaves.get(key).cloned()))
    }

    /// Live value of `key`; `None` when unset or tombstoned
    pub fn get(&self, key: &str) -> Option<String> {
        match self.slot(key) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    /// Set a live value; an empty value unsets the key
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.with_node_mut(|node| {
            if value.is_empty() {
                node.leaves.remove(key);
            } else {
                node.leaves.insert(key.to_string(), Slot::Live(value));
            }
        });
    }

    pub fn unset(&self, key: &str) {
        self.with_node_mut(|node| {
            node.leaves.remove(key);
        });
    }

    pub fn is_already_deleted(&self, key: &str) -> bool {
        self.slot(key) == Some(Slot::Tombstoned)
    }

    pub fn set_as_deleted(&self, key: &str) {
        self.with_node_mut(|node| {
            node.leaves.insert(key.to_string(), Slot::Tombstoned);
        });
    }

    /// Whether the node records no resources
    ///
    /// Root level markers and zone suffixes are bookkeeping and not counted.
    pub fn is_empty(&self) -> bool {
        let prefix = self.path.join(SEPARATOR);
        self.export_flat().keys().all(|key| {
            if prefix.is_empty() {
                is_bookkeeping(key)
            } else {
                is_bookkeeping(&format!("{}{}{}", prefix, SEPARATOR, key))
            }
        })
    }

    /// Drop every tombstone below this node; returns how many were dropped
    pub fn clear_tombstones(&self) -> usize {
        self.with_node_mut(|node| node.clear_tombstones())
    }

    /// Flat map of the subtree below this node
    ///
    /// Empty child nodes carry no information and are left out.
    pub fn export_flat(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.with_node(|node| {
            if let Some(node) = node {
                node.flatten_into("", &mut out);
            }
        });
        out
    }

    /// Replace the subtree below this node with the content of `flat`
    pub fn import_flat(&self, flat: &BTreeMap<String, String>) -> Result<()> {
        let mut board = Board::default();
        for (key, value) in flat {
            let mut segments: Vec<&str> = key.split(SEPARATOR).collect();
            let leaf = segments.pop().unwrap_or_default();
            if leaf.is_empty() || segments.iter().any(|s| s.is_empty()) {
                return Err(FlowError::State(format!("malformed state key {:?}", key)));
            }
            let path: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            let slot = if value == DELETED_MARKER {
                Slot::Tombstoned
            } else if value.is_empty() {
                continue;
            } else {
                Slot::Live(value.clone())
            };
            board.node_mut(&path).leaves.insert(leaf.to_string(), slot);
        }

        self.with_node_mut(|node| *node = board);
        Ok(())
    }

    /// Versioned snapshot of the whole tree
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState::new(self.root().export_flat())
    }

    /// Build a whiteboard from a persisted snapshot
    pub fn from_persisted(state: &PersistedState) -> Result<Self> {
        if !state.has_valid_version() {
            return Err(FlowError::State(format!(
                "unsupported state version {:?}, expected {:?}",
                state.version, STATE_VERSION
            )));
        }
        let board = Self::new();
        board.import_flat(&state.data)?;
        Ok(board)
    }

    pub fn set_migrated_from_terraform(&self) {
        self.root().set(MARKER_MIGRATED, MARKER_TRUE);
    }

    pub fn migrated_from_terraform(&self) -> bool {
        self.root().get(MARKER_MIGRATED).as_deref() == Some(MARKER_TRUE)
    }

    pub fn set_terraform_cleaned_up(&self) {
        self.root().set(MARKER_CLEANED_UP, MARKER_TRUE);
    }

    pub fn terraform_cleaned_up(&self) -> bool {
        self.root().get(MARKER_CLEANED_UP).as_deref() == Some(MARKER_TRUE)
    }
}

fn is_bookkeeping(flat_key: &str) -> bool {
    if flat_key == MARKER_MIGRATED || flat_key == MARKER_CLEANED_UP {
        return true;
    }
    let segments: Vec<&str> = flat_key.split(SEPARATOR).collect();
    matches!(segments.as_slice(), [zones, _, leaf] if *zones == keys::ZONES && *leaf == keys::SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn populated(zones: &[&str]) -> Whiteboard {
        let board = Whiteboard::new();
        board.set("VPC", "vpc-1");
        board.set("NodesSecurityGroup", "sg-1");
        board.set_as_deleted("NatGateway");
        let all = board.child("Zones");
        for (i, zone) in zones.iter().enumerate() {
            let z = all.child(zone);
            z.set("VSwitch", format!("vsw-{}", i));
            z.set("Suffix", format!("z{}", i));
            if i % 2 == 1 {
                z.set_as_deleted("NATGatewayElasticIP");
            } else {
                z.set("NATGatewayElasticIP", format!("eip-{}", i));
            }
        }
        board
    }

    #[test]
    fn test_three_states() {
        let board = Whiteboard::new();
        assert_eq!(board.slot("VPC"), None);

        board.set("VPC", "vpc-1");
        assert_eq!(board.get("VPC").as_deref(), Some("vpc-1"));
        assert!(!board.is_already_deleted("VPC"));

        board.set_as_deleted("VPC");
        assert_eq!(board.get("VPC"), None);
        assert!(board.is_already_deleted("VPC"));
        assert_eq!(board.slot("VPC"), Some(Slot::Tombstoned));

        board.set("VPC", "");
        assert_eq!(board.slot("VPC"), None);
    }

    #[test]
    fn test_child_handles_share_the_tree() {
        let board = Whiteboard::new();
        let zone = board.child("Zones").child("zone-a");
        zone.set("VSwitch", "vsw-1");

        let again = board.child("Zones").child("zone-a");
        assert_eq!(again.get("VSwitch").as_deref(), Some("vsw-1"));
        assert_eq!(board.child("Zones").children_keys(), vec!["zone-a"]);
        assert_eq!(zone.path(), ["Zones".to_string(), "zone-a".to_string()]);

        board.child("Zones").clean_child("zone-a");
        assert!(board.child("Zones").children_keys().is_empty());
        assert_eq!(zone.get("VSwitch"), None);
    }

    #[test]
    fn test_export_flat_layout() {
        let board = populated(&["zone-a"]);
        assert_eq!(
            board.export_flat(),
            flat(&[
                ("NatGateway", DELETED_MARKER),
                ("NodesSecurityGroup", "sg-1"),
                ("VPC", "vpc-1"),
                ("Zones/zone-a/NATGatewayElasticIP", "eip-0"),
                ("Zones/zone-a/Suffix", "z0"),
                ("Zones/zone-a/VSwitch", "vsw-0"),
            ])
        );
    }

    #[test]
    fn test_round_trip() {
        for zones in [&[][..], &["zone-a"][..], &["zone-a", "zone-b", "zone-c"][..]] {
            let board = populated(zones);
            let exported = board.export_flat();

            let restored = Whiteboard::new();
            restored.import_flat(&exported).unwrap();
            assert_eq!(restored.export_flat(), exported);
            assert_eq!(
                restored.child("Zones").children_keys().len(),
                zones.len()
            );
            if zones.len() > 1 {
                assert!(
                    restored
                        .child("Zones")
                        .child(zones[1])
                        .is_already_deleted("NATGatewayElasticIP")
                );
            }

            let persisted = board.to_persisted();
            let json = persisted.to_json().unwrap();
            let loaded = Whiteboard::from_persisted(&PersistedState::from_json(&json).unwrap())
                .unwrap();
            assert_eq!(loaded.export_flat(), exported);
        }
    }

    #[test]
    fn test_empty_children_are_not_exported() {
        let board = Whiteboard::new();
        board.child("Zones").child("zone-a");
        assert!(board.export_flat().is_empty());
        assert!(board.is_empty());
    }

    #[test]
    fn test_is_empty_ignores_markers() {
        let board = Whiteboard::new();
        board.set_migrated_from_terraform();
        board.set_terraform_cleaned_up();
        assert!(board.is_empty());
        assert!(board.migrated_from_terraform());
        assert!(board.terraform_cleaned_up());

        board.child("Zones").child("zone-a").set("Suffix", "z0");
        assert!(board.is_empty());
        assert!(board.child("Zones").is_empty());

        board.child("Zones").child("zone-a").set_as_deleted("VSwitch");
        assert!(!board.is_empty());
        assert!(!board.child("Zones").child("zone-a").is_empty());
    }

    #[test]
    fn test_markers_live_at_root() {
        let board = Whiteboard::new();
        board.child("Zones").set_migrated_from_terraform();
        assert!(board.migrated_from_terraform());
        assert_eq!(
            board.export_flat().get("MigratedFromTerraform").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_clear_tombstones() {
        let board = populated(&["zone-a", "zone-b"]);
        assert_eq!(board.clear_tombstones(), 2);
        assert_eq!(board.slot("NatGateway"), None);
        assert_eq!(board.get("VPC").as_deref(), Some("vpc-1"));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let state = PersistedState {
            version: "v0".into(),
            data: flat(&[("VPC", "vpc-1")]),
        };
        assert!(!state.has_valid_version());
        assert!(matches!(
            Whiteboard::from_persisted(&state),
            Err(FlowError::State(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_keys() {
        let board = Whiteboard::new();
        assert!(board.import_flat(&flat(&[("Zones//VSwitch", "x")])).is_err());
        assert!(board.import_flat(&flat(&[("Zones/", "x")])).is_err());
    }
}
