//! State Plane: per-(user, role, loop) runtime settings plus the other
//! small ephemeral maps that are written lazily and never explicitly
//! deleted, only overwritten — distinct from the auth tree's entities,
//! whose lifecycle is create/update/delete.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vocsdb_security::Permission;
use vocsdb_sdk::KeysetLayout;

use super::tree::{LoopNode, Tree};

/// Key identifying one (user, role, loop) triple.
pub type StateKey = (String, String, String);

/// The runtime-state maps. Guarded by the same coarse lock as the auth
/// tree (see [`crate::store::EntityStore`]), since a mutation here can be
/// driven by the same request that just verified role/loop existence
/// against the tree.
#[derive(Debug, Clone, Default)]
pub struct StatePlane {
    talk_state: BTreeMap<StateKey, Permission>,
    volume: BTreeMap<StateKey, u8>,
    role_layout: BTreeMap<String, BTreeMap<String, i32>>,
    keyset_layout: BTreeMap<(String, String), KeysetLayout>,
    user_data: BTreeMap<String, Value>,
}

impl StatePlane {
    pub fn set_state(&mut self, user: &str, role: &str, loop_id: &str, perm: Permission) {
        self.talk_state
            .insert((user.to_owned(), role.to_owned(), loop_id.to_owned()), perm);
    }

    /// Returns `Permission::None` for any missing intermediate.
    #[must_use]
    pub fn get_state(&self, user: &str, role: &str, loop_id: &str) -> Permission {
        self.talk_state
            .get(&(user.to_owned(), role.to_owned(), loop_id.to_owned()))
            .copied()
            .unwrap_or(Permission::None)
    }

    /// Rejects values above 100 without mutating.
    pub fn set_volume(&mut self, user: &str, role: &str, loop_id: &str, value: u8) -> bool {
        if value > 100 {
            return false;
        }
        self.volume
            .insert((user.to_owned(), role.to_owned(), loop_id.to_owned()), value);
        true
    }

    /// Default on read-miss is `0`.
    #[must_use]
    pub fn get_volume(&self, user: &str, role: &str, loop_id: &str) -> u8 {
        self.volume
            .get(&(user.to_owned(), role.to_owned(), loop_id.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_role_layout(&mut self, role: &str, layout: BTreeMap<String, i32>) {
        self.role_layout.insert(role.to_owned(), layout);
    }

    /// An empty map if the role has no layout set yet. Whether the role
    /// exists at all is the caller's responsibility to check against the
    /// tree — this map does not know about role identity.
    #[must_use]
    pub fn get_role_layout(&self, role: &str) -> BTreeMap<String, i32> {
        self.role_layout.get(role).cloned().unwrap_or_default()
    }

    pub fn set_keyset_layout(&mut self, domain: &str, name: &str, layout: KeysetLayout) {
        self.keyset_layout
            .insert((domain.to_owned(), name.to_owned()), layout);
    }

    /// The documented default (§6) when unset.
    #[must_use]
    pub fn get_keyset_layout(&self, domain: &str, name: &str) -> KeysetLayout {
        self.keyset_layout
            .get(&(domain.to_owned(), name.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_user_data(&mut self, user: &str, data: Value) {
        self.user_data.insert(user.to_owned(), data);
    }

    #[must_use]
    pub fn get_user_data(&self, user: &str) -> Option<Value> {
        self.user_data.get(user).cloned()
    }

    /// Flatten into a serde-friendly snapshot for the Persistence Bridge.
    /// `serde_json` requires string map keys, so the tuple-keyed maps are
    /// exported as entry lists instead.
    #[must_use]
    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            talk_state: self
                .talk_state
                .iter()
                .map(|((user, role, loop_id), state)| TalkStateEntry {
                    user: user.clone(),
                    role: role.clone(),
                    loop_id: loop_id.clone(),
                    state: *state,
                })
                .collect(),
            volume: self
                .volume
                .iter()
                .map(|((user, role, loop_id), volume)| VolumeEntry {
                    user: user.clone(),
                    role: role.clone(),
                    loop_id: loop_id.clone(),
                    volume: *volume,
                })
                .collect(),
            role_layout: self.role_layout.clone(),
            keyset_layout: self
                .keyset_layout
                .iter()
                .map(|((domain, name), layout)| KeysetLayoutEntry {
                    domain: domain.clone(),
                    name: name.clone(),
                    layout: layout.clone(),
                })
                .collect(),
            user_data: self.user_data.clone(),
        }
    }

    /// Rebuild a `StatePlane` from a snapshot produced by [`Self::to_snapshot`].
    #[must_use]
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let mut state = Self::default();
        for entry in snapshot.talk_state {
            state.talk_state.insert((entry.user, entry.role, entry.loop_id), entry.state);
        }
        for entry in snapshot.volume {
            state
                .volume
                .insert((entry.user, entry.role, entry.loop_id), entry.volume);
        }
        state.role_layout = snapshot.role_layout;
        for entry in snapshot.keyset_layout {
            state
                .keyset_layout
                .insert((entry.domain, entry.name), entry.layout);
        }
        state.user_data = snapshot.user_data;
        state
    }
}

/// Serde-friendly flattening of [`StatePlane`]'s tuple-keyed maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub talk_state: Vec<TalkStateEntry>,
    pub volume: Vec<VolumeEntry>,
    pub role_layout: BTreeMap<String, BTreeMap<String, i32>>,
    pub keyset_layout: Vec<KeysetLayoutEntry>,
    pub user_data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalkStateEntry {
    pub user: String,
    pub role: String,
    pub loop_id: String,
    pub state: Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub user: String,
    pub role: String,
    pub loop_id: String,
    pub volume: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetLayoutEntry {
    pub domain: String,
    pub name: String,
    pub layout: KeysetLayout,
}

/// One recorded loop, paired with its multicast configuration, as returned
/// by `get_recorded_loops`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLoop {
    pub id: String,
    pub host: Option<String>,
    pub port: u16,
}

/// Flip a loop's recording flag in place.
pub fn set_recording(loop_node: &mut LoopNode, recording: bool) {
    loop_node.recording = recording;
}

/// Every loop whose recording flag is set, across the whole tree.
#[must_use]
pub fn get_recorded_loops(tree: &Tree) -> Vec<RecordedLoop> {
    let mut out = Vec::new();
    for domain in tree.domains.values() {
        collect_recorded(&domain.loops, &mut out);
        for project in domain.projects.values() {
            collect_recorded(&project.loops, &mut out);
        }
    }
    out
}

fn collect_recorded(loops: &BTreeMap<String, LoopNode>, out: &mut Vec<RecordedLoop>) {
    for (id, loop_node) in loops {
        if loop_node.recording {
            out.push(RecordedLoop {
                id: id.clone(),
                host: loop_node.multicast.host.clone(),
                port: loop_node.multicast.port,
            });
        }
    }
}

/// The maximum multicast port across every loop in the tree; `0` if none.
#[must_use]
pub fn highest_port(tree: &Tree) -> u16 {
    let mut highest = 0u16;
    for domain in tree.domains.values() {
        highest = highest.max(max_port(&domain.loops));
        for project in domain.projects.values() {
            highest = highest.max(max_port(&project.loops));
        }
    }
    highest
}

fn max_port(loops: &BTreeMap<String, LoopNode>) -> u16 {
    loops.values().map(|l| l.multicast.port).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = StatePlane::default();
        state.set_state("u1", "r1", "l1", Permission::Send);
        state.set_volume("u1", "r1", "l1", 42);
        let mut layout = BTreeMap::new();
        layout.insert("l1".to_owned(), 3);
        state.set_role_layout("r1", layout);
        state.set_keyset_layout("d1", "compact", KeysetLayout::default());
        state.set_user_data("u1", serde_json::json!({"theme": "dark"}));

        let json = serde_json::to_string(&state.to_snapshot()).unwrap();
        let restored = StatePlane::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.get_state("u1", "r1", "l1"), Permission::Send);
        assert_eq!(restored.get_volume("u1", "r1", "l1"), 42);
        assert_eq!(restored.get_role_layout("r1").get("l1"), Some(&3));
        assert_eq!(
            restored.get_user_data("u1"),
            Some(serde_json::json!({"theme": "dark"}))
        );
    }

    #[test]
    fn volume_rejects_out_of_range() {
        let mut state = StatePlane::default();
        assert!(!state.set_volume("u1", "r1", "l1", 101));
        assert_eq!(state.get_volume("u1", "r1", "l1"), 0);
        assert!(state.set_volume("u1", "r1", "l1", 80));
        assert_eq!(state.get_volume("u1", "r1", "l1"), 80);
    }

    #[test]
    fn missing_state_defaults_to_none() {
        let state = StatePlane::default();
        assert_eq!(state.get_state("u1", "r1", "l1"), Permission::None);
    }

    #[test]
    fn keyset_layout_defaults_when_unset() {
        let state = StatePlane::default();
        assert_eq!(state.get_keyset_layout("d1", "default"), KeysetLayout::default());
    }

    #[test]
    fn highest_port_across_domains_and_projects() {
        let mut tree = Tree::default();
        let mut domain = crate::domain::tree::DomainNode {
            id: "d1".to_owned(),
            ..Default::default()
        };
        domain.loops.insert(
            "l1".to_owned(),
            LoopNode {
                id: "l1".to_owned(),
                multicast: vocsdb_sdk::MulticastEndpoint {
                    host: None,
                    port: 5000,
                },
                ..Default::default()
            },
        );
        let mut project = crate::domain::tree::ProjectNode {
            id: "p1".to_owned(),
            ..Default::default()
        };
        project.loops.insert(
            "l2".to_owned(),
            LoopNode {
                id: "l2".to_owned(),
                multicast: vocsdb_sdk::MulticastEndpoint {
                    host: None,
                    port: 6000,
                },
                ..Default::default()
            },
        );
        domain.projects.insert("p1".to_owned(), project);
        tree.domains.insert("d1".to_owned(), domain);

        assert_eq!(highest_port(&tree), 6000);
    }
}
