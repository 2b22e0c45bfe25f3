//! On-disk user/group configuration (spec §6) and the `UserIdentity`
//! resolution built from it via the Access Resolver (spec §4.1).
//!
//! Loading/format of `users.json`/`groups.json` is explicitly out of scope
//! for deeper validation beyond this JSON shape (spec §1); we read them
//! once at startup (reload is out of scope) into an in-memory snapshot.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::access::{self, GrantInput};
use crate::auth::password;

/// The closed set of permission/feature keys this server understands.
/// Access Resolver operates over exactly these keys.
pub const PERMISSION_KEYS: &[&str] = &[
    "sandbox_login",
    "terminate_containers",
    "manage_all_sessions",
    "broadcast",
    "impersonate",
];

pub const FEATURE_KEYS: &[&str] = &["notes_enabled", "password_reset_enabled"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Option<RawGrants>,
    #[serde(default)]
    pub features: Option<RawGrants>,
    #[serde(default)]
    pub prompt_for_reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub permissions: Option<RawGrants>,
    #[serde(default)]
    pub features: Option<RawGrants>,
}

/// Either the `"*"` wildcard sentinel or an explicit `key -> bool` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGrants {
    Wildcard(WildcardMarker),
    Map(HashMap<String, bool>),
}

/// Matches only the literal string `"*"` during deserialization.
#[derive(Debug, Clone)]
pub struct WildcardMarker;

impl Serialize for WildcardMarker {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("*")
    }
}

impl<'de> Deserialize<'de> for WildcardMarker {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s == "*" {
            Ok(WildcardMarker)
        } else {
            Err(serde::de::Error::custom("expected wildcard sentinel \"*\""))
        }
    }
}

impl RawGrants {
    fn into_input(self) -> GrantInput {
        match self {
            RawGrants::Wildcard(_) => GrantInput::Wildcard,
            RawGrants::Map(map) => GrantInput::from_map(map),
        }
    }
}

fn grants_to_input(raw: Option<RawGrants>) -> GrantInput {
    raw.map(RawGrants::into_input).unwrap_or(GrantInput::Empty)
}

/// Resolved, ephemeral user identity attached to every authenticated request.
#[derive(Debug, Clone, Serialize)]
pub struct UserIdentity {
    pub username: String,
    pub groups: Vec<String>,
    pub permissions: HashMap<String, bool>,
    pub features: HashMap<String, bool>,
    pub prompt_for_reset: bool,
}

impl UserIdentity {
    pub fn has_permission(&self, key: &str) -> bool {
        *self.permissions.get(key).unwrap_or(&false)
    }

    pub fn has_feature(&self, key: &str) -> bool {
        *self.features.get(key).unwrap_or(&false)
    }
}

pub struct UserStore {
    users: HashMap<String, UserRecord>,
    groups: HashMap<String, GroupRecord>,
    permission_defaults: HashMap<String, bool>,
    feature_defaults: HashMap<String, bool>,
}

impl UserStore {
    pub fn load(users_path: &Path, groups_path: &Path) -> anyhow::Result<Self> {
        let users = read_json_array::<UserRecord>(users_path)?
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
        let groups = read_json_array::<GroupRecord>(groups_path)?
            .into_iter()
            .map(|g| (g.name.clone(), g))
            .collect();
        Ok(Self {
            users,
            groups,
            permission_defaults: HashMap::new(),
            feature_defaults: HashMap::new(),
        })
    }

    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
            groups: HashMap::new(),
            permission_defaults: HashMap::new(),
            feature_defaults: HashMap::new(),
        }
    }

    pub fn get_user(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }

    pub fn verify_basic_auth(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(u) => password::verify_password(password, &u.password_hash),
            None => false,
        }
    }

    /// Builds the resolved identity for `username` via the Access Resolver,
    /// using the user's declared groups in order and falling back to an
    /// empty profile (all permissions/features false) for unknown users —
    /// this keeps an auth-disabled default identity usable even with no
    /// matching `users.json` entry.
    pub fn resolve_identity(&self, username: &str) -> UserIdentity {
        let user = self.users.get(username);
        let group_names: Vec<String> = user.map(|u| u.groups.clone()).unwrap_or_default();

        let group_inputs: Vec<GrantInput> = group_names
            .iter()
            .map(|g| {
                self.groups
                    .get(g)
                    .map(|g| grants_to_input(g.permissions.clone()))
                    .unwrap_or(GrantInput::Empty)
            })
            .collect();
        let group_feature_inputs: Vec<GrantInput> = group_names
            .iter()
            .map(|g| {
                self.groups
                    .get(g)
                    .map(|g| grants_to_input(g.features.clone()))
                    .unwrap_or(GrantInput::Empty)
            })
            .collect();

        let user_perm_input = grants_to_input(user.and_then(|u| u.permissions.clone()));
        let user_feature_input = grants_to_input(user.and_then(|u| u.features.clone()));

        let permissions = access::resolve(
            PERMISSION_KEYS,
            &group_inputs,
            &user_perm_input,
            &self.permission_defaults,
        );
        let features = access::resolve(
            FEATURE_KEYS,
            &group_feature_inputs,
            &user_feature_input,
            &self.feature_defaults,
        );

        UserIdentity {
            username: username.to_string(),
            groups: group_names,
            permissions,
            features,
            prompt_for_reset: user.map(|u| u.prompt_for_reset).unwrap_or(false),
        }
    }

    pub fn set_password_hash(&mut self, username: &str, hash: String) -> bool {
        match self.users.get_mut(username) {
            Some(u) => {
                u.password_hash = hash;
                true
            }
            None => false,
        }
    }

    pub fn save(&self, users_path: &Path) -> anyhow::Result<()> {
        let all: Vec<&UserRecord> = self.users.values().collect();
        let json = serde_json::to_vec_pretty(&all)?;
        crate::util::write_atomically(users_path, &json, 0o600)
    }
}

fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_resolves_to_all_false() {
        let store = UserStore::empty();
        let identity = store.resolve_identity("ghost");
        assert!(!identity.has_permission("manage_all_sessions"));
        assert!(!identity.has_feature("notes_enabled"));
    }

    #[test]
    fn group_wildcard_grants_permission() {
        let mut store = UserStore::empty();
        store.groups.insert(
            "admins".to_string(),
            GroupRecord {
                name: "admins".into(),
                permissions: Some(RawGrants::Wildcard(WildcardMarker)),
                features: None,
            },
        );
        store.users.insert(
            "alice".to_string(),
            UserRecord {
                username: "alice".into(),
                password_hash: String::new(),
                groups: vec!["admins".into()],
                permissions: None,
                features: None,
                prompt_for_reset: false,
            },
        );
        let identity = store.resolve_identity("alice");
        assert!(identity.has_permission("manage_all_sessions"));
    }
}
