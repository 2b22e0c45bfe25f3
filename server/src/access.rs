//! Access Resolver (spec §4.1): composes group + user boolean grant inputs
//! into a total `key -> bool` map, with wildcard and explicit-deny
//! semantics. Pure function, no I/O — the loaded `users.json`/`groups.json`
//! feed it, but the resolution itself never touches disk.

use std::collections::HashMap;

/// One layer's worth of grants: either an explicit map of keys to booleans,
/// or the `"*"` wildcard sentinel granting every key not otherwise set.
#[derive(Debug, Clone, Default)]
pub enum GrantInput {
    #[default]
    Empty,
    Wildcard,
    Explicit(HashMap<String, bool>),
}

impl GrantInput {
    pub fn from_map(map: HashMap<String, bool>) -> Self {
        Self::Explicit(map)
    }
}

/// Merges `inputs` left-to-right (later layers overwrite earlier ones for
/// keys they mention explicitly) and tracks whether any layer asserted the
/// wildcard.
fn merge_layer(inputs: &[GrantInput]) -> (HashMap<String, bool>, bool) {
    let mut merged: HashMap<String, bool> = HashMap::new();
    let mut wildcard = false;
    for input in inputs {
        match input {
            GrantInput::Empty => {}
            GrantInput::Wildcard => wildcard = true,
            GrantInput::Explicit(map) => {
                for (k, v) in map {
                    merged.insert(k.clone(), *v);
                }
            }
        }
    }
    (merged, wildcard)
}

/// Resolve a total `key -> bool` map over the closed key set `keys`.
///
/// Order of operations, matching spec §4.1:
/// 1. Merge `group_inputs` left-to-right.
/// 2. Apply `user_input` on top (same merge rules, including wildcard).
/// 3. For each key: explicit value wins; else wildcard (if asserted
///    anywhere) yields `true`; else `defaults[key]` or `false`.
/// 4. An explicit `false` found in the full merge always beats wildcard.
pub fn resolve(
    keys: &[&str],
    group_inputs: &[GrantInput],
    user_input: &GrantInput,
    defaults: &HashMap<String, bool>,
) -> HashMap<String, bool> {
    let (mut merged, mut wildcard) = merge_layer(group_inputs);
    let (user_merged, user_wildcard) = merge_layer(std::slice::from_ref(user_input));
    wildcard = wildcard || user_wildcard;
    for (k, v) in user_merged {
        merged.insert(k, v);
    }

    keys.iter()
        .map(|&k| {
            let value = match merged.get(k) {
                Some(explicit) => *explicit,
                None if wildcard => true,
                None => *defaults.get(k).unwrap_or(&false),
            };
            (k.to_string(), value)
        })
        .collect()
}

/// Whether `identity` may read/operate a given session (used by the
/// service proxy and session REST routes). Public sessions are visible to
/// everyone; shared-readonly sessions are visible to everyone but mutation
/// routes apply their own stricter checks; private sessions are visible
/// only to their owner and to holders of `manage_all_sessions`.
pub fn can_access_session(identity: &crate::users::UserIdentity, owner: &str, visibility: crate::session::Visibility) -> bool {
    use crate::session::Visibility;
    match visibility {
        Visibility::Public | Visibility::SharedReadonly => true,
        Visibility::Private => identity.username == owner || identity.has_permission("manage_all_sessions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn defaults_apply_when_nothing_asserts() {
        let keys = ["notes_enabled"];
        let defaults = map(&[("notes_enabled", true)]);
        let resolved = resolve(&keys, &[], &GrantInput::Empty, &defaults);
        assert_eq!(resolved["notes_enabled"], true);
    }

    #[test]
    fn group_wildcard_grants_everything_not_overridden() {
        let keys = ["a", "b"];
        let groups = [GrantInput::Wildcard];
        let resolved = resolve(&keys, &groups, &GrantInput::Empty, &HashMap::new());
        assert_eq!(resolved["a"], true);
        assert_eq!(resolved["b"], true);
    }

    #[test]
    fn user_explicit_false_overrides_group_wildcard() {
        let keys = ["a"];
        let groups = [GrantInput::Wildcard];
        let user = GrantInput::from_map(map(&[("a", false)]));
        let resolved = resolve(&keys, &groups, &user, &HashMap::new());
        assert_eq!(resolved["a"], false);
    }

    #[test]
    fn explicit_false_anywhere_always_wins() {
        // Group A grants wildcard, group B explicitly denies `a`, user asserts
        // wildcard again. The explicit false must still win.
        let keys = ["a"];
        let groups = [
            GrantInput::Wildcard,
            GrantInput::from_map(map(&[("a", false)])),
        ];
        let user = GrantInput::Wildcard;
        let resolved = resolve(&keys, &groups, &user, &HashMap::new());
        assert_eq!(resolved["a"], false);
    }

    #[test]
    fn later_group_overwrites_earlier_group() {
        let keys = ["a"];
        let groups = [
            GrantInput::from_map(map(&[("a", true)])),
            GrantInput::from_map(map(&[("a", false)])),
        ];
        let resolved = resolve(&keys, &groups, &GrantInput::Empty, &HashMap::new());
        assert_eq!(resolved["a"], false);
    }

    #[test]
    fn user_wildcard_fills_keys_groups_left_unset() {
        let keys = ["a", "b"];
        let groups = [GrantInput::from_map(map(&[("a", false)]))];
        let user = GrantInput::Wildcard;
        let resolved = resolve(&keys, &groups, &user, &HashMap::new());
        assert_eq!(resolved["a"], false); // explicit false from group stands
        assert_eq!(resolved["b"], true); // filled by user wildcard
    }
}
