//! Deriving the `iam/` subtree from a single policy document.
//!
//! Both views (`by-role` and `by-member`) are computed from the same cached [`Policy`], so a
//! traversal of any depth costs one backend fetch per scope.

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::Policy;

const ROLE_PREFIX: &str = "roles/";

/// Escape a name so it is a single path component.
#[must_use]
pub fn encode_component(raw: &str) -> String {
    raw.replace('%', "%25").replace('/', "%2F")
}

/// The file name a role is shown under.
///
/// Predefined roles drop their `roles/` prefix; custom roles keep their full path, escaped.
///
/// ```
/// use gcloud_fs::tree::policy::encode_role;
///
/// assert_eq!(encode_role("roles/storage.objectViewer"), "storage.objectViewer");
/// assert_eq!(encode_role("projects/p/roles/x"), "projects%2Fp%2Froles%2Fx");
/// ```
#[must_use]
pub fn encode_role(role: &str) -> String {
    encode_component(role.strip_prefix(ROLE_PREFIX).unwrap_or(role))
}

/// role -> members granted that role.
#[must_use]
pub fn by_role(policy: &Policy) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for binding in &policy.bindings {
        out.entry(binding.role.clone())
            .or_default()
            .extend(binding.members.iter().cloned());
    }
    out
}

/// member -> roles granted to that member.
#[must_use]
pub fn by_member(policy: &Policy) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for binding in &policy.bindings {
        for member in &binding.members {
            out.entry(member.clone())
                .or_default()
                .insert(binding.role.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Binding;

    fn policy() -> Policy {
        Policy {
            bindings: vec![
                Binding {
                    role: "roles/storage.objectViewer".to_owned(),
                    members: vec!["user:a@x.com".to_owned(), "group:g@x.com".to_owned()],
                    condition: None,
                },
                Binding {
                    role: "projects/p/roles/custom".to_owned(),
                    members: vec!["user:a@x.com".to_owned()],
                    condition: None,
                },
                Binding {
                    role: "roles/storage.objectViewer".to_owned(),
                    members: vec!["user:b@x.com".to_owned()],
                    condition: None,
                },
            ],
            ..Policy::default()
        }
    }

    #[test]
    fn role_encoding() {
        assert_eq!(encode_role("roles/owner"), "owner");
        assert_eq!(encode_role("roles/a/b"), "a%2Fb");
        assert_eq!(
            encode_role("projects/p/roles/x"),
            "projects%2Fp%2Froles%2Fx"
        );
        assert_eq!(encode_component("principal://x/y"), "principal:%2F%2Fx%2Fy");
    }

    #[test]
    fn duplicate_role_bindings_merge() {
        let roles = by_role(&policy());
        let viewers = &roles["roles/storage.objectViewer"];
        assert_eq!(viewers.len(), 3);
        assert!(viewers.contains("user:b@x.com"));
    }

    #[test]
    fn member_view_inverts_role_view() {
        let members = by_member(&policy());
        let a = &members["user:a@x.com"];
        assert_eq!(
            a.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["projects/p/roles/custom", "roles/storage.objectViewer"]
        );
        assert_eq!(members.len(), 3);
    }
}
