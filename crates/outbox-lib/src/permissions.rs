use std::collections::BTreeSet;

use crate::sources::AttachmentSource;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    Camera,
    Microphone,
    ReadStorage,
    Contacts,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Camera => "camera",
            Permission::Microphone => "microphone",
            Permission::ReadStorage => "read-storage",
            Permission::Contacts => "contacts",
        };
        f.write_str(s)
    }
}

pub trait PermissionGate {
    fn is_granted(&self, permission: Permission) -> bool;

    fn grant(&mut self, permission: Permission);

    fn missing(&self, required: &[Permission]) -> Vec<Permission> {
        required
            .iter()
            .copied()
            .filter(|p| !self.is_granted(*p))
            .collect()
    }
}

/// Permissions the user has granted so far in this run.
#[derive(Debug, Default, Clone)]
pub struct GrantedPermissions(BTreeSet<Permission>);

impl GrantedPermissions {
    pub fn new(granted: impl IntoIterator<Item = Permission>) -> Self {
        Self(granted.into_iter().collect())
    }
}

impl PermissionGate for GrantedPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    fn grant(&mut self, permission: Permission) {
        self.0.insert(permission);
    }
}

/// An attachment action waiting for the user to grant permissions.
///
/// The request itself carries the source to launch, so answering it needs no other state
/// and several requests can be outstanding at once.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub id: u64,
    pub permissions: Vec<Permission>,
    pub source: AttachmentSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_lists_ungranted_in_order() {
        let mut gate = GrantedPermissions::new([Permission::Microphone]);
        assert_eq!(
            gate.missing(&[Permission::Camera, Permission::Microphone]),
            vec![Permission::Camera]
        );
        gate.grant(Permission::Camera);
        assert!(gate
            .missing(&[Permission::Camera, Permission::Microphone])
            .is_empty());
    }

    #[test]
    fn permission_names_round_trip_through_toml() {
        #[derive(serde::Deserialize)]
        struct Granted {
            granted: Vec<Permission>,
        }
        let parsed: Granted = toml::from_str(r#"granted = ["camera", "read-storage"]"#).unwrap();
        assert_eq!(
            parsed.granted,
            vec![Permission::Camera, Permission::ReadStorage]
        );
    }
}
