//! Admin permission models: atoms, roles, and admin accounts

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role permission entry that grants every atom
pub const WILDCARD_PERMISSION: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Smallest named permission unit, e.g. `events:create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionAtom {
    pub atom_id: String,
    pub group: String,
    pub action: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub risk_level: RiskLevel,
    /// Atoms that may not be granted together with this one
    #[serde(default)]
    pub conflicts_with: BTreeSet<String>,
    /// Atoms that must be granted alongside this one
    #[serde(default)]
    pub requires_all: BTreeSet<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl PermissionAtom {
    /// Build an atom from a `group:action` id. Returns `None` for malformed ids.
    pub fn new(atom_id: &str, name: &str, risk_level: RiskLevel) -> Option<Self> {
        let (group, action) = split_atom_id(atom_id)?;
        Some(Self {
            atom_id: atom_id.to_string(),
            group: group.to_string(),
            action: action.to_string(),
            name: name.to_string(),
            description: String::new(),
            risk_level,
            conflicts_with: BTreeSet::new(),
            requires_all: BTreeSet::new(),
            version: default_version(),
        })
    }

    #[must_use]
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn conflicting_with<'a>(mut self, atoms: impl IntoIterator<Item = &'a str>) -> Self {
        self.conflicts_with
            .extend(atoms.into_iter().map(str::to_string));
        self
    }

    #[must_use]
    pub fn requiring<'a>(mut self, atoms: impl IntoIterator<Item = &'a str>) -> Self {
        self.requires_all.extend(atoms.into_iter().map(str::to_string));
        self
    }
}

/// Split `group:action`; both halves must be non-empty.
pub(crate) fn split_atom_id(atom_id: &str) -> Option<(&str, &str)> {
    let (group, action) = atom_id.split_once(':')?;
    if group.trim().is_empty() || action.trim().is_empty() || action.contains(':') {
        return None;
    }
    Some((group, action))
}

const fn default_version() -> u32 {
    1
}

/// Named bundle of atoms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRole {
    pub role_id: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
    /// Atom ids, or the wildcard `*`
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl AdminRole {
    pub fn new<'a>(
        role_id: &str,
        name: &str,
        department: &str,
        permissions: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            role_id: role_id.to_string(),
            name: name.to_string(),
            department: department.to_string(),
            permissions: permissions.into_iter().map(str::to_string).collect(),
            is_custom: false,
            is_active: true,
            version: default_version(),
        }
    }
}

const fn default_active() -> bool {
    true
}

/// Administrative tier. `Owner` and `Founder` bypass permission checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminLevel {
    Owner,
    Founder,
    Manager,
    #[default]
    Staff,
}

impl AdminLevel {
    pub const fn is_top_tier(self) -> bool {
        matches!(self, Self::Owner | Self::Founder)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    #[default]
    Active,
    Suspended,
    Inactive,
}

/// Administrator account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub admin_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    pub role_id: String,
    /// Atoms granted outside the role
    #[serde(default)]
    pub custom_permissions: BTreeSet<String>,
    #[serde(default)]
    pub level: AdminLevel,
    #[serde(default)]
    pub status: AdminStatus,
}

impl fmt::Debug for AdminUser {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AdminUser")
            .field("admin_id", &self.admin_id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("role_id", &self.role_id)
            .field("custom_permissions", &self.custom_permissions)
            .field("level", &self.level)
            .field("status", &self.status)
            .finish()
    }
}
