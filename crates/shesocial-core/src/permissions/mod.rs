//! Admin permission evaluation.
//!
//! Atoms are the unit of authorization, roles bundle atoms, and two
//! independent escape hatches grant everything: a top-tier admin level and
//! the `*` wildcard in a permission set. They are kept as separate predicates.

mod catalog;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{
    split_atom_id, AdminRole, AdminStatus, AdminUser, PermissionAtom, WILDCARD_PERMISSION,
};

/// Atoms an admin may exercise
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "atoms", rename_all = "lowercase")]
pub enum EffectivePermissions {
    All,
    Atoms(BTreeSet<String>),
}

impl EffectivePermissions {
    pub fn none() -> Self {
        Self::Atoms(BTreeSet::new())
    }

    pub fn contains(&self, atom_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Atoms(atoms) => atoms.contains(atom_id),
        }
    }
}

/// Why a permission combination is rejected
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionViolation {
    UnknownAtom { atom: String },
    Conflict { atom: String, other: String },
    MissingRequirement { atom: String, required: String },
}

impl fmt::Display for PermissionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAtom { atom } => write!(f, "`{atom}` is not a known permission"),
            Self::Conflict { atom, other } => {
                write!(f, "`{atom}` cannot be granted together with `{other}`")
            }
            Self::MissingRequirement { atom, required } => {
                write!(f, "`{atom}` requires `{required}`")
            }
        }
    }
}

/// Top-tier admins bypass every check.
pub const fn has_level_bypass(user: &AdminUser) -> bool {
    user.level.is_top_tier()
}

/// A permission set holding `*` grants every atom.
pub fn grants_wildcard(permissions: &BTreeSet<String>) -> bool {
    permissions.contains(WILDCARD_PERMISSION)
}

/// Known atoms and roles
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    atoms: BTreeMap<String, PermissionAtom>,
    roles: BTreeMap<String, AdminRole>,
}

impl PermissionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an atom.
    ///
    /// Rejects malformed ids and any atom that would both require and
    /// conflict with the same atom, counting conflicts declared by
    /// already-registered atoms.
    pub fn insert_atom(&mut self, atom: PermissionAtom) -> Result<()> {
        let Some((group, action)) = split_atom_id(&atom.atom_id) else {
            return Err(Error::InvalidInput(format!(
                "permission id `{}` must look like group:action",
                atom.atom_id
            )));
        };
        if group != atom.group || action != atom.action {
            return Err(Error::InvalidInput(format!(
                "permission `{}` has mismatched group/action",
                atom.atom_id
            )));
        }

        let id = atom.atom_id.as_str();
        if atom.requires_all.contains(id) || atom.conflicts_with.contains(id) {
            return Err(Error::InvalidInput(format!(
                "permission `{id}` cannot reference itself"
            )));
        }
        if let Some(both) = atom.requires_all.intersection(&atom.conflicts_with).next() {
            return Err(Error::InvalidInput(format!(
                "permission `{id}` both requires and conflicts with `{both}`"
            )));
        }
        for required in &atom.requires_all {
            if self
                .atoms
                .get(required)
                .is_some_and(|other| other.conflicts_with.contains(id))
            {
                return Err(Error::InvalidInput(format!(
                    "permission `{id}` requires `{required}`, which conflicts with it"
                )));
            }
        }
        for other in self.atoms.values() {
            if other.requires_all.contains(id) && atom.conflicts_with.contains(&other.atom_id) {
                return Err(Error::InvalidInput(format!(
                    "permission `{id}` conflicts with `{}`, which requires it",
                    other.atom_id
                )));
            }
        }

        self.atoms.insert(atom.atom_id.clone(), atom);
        Ok(())
    }

    /// Register a role after checking its permission set.
    pub fn insert_role(&mut self, role: AdminRole) -> Result<()> {
        if role.role_id.trim().is_empty() {
            return Err(Error::InvalidInput("role id must not be empty".into()));
        }
        let violations = self.validate_combination(
            role.permissions
                .iter()
                .map(String::as_str)
                .filter(|atom| *atom != WILDCARD_PERMISSION),
        );
        if !violations.is_empty() {
            return Err(Error::InvalidInput(format!(
                "role `{}` is invalid: {}",
                role.role_id,
                join_violations(&violations)
            )));
        }

        self.roles.insert(role.role_id.clone(), role);
        Ok(())
    }

    pub fn atom(&self, atom_id: &str) -> Option<&PermissionAtom> {
        self.atoms.get(atom_id)
    }

    pub fn atoms(&self) -> impl Iterator<Item = &PermissionAtom> {
        self.atoms.values()
    }

    pub fn role(&self, role_id: &str) -> Option<&AdminRole> {
        self.roles.get(role_id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &AdminRole> {
        self.roles.values()
    }

    /// Whether `a` and `b` may not be held together, in either direction.
    pub fn conflicts(&self, a: &str, b: &str) -> bool {
        let declares = |from: &str, to: &str| {
            self.atoms
                .get(from)
                .is_some_and(|atom| atom.conflicts_with.contains(to))
        };
        declares(a, b) || declares(b, a)
    }

    /// Every constraint the given set of atoms breaks, in a stable order.
    pub fn validate_combination<'a>(
        &self,
        atom_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<PermissionViolation> {
        let requested: BTreeSet<&str> = atom_ids.into_iter().collect();
        let mut violations = BTreeSet::new();

        for &id in &requested {
            let Some(atom) = self.atoms.get(id) else {
                violations.insert(PermissionViolation::UnknownAtom {
                    atom: id.to_string(),
                });
                continue;
            };

            for required in &atom.requires_all {
                if !requested.contains(required.as_str()) {
                    violations.insert(PermissionViolation::MissingRequirement {
                        atom: id.to_string(),
                        required: required.clone(),
                    });
                }
            }
        }

        for &a in &requested {
            for &b in requested.range::<&str, _>((Bound::Excluded(a), Bound::Unbounded)) {
                if self.conflicts(a, b) {
                    violations.insert(PermissionViolation::Conflict {
                        atom: a.to_string(),
                        other: b.to_string(),
                    });
                }
            }
        }

        violations.into_iter().collect()
    }

    /// Atoms `user` may exercise right now.
    pub fn effective_permissions(&self, user: &AdminUser) -> EffectivePermissions {
        if user.status != AdminStatus::Active {
            return EffectivePermissions::none();
        }
        if has_level_bypass(user) {
            return EffectivePermissions::All;
        }

        let mut granted: BTreeSet<String> = self
            .roles
            .get(&user.role_id)
            .filter(|role| role.is_active)
            .map(|role| role.permissions.clone())
            .unwrap_or_default();
        granted.extend(user.custom_permissions.iter().cloned());

        if grants_wildcard(&granted) {
            EffectivePermissions::All
        } else {
            EffectivePermissions::Atoms(granted)
        }
    }

    pub fn has_permission(&self, user: &AdminUser, atom_id: &str) -> bool {
        self.effective_permissions(user).contains(atom_id)
    }

    /// `Ok` when `user` holds `atom_id`, otherwise `PermissionDenied` with the reason.
    pub fn authorize(&self, user: &AdminUser, atom_id: &str) -> Result<()> {
        if self.has_permission(user, atom_id) {
            return Ok(());
        }

        let reason = match user.status {
            AdminStatus::Active => format!("admin `{}` lacks `{atom_id}`", user.username),
            AdminStatus::Suspended => format!("admin `{}` is suspended", user.username),
            AdminStatus::Inactive => format!("admin `{}` is inactive", user.username),
        };
        tracing::debug!(admin = %user.admin_id, atom = atom_id, "Permission denied");
        Err(Error::PermissionDenied(reason))
    }
}

/// Human-readable list of violations, `; `-separated.
pub fn join_violations(violations: &[PermissionViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
