//! Built-in atoms and roles of the platform.

use crate::models::{AdminRole, PermissionAtom, RiskLevel, WILDCARD_PERMISSION};

use super::PermissionCatalog;

struct AtomEntry {
    id: &'static str,
    name: &'static str,
    risk: RiskLevel,
    requires: &'static [&'static str],
    conflicts: &'static [&'static str],
}

const fn entry(id: &'static str, name: &'static str, risk: RiskLevel) -> AtomEntry {
    AtomEntry {
        id,
        name,
        risk,
        requires: &[],
        conflicts: &[],
    }
}

const ATOMS: &[AtomEntry] = &[
    entry("users:read", "View members", RiskLevel::Low),
    AtomEntry {
        requires: &["users:read"],
        ..entry("users:update", "Edit members", RiskLevel::Medium)
    },
    AtomEntry {
        requires: &["users:read"],
        ..entry("users:suspend", "Suspend members", RiskLevel::High)
    },
    AtomEntry {
        requires: &["users:read"],
        ..entry("users:delete", "Delete members", RiskLevel::Critical)
    },
    entry("events:read", "View events", RiskLevel::Low),
    AtomEntry {
        requires: &["events:read"],
        ..entry("events:create", "Create events", RiskLevel::Medium)
    },
    AtomEntry {
        requires: &["events:read"],
        ..entry("events:update", "Edit events", RiskLevel::Medium)
    },
    AtomEntry {
        requires: &["events:read"],
        ..entry("events:delete", "Delete events", RiskLevel::High)
    },
    entry("bookings:read", "View bookings", RiskLevel::Low),
    AtomEntry {
        requires: &["bookings:read"],
        ..entry("bookings:update", "Edit bookings", RiskLevel::Medium)
    },
    AtomEntry {
        requires: &["bookings:read", "payments:read"],
        ..entry("bookings:refund", "Refund bookings", RiskLevel::High)
    },
    entry("payments:read", "View payments", RiskLevel::Medium),
    AtomEntry {
        requires: &["payments:read"],
        conflicts: &["payments:audit"],
        ..entry("payments:refund", "Issue refunds", RiskLevel::Critical)
    },
    AtomEntry {
        requires: &["payments:read"],
        ..entry("payments:audit", "Audit payments", RiskLevel::High)
    },
    entry("admin:permissions", "Manage admin permissions", RiskLevel::Critical),
    entry("admin:roles", "Manage admin roles", RiskLevel::Critical),
];

impl PermissionCatalog {
    /// Catalog with the platform's built-in atoms and roles.
    pub fn platform_default() -> Self {
        let mut catalog = Self::new();
        for atom in ATOMS.iter().filter_map(build_atom) {
            catalog.atoms.insert(atom.atom_id.clone(), atom);
        }
        for role in default_roles() {
            catalog.roles.insert(role.role_id.clone(), role);
        }
        catalog
    }
}

fn build_atom(entry: &AtomEntry) -> Option<PermissionAtom> {
    Some(
        PermissionAtom::new(entry.id, entry.name, entry.risk)?
            .requiring(entry.requires.iter().copied())
            .conflicting_with(entry.conflicts.iter().copied()),
    )
}

fn default_roles() -> Vec<AdminRole> {
    vec![
        AdminRole::new("super_admin", "Super admin", "executive", [WILDCARD_PERMISSION]),
        AdminRole::new(
            "event_manager",
            "Event manager",
            "events",
            [
                "events:read",
                "events:create",
                "events:update",
                "events:delete",
                "bookings:read",
                "users:read",
            ],
        ),
        AdminRole::new(
            "customer_support",
            "Customer support",
            "support",
            [
                "users:read",
                "users:update",
                "events:read",
                "bookings:read",
                "bookings:update",
            ],
        ),
        AdminRole::new(
            "finance",
            "Finance",
            "finance",
            [
                "payments:read",
                "payments:refund",
                "bookings:read",
                "bookings:refund",
            ],
        ),
    ]
}
