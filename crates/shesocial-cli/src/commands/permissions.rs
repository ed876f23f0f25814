use std::collections::BTreeSet;

use shesocial_core::models::{AdminLevel, AdminStatus, AdminUser, PermissionAtom, RiskLevel};
use shesocial_core::permissions::{join_violations, PermissionCatalog, PermissionViolation};

use crate::commands::common::print_json;
use crate::error::CliError;

pub fn run_atoms(as_json: bool) -> Result<(), CliError> {
    let catalog = PermissionCatalog::platform_default();
    let atoms = catalog.atoms().collect::<Vec<_>>();
    if as_json {
        return print_json(&atoms);
    }
    for atom in atoms {
        println!("{}", format_atom_line(atom));
    }
    Ok(())
}

pub fn run_roles(as_json: bool) -> Result<(), CliError> {
    let catalog = PermissionCatalog::platform_default();
    let roles = catalog.roles().collect::<Vec<_>>();
    if as_json {
        return print_json(&roles);
    }
    for role in roles {
        let permissions = role.permissions.iter().cloned().collect::<Vec<_>>().join(", ");
        println!("{:<18} {:<12} {permissions}", role.role_id, role.department);
    }
    Ok(())
}

pub fn validate_atoms(atoms: &[String]) -> Vec<PermissionViolation> {
    PermissionCatalog::platform_default().validate_combination(atoms.iter().map(String::as_str))
}

pub fn run_validate(atoms: &[String]) -> Result<(), CliError> {
    let violations = validate_atoms(atoms);
    if violations.is_empty() {
        println!("OK: {} atom(s) form a valid combination", atoms.len());
        return Ok(());
    }
    for violation in &violations {
        println!("- {violation}");
    }
    Err(shesocial_core::Error::InvalidInput(join_violations(&violations)).into())
}

/// Evaluate an ad-hoc admin profile against the built-in catalog.
pub fn check_permission(
    atom: &str,
    role_id: &str,
    level: AdminLevel,
    custom: &[String],
) -> Result<(), CliError> {
    let catalog = PermissionCatalog::platform_default();
    if catalog.role(role_id).is_none() {
        return Err(shesocial_core::Error::InvalidInput(format!("unknown role `{role_id}`")).into());
    }
    let admin = AdminUser {
        admin_id: "cli".to_string(),
        username: "cli".to_string(),
        email: String::new(),
        password_hash: String::new(),
        role_id: role_id.to_string(),
        custom_permissions: custom
            .iter()
            .map(|atom| atom.trim().to_string())
            .filter(|atom| !atom.is_empty())
            .collect::<BTreeSet<_>>(),
        level,
        status: AdminStatus::Active,
    };
    Ok(catalog.authorize(&admin, atom)?)
}

pub fn run_check(
    atom: &str,
    role_id: &str,
    level: AdminLevel,
    custom: &[String],
) -> Result<(), CliError> {
    check_permission(atom, role_id, level, custom)?;
    println!("granted: {role_id} may use `{atom}`");
    Ok(())
}

pub fn format_atom_line(atom: &PermissionAtom) -> String {
    let mut line = format!(
        "{:<20} {:<8} {}",
        atom.atom_id,
        risk_label(atom.risk_level),
        atom.name
    );
    if !atom.requires_all.is_empty() {
        let requires = atom.requires_all.iter().cloned().collect::<Vec<_>>().join(",");
        line.push_str(&format!("  requires={requires}"));
    }
    if !atom.conflicts_with.is_empty() {
        let conflicts = atom.conflicts_with.iter().cloned().collect::<Vec<_>>().join(",");
        line.push_str(&format!("  conflicts={conflicts}"));
    }
    line
}

const fn risk_label(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
}
