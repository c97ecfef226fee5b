//! Static entity classification: which database each entity kind lives in.

use crate::error::TenancyError;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Stored once, in the central database.
    Shared,
    /// Stored in each tenant's own database.
    TenantScoped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityKind {
    pub name: &'static str,
    pub table: &'static str,
    pub classification: Classification,
}

const fn shared(name: &'static str, table: &'static str) -> EntityKind {
    EntityKind {
        name,
        table,
        classification: Classification::Shared,
    }
}

const fn scoped(name: &'static str, table: &'static str) -> EntityKind {
    EntityKind {
        name,
        table,
        classification: Classification::TenantScoped,
    }
}

pub static ENTITY_KINDS: &[EntityKind] = &[
    shared("Account", "accounts"),
    shared("Tenant", "_sys_tenants"),
    shared("SystemConfiguration", "system_configuration"),
    scoped("Department", "departments"),
    scoped("StaffMember", "staff_members"),
    scoped("Patient", "patients"),
    scoped("MedicalRecord", "medical_records"),
    scoped("Appointment", "appointments"),
    scoped("Invoice", "invoices"),
    scoped("Payment", "payments"),
    scoped("PharmacyItem", "pharmacy_items"),
    scoped("Prescription", "prescriptions"),
    scoped("LabOrder", "lab_orders"),
    scoped("LabResult", "lab_results"),
    scoped("Notification", "notifications"),
    scoped("AuditEntry", "_sys_audit_log"),
];

/// Tenant-scoped → shared references that are allowed to cross databases.
pub static CROSS_DATABASE_RELATIONS: &[(&str, &str)] = &[
    ("StaffMember", "Account"),
    ("AuditEntry", "Account"),
    ("Notification", "Account"),
];

/// Unknown kinds are an error, never a default bucket.
pub fn entity_kind(name: &str) -> Result<&'static EntityKind, TenancyError> {
    ENTITY_KINDS
        .iter()
        .find(|k| k.name == name)
        .ok_or_else(|| TenancyError::UnknownEntityKind(name.to_string()))
}

pub fn classify(name: &str) -> Result<Classification, TenancyError> {
    entity_kind(name).map(|k| k.classification)
}

pub fn is_whitelisted_relation(a: &str, b: &str) -> bool {
    CROSS_DATABASE_RELATIONS
        .iter()
        .any(|&(from, to)| (from == a && to == b) || (from == b && to == a))
}
