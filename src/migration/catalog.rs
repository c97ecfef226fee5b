//! The schema every tenant database is brought to.

use super::drift::LegacyArtifact;
use super::{Migration, ModuleMigrations, Operation};
use crate::classification::{self, Classification};
use crate::error::ConfigError;
use std::collections::HashSet;

/// Module name under which bootstrap migrations are recorded.
pub const BOOTSTRAP_MODULE: &str = "_sys";

/// Low-level tables every tenant database carries regardless of domain modules. The first
/// migration creates the bookkeeping table itself.
pub static BOOTSTRAP: &[Migration] = &[
    Migration {
        name: "0001_migration_records",
        operations: &[Operation::CreateTable {
            table: "_sys_migrations",
            columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                      module TEXT NOT NULL, \
                      name TEXT NOT NULL, \
                      applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                      UNIQUE (module, name)",
        }],
    },
    Migration {
        name: "0002_content_types",
        operations: &[Operation::CreateTable {
            table: "_sys_content_types",
            columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                      module TEXT NOT NULL, \
                      entity TEXT NOT NULL, \
                      UNIQUE (module, entity)",
        }],
    },
    Migration {
        name: "0003_kv_data",
        operations: &[Operation::CreateTable {
            table: "_sys_kv_data",
            columns: "namespace TEXT NOT NULL, \
                      key TEXT NOT NULL, \
                      value TEXT NOT NULL, \
                      updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                      PRIMARY KEY (namespace, key)",
        }],
    },
    Migration {
        name: "0004_audit_log",
        operations: &[
            Operation::CreateTable {
                table: "_sys_audit_log",
                columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                          account_id TEXT, \
                          action TEXT NOT NULL, \
                          entity TEXT NOT NULL, \
                          entity_id TEXT, \
                          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
            },
            Operation::CreateIndex {
                name: "_sys_audit_log_created_idx",
                table: "_sys_audit_log",
                columns: &["created_at"],
                unique: false,
            },
        ],
    },
];

pub static CLINIC_MODULES: &[ModuleMigrations] = &[
    ModuleMigrations {
        module: "staff",
        entities: &["Department", "StaffMember"],
        migrations: &[Migration {
            name: "0001_initial",
            operations: &[
                Operation::CreateTable {
                    table: "departments",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              name TEXT NOT NULL UNIQUE, \
                              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateTable {
                    table: "staff_members",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              account_id TEXT NOT NULL, \
                              department_id INTEGER REFERENCES departments (id), \
                              role TEXT NOT NULL, \
                              active INTEGER NOT NULL DEFAULT 1, \
                              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateIndex {
                    name: "staff_members_account_idx",
                    table: "staff_members",
                    columns: &["account_id"],
                    unique: true,
                },
            ],
        }],
    },
    ModuleMigrations {
        module: "patients",
        entities: &["Patient", "MedicalRecord"],
        migrations: &[
            Migration {
                name: "0001_initial",
                operations: &[
                    Operation::CreateTable {
                        table: "patients",
                        columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                                  mrn TEXT NOT NULL, \
                                  first_name TEXT NOT NULL, \
                                  last_name TEXT NOT NULL, \
                                  date_of_birth TEXT, \
                                  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                    },
                    Operation::CreateIndex {
                        name: "patients_mrn_idx",
                        table: "patients",
                        columns: &["mrn"],
                        unique: true,
                    },
                ],
            },
            Migration {
                name: "0002_contact_details",
                operations: &[
                    Operation::AddColumn {
                        table: "patients",
                        column: "phone",
                        definition: "TEXT",
                    },
                    Operation::AddColumn {
                        table: "patients",
                        column: "email",
                        definition: "TEXT",
                    },
                    Operation::AddColumn {
                        table: "patients",
                        column: "national_id",
                        definition: "TEXT",
                    },
                    Operation::CreateIndex {
                        name: "patients_national_id_idx",
                        table: "patients",
                        columns: &["national_id"],
                        unique: false,
                    },
                ],
            },
            Migration {
                name: "0003_medical_records",
                operations: &[
                    Operation::CreateTable {
                        table: "medical_records",
                        columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                                  patient_id INTEGER NOT NULL REFERENCES patients (id), \
                                  author_staff_id INTEGER, \
                                  summary TEXT NOT NULL, \
                                  recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                    },
                    Operation::CreateIndex {
                        name: "medical_records_patient_idx",
                        table: "medical_records",
                        columns: &["patient_id"],
                        unique: false,
                    },
                ],
            },
        ],
    },
    ModuleMigrations {
        module: "appointments",
        entities: &["Appointment"],
        migrations: &[
            Migration {
                name: "0001_initial",
                operations: &[
                    Operation::CreateTable {
                        table: "appointments",
                        columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                                  patient_id INTEGER NOT NULL, \
                                  staff_id INTEGER, \
                                  starts_at TEXT, \
                                  ends_at TEXT, \
                                  status TEXT NOT NULL DEFAULT 'scheduled', \
                                  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                    },
                    Operation::CreateIndex {
                        name: "appointments_patient_idx",
                        table: "appointments",
                        columns: &["patient_id"],
                        unique: false,
                    },
                ],
            },
            Migration {
                name: "0002_schedule_window",
                operations: &[
                    Operation::AddColumn {
                        table: "appointments",
                        column: "starts_at",
                        definition: "TEXT",
                    },
                    Operation::AddColumn {
                        table: "appointments",
                        column: "ends_at",
                        definition: "TEXT",
                    },
                    Operation::AddColumn {
                        table: "appointments",
                        column: "status",
                        definition: "TEXT NOT NULL DEFAULT 'scheduled'",
                    },
                    Operation::CreateIndex {
                        name: "appointments_start_idx",
                        table: "appointments",
                        columns: &["starts_at"],
                        unique: false,
                    },
                ],
            },
        ],
    },
    ModuleMigrations {
        module: "billing",
        entities: &["Invoice", "Payment"],
        migrations: &[Migration {
            name: "0001_initial",
            operations: &[
                Operation::CreateTable {
                    table: "invoices",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              patient_id INTEGER NOT NULL, \
                              appointment_id INTEGER, \
                              total_cents INTEGER NOT NULL DEFAULT 0, \
                              currency TEXT NOT NULL DEFAULT 'USD', \
                              status TEXT NOT NULL DEFAULT 'draft', \
                              issued_at TEXT, \
                              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateTable {
                    table: "payments",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              invoice_id INTEGER NOT NULL REFERENCES invoices (id), \
                              amount_cents INTEGER NOT NULL, \
                              method TEXT NOT NULL, \
                              paid_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateIndex {
                    name: "invoices_patient_idx",
                    table: "invoices",
                    columns: &["patient_id"],
                    unique: false,
                },
                Operation::CreateIndex {
                    name: "payments_invoice_idx",
                    table: "payments",
                    columns: &["invoice_id"],
                    unique: false,
                },
            ],
        }],
    },
    ModuleMigrations {
        module: "pharmacy",
        entities: &["PharmacyItem", "Prescription"],
        migrations: &[Migration {
            name: "0001_initial",
            operations: &[
                Operation::CreateTable {
                    table: "pharmacy_items",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              sku TEXT NOT NULL, \
                              name TEXT NOT NULL, \
                              stock INTEGER NOT NULL DEFAULT 0, \
                              unit_price_cents INTEGER NOT NULL DEFAULT 0",
                },
                Operation::CreateIndex {
                    name: "pharmacy_items_sku_idx",
                    table: "pharmacy_items",
                    columns: &["sku"],
                    unique: true,
                },
                Operation::CreateTable {
                    table: "prescriptions",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              patient_id INTEGER NOT NULL, \
                              prescriber_staff_id INTEGER, \
                              item_id INTEGER REFERENCES pharmacy_items (id), \
                              dosage TEXT NOT NULL, \
                              quantity INTEGER NOT NULL DEFAULT 1, \
                              status TEXT NOT NULL DEFAULT 'pending', \
                              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateIndex {
                    name: "prescriptions_patient_idx",
                    table: "prescriptions",
                    columns: &["patient_id"],
                    unique: false,
                },
            ],
        }],
    },
    ModuleMigrations {
        module: "laboratory",
        entities: &["LabOrder", "LabResult"],
        migrations: &[Migration {
            name: "0001_initial",
            operations: &[
                Operation::CreateTable {
                    table: "lab_orders",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              patient_id INTEGER NOT NULL, \
                              ordered_by_staff_id INTEGER, \
                              test_code TEXT NOT NULL, \
                              status TEXT NOT NULL DEFAULT 'ordered', \
                              ordered_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateTable {
                    table: "lab_results",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              order_id INTEGER NOT NULL REFERENCES lab_orders (id), \
                              value TEXT, \
                              unit TEXT, \
                              reference_range TEXT, \
                              resulted_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateIndex {
                    name: "lab_orders_patient_idx",
                    table: "lab_orders",
                    columns: &["patient_id"],
                    unique: false,
                },
                Operation::CreateIndex {
                    name: "lab_results_order_idx",
                    table: "lab_results",
                    columns: &["order_id"],
                    unique: false,
                },
            ],
        }],
    },
    ModuleMigrations {
        module: "notifications",
        entities: &["Notification"],
        migrations: &[Migration {
            name: "0001_initial",
            operations: &[
                Operation::CreateTable {
                    table: "notifications",
                    columns: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                              account_id TEXT NOT NULL, \
                              channel TEXT NOT NULL, \
                              subject TEXT NOT NULL, \
                              body TEXT NOT NULL, \
                              sent_at TEXT, \
                              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                },
                Operation::CreateIndex {
                    name: "notifications_account_idx",
                    table: "notifications",
                    columns: &["account_id"],
                    unique: false,
                },
            ],
        }],
    },
];

/// Artifacts left behind by earlier schema versions, dropped before domain migrations run.
pub static LEGACY_ARTIFACTS: &[LegacyArtifact] = &[
    // v2 renamed the appointment start column; the old index kept its name.
    LegacyArtifact::index(2, "appointments_start_idx", "appointments", &["scheduled_at"]),
    LegacyArtifact::table(2, "patients_patient"),
    LegacyArtifact::table(3, "billing_invoice_old"),
];

#[derive(Clone, Debug)]
pub struct MigrationCatalog {
    pub bootstrap: &'static [Migration],
    pub modules: Vec<ModuleMigrations>,
    pub legacy: Vec<LegacyArtifact>,
}

impl MigrationCatalog {
    pub fn clinic() -> Self {
        MigrationCatalog {
            bootstrap: BOOTSTRAP,
            modules: CLINIC_MODULES.to_vec(),
            legacy: LEGACY_ARTIFACTS.to_vec(),
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleMigrations> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Module names unique, migration names unique per module, and every module only holds
    /// tenant-scoped entities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap.is_empty() {
            return Err(ConfigError::Catalog("bootstrap migrations are required".into()));
        }
        check_unique_names(BOOTSTRAP_MODULE, self.bootstrap)?;

        let mut modules = HashSet::new();
        for m in &self.modules {
            if m.module == BOOTSTRAP_MODULE || !modules.insert(m.module) {
                return Err(ConfigError::Catalog(format!("duplicate module name: {}", m.module)));
            }
            check_unique_names(m.module, m.migrations)?;
            for entity in m.entities {
                match classification::classify(entity) {
                    Ok(Classification::TenantScoped) => {}
                    Ok(Classification::Shared) => {
                        return Err(ConfigError::Catalog(format!(
                            "module {} declares shared entity {}",
                            m.module, entity
                        )))
                    }
                    Err(e) => return Err(ConfigError::Catalog(format!("module {}: {}", m.module, e))),
                }
            }
        }
        Ok(())
    }
}

fn check_unique_names(module: &str, migrations: &[Migration]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for migration in migrations {
        if !names.insert(migration.name) {
            return Err(ConfigError::Catalog(format!(
                "duplicate migration {} in module {}",
                migration.name, module
            )));
        }
    }
    Ok(())
}
