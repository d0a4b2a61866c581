//! Fixed mapping between logical entities, local tables and remote tables.
//!
//! The mapping is compiled in. Nothing registers tables at runtime; the
//! registry is built once at startup and shared read-only.

use crate::error::{SyncError, SyncResult};
use std::collections::HashSet;

/// Processing tier. Passes visit tiers in declaration order so that parent
/// entities (patients) land locally before their dependents (encounters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncTier {
    /// Identity tables every other table refers to.
    Core,
    /// Clinical data hanging off core entities.
    Clinical,
    /// Everything else.
    Peripheral,
}

/// One `{ local, remote }` pair plus scheduling metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMapping {
    /// Logical entity name used by application code (e.g. `patient`).
    pub entity: &'static str,
    /// Table name in the local store.
    pub local: &'static str,
    /// Table name in the remote store.
    pub remote: &'static str,
    pub tier: SyncTier,
    /// Re-synced on the short critical timer in addition to full passes.
    pub critical: bool,
}

impl TableMapping {
    pub const fn new(
        entity: &'static str,
        local: &'static str,
        remote: &'static str,
        tier: SyncTier,
        critical: bool,
    ) -> Self {
        Self {
            entity,
            local,
            remote,
            tier,
            critical,
        }
    }
}

/// The build-time table mapping, in priority order within each tier.
pub const TABLE_MAPPINGS: &[TableMapping] = &[
    TableMapping::new("user", "users", "users", SyncTier::Core, false),
    TableMapping::new("facility", "facilities", "facilities", SyncTier::Core, false),
    TableMapping::new("patient", "patients", "patients", SyncTier::Core, false),
    TableMapping::new("encounter", "encounters", "encounters", SyncTier::Clinical, false),
    TableMapping::new("vital_sign", "vital_signs", "vitals", SyncTier::Clinical, true),
    TableMapping::new("assessment", "assessments", "assessments", SyncTier::Clinical, true),
    TableMapping::new("medication", "medications", "medications", SyncTier::Clinical, false),
    TableMapping::new(
        "medication_administration",
        "medication_administrations",
        "med_administrations",
        SyncTier::Clinical,
        true,
    ),
    TableMapping::new("allergy", "allergies", "allergies", SyncTier::Clinical, false),
    TableMapping::new("lab_result", "lab_results", "lab_results", SyncTier::Clinical, false),
    TableMapping::new("clinical_note", "clinical_notes", "notes", SyncTier::Clinical, false),
    TableMapping::new("order", "orders", "orders", SyncTier::Clinical, false),
    TableMapping::new("care_plan", "care_plans", "care_plans", SyncTier::Clinical, false),
    TableMapping::new("appointment", "appointments", "appointments", SyncTier::Peripheral, false),
    TableMapping::new("task", "tasks", "tasks", SyncTier::Peripheral, false),
    TableMapping::new("document", "documents", "documents", SyncTier::Peripheral, false),
    TableMapping::new("setting", "settings", "user_settings", SyncTier::Peripheral, false),
    TableMapping::new("audit_log", "audit_logs", "audit_logs", SyncTier::Peripheral, false),
];

/// Which tables a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    /// Every mapped table.
    Full,
    /// Only tables flagged critical.
    Critical,
}

/// Lookup over the fixed table mapping.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    /// Stored in processing order.
    mappings: Vec<TableMapping>,
}

impl TableRegistry {
    /// The compiled-in registry.
    #[must_use]
    pub fn builtin() -> Self {
        Self::ordered(TABLE_MAPPINGS.to_vec())
    }

    /// Builds a registry from an explicit mapping list (tests, embedded
    /// deployments with a reduced schema). Local, remote and entity names
    /// must each be unique.
    pub fn from_mappings(mappings: Vec<TableMapping>) -> SyncResult<Self> {
        let mut locals = HashSet::new();
        let mut remotes = HashSet::new();
        let mut entities = HashSet::new();
        for m in &mappings {
            if m.local.is_empty() || m.remote.is_empty() {
                return Err(SyncError::Config(format!(
                    "empty table name in mapping for {}",
                    m.entity
                )));
            }
            if !locals.insert(m.local) {
                return Err(SyncError::Config(format!("duplicate local table {}", m.local)));
            }
            if !remotes.insert(m.remote) {
                return Err(SyncError::Config(format!("duplicate remote table {}", m.remote)));
            }
            if !entities.insert(m.entity) {
                return Err(SyncError::Config(format!("duplicate entity {}", m.entity)));
            }
        }
        Ok(Self::ordered(mappings))
    }

    fn ordered(mut mappings: Vec<TableMapping>) -> Self {
        // Stable: declaration order is kept within a tier.
        mappings.sort_by_key(|m| m.tier);
        Self { mappings }
    }

    /// Resolves a logical entity name (`patient`) or a local table name
    /// (`patients`) to its mapping.
    pub fn resolve(&self, name: &str) -> SyncResult<&TableMapping> {
        self.mappings
            .iter()
            .find(|m| m.entity == name || m.local == name)
            .ok_or_else(|| SyncError::UnknownTable(name.to_string()))
    }

    /// Remote table name for a local table.
    pub fn remote_name(&self, local: &str) -> SyncResult<&'static str> {
        self.mappings
            .iter()
            .find(|m| m.local == local)
            .map(|m| m.remote)
            .ok_or_else(|| SyncError::UnknownTable(local.to_string()))
    }

    /// Whether a local table participates in sync.
    #[must_use]
    pub fn contains(&self, local: &str) -> bool {
        self.mappings.iter().any(|m| m.local == local)
    }

    /// Whether a local table is flagged critical.
    #[must_use]
    pub fn is_critical(&self, local: &str) -> bool {
        self.mappings.iter().any(|m| m.local == local && m.critical)
    }

    /// All mappings in processing order.
    #[must_use]
    pub fn sync_order(&self) -> &[TableMapping] {
        &self.mappings
    }

    /// Critical mappings in processing order.
    pub fn critical_tables(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter().filter(|m| m.critical)
    }

    /// Mappings covered by a pass of the given scope, in processing order.
    #[must_use]
    pub fn tables_for(&self, scope: SyncScope) -> Vec<TableMapping> {
        match scope {
            SyncScope::Full => self.mappings.clone(),
            SyncScope::Critical => self.critical_tables().copied().collect(),
        }
    }

    /// Number of mapped tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
