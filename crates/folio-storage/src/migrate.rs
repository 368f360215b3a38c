//! Schema-version migration runner.
//!
//! A migration registry for a collection is a set of single-step
//! migrations that must form a contiguous chain from version 0 to the
//! collection's configured version. The runner validates the chain,
//! applies the relevant suffix to a loaded entity map, and reports
//! dry-run plans.

use folio_core::config::Migration;
use folio_core::entity::EntityMap;
use folio_core::error::{FolioError, MigrationFault, Result};
use folio_core::schema::Schema;

/// Validates that `migrations` forms a contiguous chain `0 → version`.
///
/// Pure function; does not touch storage.
pub fn validate_registry(collection: &str, version: u32, migrations: &[Migration]) -> Result<()> {
    if migrations.is_empty() {
        if version > 0 {
            return Err(FolioError::migration(
                collection,
                MigrationFault::EmptyRegistry,
                -1,
                format!("configured version is {version} but no migrations are registered"),
            ));
        }
        return Ok(());
    }

    for m in migrations {
        if m.to != m.from + 1 {
            return Err(FolioError::migration(
                collection,
                MigrationFault::InvalidIncrement,
                -1,
                format!("migration {} -> {} must step by exactly one", m.from, m.to),
            ));
        }
    }

    let mut sorted: Vec<&Migration> = migrations.iter().collect();
    sorted.sort_by_key(|m| m.from);

    for pair in sorted.windows(2) {
        if pair[0].from == pair[1].from {
            return Err(FolioError::migration(
                collection,
                MigrationFault::DuplicateFrom,
                -1,
                format!("two migrations start at version {}", pair[0].from),
            ));
        }
    }

    if sorted[0].from != 0 {
        return Err(FolioError::migration(
            collection,
            MigrationFault::MissingStart,
            -1,
            format!("chain starts at {} instead of 0", sorted[0].from),
        ));
    }

    for pair in sorted.windows(2) {
        if pair[1].from != pair[0].to {
            return Err(FolioError::migration(
                collection,
                MigrationFault::GapInChain,
                -1,
                format!("no migration from version {}", pair[0].to),
            ));
        }
    }

    let last = sorted[sorted.len() - 1];
    if last.to != version {
        return Err(FolioError::migration(
            collection,
            MigrationFault::VersionMismatch,
            -1,
            format!("chain ends at {} but configured version is {version}", last.to),
        ));
    }

    Ok(())
}

/// The ascending sub-chain that upgrades `file_version` to `target`.
///
/// Assumes a registry already accepted by [`validate_registry`].
pub fn chain_for<'a>(
    migrations: &'a [Migration],
    file_version: u32,
    target: u32,
) -> Vec<&'a Migration> {
    let mut chain: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.from >= file_version && m.to <= target)
        .collect();
    chain.sort_by_key(|m| m.from);
    chain
}

/// Applies the migration chain to a loaded entity map, then validates every
/// resulting entity against the current schema.
///
/// On any failure the caller must leave the on-disk file untouched.
pub fn upgrade(
    collection: &str,
    mut entities: EntityMap,
    file_version: u32,
    target: u32,
    migrations: &[Migration],
    schema: &dyn Schema,
) -> Result<EntityMap> {
    let chain = chain_for(migrations, file_version, target);

    for (step, migration) in chain.iter().enumerate() {
        tracing::debug!(
            collection,
            from = migration.from,
            to = migration.to,
            "applying migration"
        );
        entities = (migration.transform)(entities).map_err(|reason| {
            FolioError::migration(
                collection,
                MigrationFault::TransformFailed,
                step as i32,
                format!("migration {} -> {}: {reason}", migration.from, migration.to),
            )
        })?;
    }

    for (id, entity) in &entities {
        if let Err(violations) = schema.validate(&entity.to_value()) {
            let detail: Vec<String> = violations
                .iter()
                .map(|v| format!("{}: {}", v.path, v.message))
                .collect();
            return Err(FolioError::migration(
                collection,
                MigrationFault::PostMigrationValidationFailed,
                -1,
                format!("entity {id:?}: {}", detail.join("; ")),
            ));
        }
    }

    Ok(entities)
}

// ---------------------------------------------------------------------------
// Dry-run reporting
// ---------------------------------------------------------------------------

/// Migration status of one collection's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// File version equals the configured version.
    UpToDate,
    /// File version is behind; the listed migrations would apply.
    NeedsMigration,
    /// The collection has no file on disk (or no file path configured).
    NoFile,
}

impl MigrationStatus {
    /// The stable kebab-case name for reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::NeedsMigration => "needs-migration",
            Self::NoFile => "no-file",
        }
    }
}

/// One step in a dry-run plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub from: u32,
    pub to: u32,
    pub description: Option<String>,
}

/// The dry-run report for one collection.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Collection name.
    pub name: String,
    /// The file the collection persists to, if any.
    pub file_path: Option<std::path::PathBuf>,
    /// Version found in the file (0 when the marker is missing).
    pub current_version: u32,
    /// Version the config demands.
    pub target_version: u32,
    /// Where the collection stands.
    pub status: MigrationStatus,
    /// Ordered migrations that would apply. Empty unless `NeedsMigration`.
    pub migrations_to_apply: Vec<PlannedStep>,
}

/// Builds the planned-step list for a `file_version → target` upgrade.
pub fn planned_steps(migrations: &[Migration], file_version: u32, target: u32) -> Vec<PlannedStep> {
    chain_for(migrations, file_version, target)
        .into_iter()
        .map(|m| PlannedStep {
            from: m.from,
            to: m.to,
            description: m.description.clone(),
        })
        .collect()
}
