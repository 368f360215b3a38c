//! The unified error type for the folio engine.

use std::fmt;

/// Machine-readable reason attached to a [`FolioError::Migration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationFault {
    /// The registry has no migration starting at version 0.
    MissingStart,
    /// Two consecutive migrations do not connect (`to` of one != `from` of next).
    GapInChain,
    /// Two migrations share the same `from` version.
    DuplicateFrom,
    /// A migration's `to` is not `from + 1`.
    InvalidIncrement,
    /// The last migration's `to` does not equal the configured version.
    VersionMismatch,
    /// The configured version is > 0 but the registry is empty.
    EmptyRegistry,
    /// The on-disk file carries a version newer than the configured one.
    VersionAhead,
    /// A migration transform returned an error.
    TransformFailed,
    /// An entity failed schema validation after the last migration ran.
    PostMigrationValidationFailed,
}

impl MigrationFault {
    /// The stable kebab-case discriminator for this fault.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingStart => "missing-start",
            Self::GapInChain => "gap-in-chain",
            Self::DuplicateFrom => "duplicate-from",
            Self::InvalidIncrement => "invalid-increment",
            Self::VersionMismatch => "version-mismatch",
            Self::EmptyRegistry => "empty-registry",
            Self::VersionAhead => "version-ahead",
            Self::TransformFailed => "transform-failed",
            Self::PostMigrationValidationFailed => "post-migration-validation-failed",
        }
    }
}

impl fmt::Display for MigrationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a [`FolioError::Plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFault {
    /// An operator is missing its `evaluate` function or has an empty name.
    InvalidOperator,
    /// A codec is missing `encode` or `decode`.
    InvalidCodec,
    /// A declared dependency does not resolve to a registered plugin.
    MissingDependencies,
    /// An operator name collides with a built-in or another plugin's operator.
    OperatorConflict,
    /// A collection references an id generator no plugin provides.
    MissingIdGenerator,
    /// The plugin itself is malformed (e.g. empty name).
    InvalidPluginShape,
}

impl PluginFault {
    /// The stable snake_case discriminator for this fault.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidOperator => "invalid_operator",
            Self::InvalidCodec => "invalid_codec",
            Self::MissingDependencies => "missing_dependencies",
            Self::OperatorConflict => "operator_conflict",
            Self::MissingIdGenerator => "missing_id_generator",
            Self::InvalidPluginShape => "invalid_plugin_shape",
        }
    }
}

impl fmt::Display for PluginFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur anywhere in the folio engine.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// Schema validation or operator/type mismatch.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Update or delete of an id that does not exist.
    #[error("{collection}: no entity with id {id:?}")]
    NotFound {
        /// The collection that was searched.
        collection: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Explicit id already present, or a unique-index violation.
    #[error("duplicate key in {collection}: {detail}")]
    DuplicateKey {
        /// The collection holding the conflicting entry.
        collection: String,
        /// What collided (id or index key description).
        detail: String,
    },

    /// A referenced id is missing, or cascade=restrict blocked a delete.
    #[error("foreign key violation: {message}")]
    ForeignKey {
        /// Description of the violated reference.
        message: String,
    },

    /// Internal precondition broken, or a hook failed in an unexpected way.
    #[error("operation error: {0}")]
    Operation(String),

    /// Any error re-thrown from a transaction body after rollback.
    #[error("transaction rolled back: {source}")]
    Transaction {
        /// The error that aborted the transaction.
        #[source]
        source: Box<FolioError>,
    },

    /// A populated reference whose target id does not exist.
    #[error("dangling reference: {collection}.{field} -> {target_id:?}")]
    DanglingReference {
        /// The collection owning the ref field.
        collection: String,
        /// The foreign-key field.
        field: String,
        /// The missing target id.
        target_id: String,
    },

    /// Schema-version migration failed during load.
    #[error("migration error ({reason}) in {collection}: {detail}")]
    Migration {
        /// The collection being migrated.
        collection: String,
        /// The stable fault discriminator.
        reason: MigrationFault,
        /// Index of the failing migration step, or -1 for
        /// post-migration validation.
        step: i32,
        /// Human-readable detail.
        detail: String,
    },

    /// Plugin validation or installation failed.
    #[error("plugin error ({reason}) in {plugin:?}: {detail}")]
    Plugin {
        /// The offending plugin's name.
        plugin: String,
        /// The stable fault discriminator.
        reason: PluginFault,
        /// Human-readable detail.
        detail: String,
    },

    /// A codec's encode or decode failed.
    #[error("serialization error ({format}): {message}")]
    Serialization {
        /// The codec name or extension involved.
        format: String,
        /// Underlying error description.
        message: String,
    },

    /// No codec is registered for the requested extension.
    #[error("unsupported format: no codec registered for extension {extension:?}")]
    UnsupportedFormat {
        /// The lower-cased extension that was looked up.
        extension: String,
    },

    /// An underlying I/O failure from the storage adapter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the folio crates.
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`FolioError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a [`FolioError::NotFound`] for the given collection and id.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a [`FolioError::DuplicateKey`].
    pub fn duplicate_key(collection: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DuplicateKey {
            collection: collection.into(),
            detail: detail.into(),
        }
    }

    /// Creates a [`FolioError::ForeignKey`] with the given message.
    pub fn foreign_key(message: impl Into<String>) -> Self {
        Self::ForeignKey {
            message: message.into(),
        }
    }

    /// Creates a [`FolioError::Migration`].
    pub fn migration(
        collection: impl Into<String>,
        reason: MigrationFault,
        step: i32,
        detail: impl Into<String>,
    ) -> Self {
        Self::Migration {
            collection: collection.into(),
            reason,
            step,
            detail: detail.into(),
        }
    }

    /// Creates a [`FolioError::Plugin`].
    pub fn plugin(plugin: impl Into<String>, reason: PluginFault, detail: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            reason,
            detail: detail.into(),
        }
    }

    /// Creates a [`FolioError::Serialization`].
    pub fn serialization(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Wraps an error that aborted a transaction body.
    pub fn transaction(source: FolioError) -> Self {
        Self::Transaction {
            source: Box::new(source),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`FolioError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a [`FolioError::DuplicateKey`].
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns the migration fault, if this is a migration error.
    pub fn migration_fault(&self) -> Option<MigrationFault> {
        match self {
            Self::Migration { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns the plugin fault, if this is a plugin error.
    pub fn plugin_fault(&self) -> Option<PluginFault> {
        match self {
            Self::Plugin { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
