//! Error types for charterops.
//!
//! Workflow failures are reported through a small closed taxonomy
//! (validation, not found, invalid transition, scheduling conflict,
//! dependency failure). Infrastructure failures (database, configuration,
//! I/O) sit alongside them in the same enum.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single offending input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the field, as the caller spelled it.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Create a new field error.
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every invalid field found while checking one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    /// Record an invalid field.
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// Whether no invalid field was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the given field was reported.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// Turn the collected errors into a result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if at least one field was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { fields: self })
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// The main error type for charterops operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Workflow Errors ===
    /// Input was malformed or incomplete. Raised before any write.
    #[error("validation failed: {fields}")]
    Validation {
        /// All offending fields.
        fields: FieldErrors,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (request, plan, aircraft, ...).
        entity: &'static str,
        /// The unknown id.
        id: String,
    },

    /// The entity is not in a status that allows the requested transition.
    #[error("cannot move {entity} {id} from {from} to {to}")]
    InvalidStateTransition {
        /// Kind of entity.
        entity: &'static str,
        /// Entity id.
        id: String,
        /// Status found in the store.
        from: String,
        /// Status the caller asked for.
        to: String,
    },

    /// The aircraft is already booked for an overlapping window.
    #[error("aircraft {aircraft_id} is already booked by plan {conflicting_plan_id}")]
    SchedulingConflict {
        /// Aircraft being double-booked.
        aircraft_id: String,
        /// Active plan whose window collides.
        conflicting_plan_id: String,
    },

    /// A downstream collaborator failed.
    #[error("{dependency} failed: {message}")]
    DependencyFailure {
        /// Name of the collaborator.
        dependency: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An internal error occurred (bug or corrupt row).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for charterops operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a validation error for a single field.
    #[must_use]
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::default();
        fields.push(field, message);
        Self::Validation { fields }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an invalid transition error.
    #[must_use]
    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a dependency failure error.
    #[must_use]
    pub fn dependency(dependency: &'static str, message: impl Into<String>) -> Self {
        Self::DependencyFailure {
            dependency,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable name of the error kind, for callers that surface it.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::SchedulingConflict { .. } => "scheduling_conflict",
            Self::DependencyFailure { .. } => "dependency_failure",
            Self::ConfigLoad(_) | Self::ConfigValidation { .. } => "configuration_error",
            Self::DatabaseOpen { .. }
            | Self::DatabaseQuery(_)
            | Self::DatabaseMigration { .. }
            | Self::DirectoryCreate { .. }
            | Self::Internal(_) => "internal_error",
        }
    }

    /// Offending fields, if this is a validation error.
    #[must_use]
    pub fn fields(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation { fields } => Some(fields),
            _ => None,
        }
    }

    /// Check if this error is a validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an invalid state transition.
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidStateTransition { .. })
    }

    /// Check if this error is a scheduling conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SchedulingConflict { .. })
    }

    /// Check if this error is a dependency failure.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::DependencyFailure { .. })
    }
}
