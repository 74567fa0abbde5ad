/// Error types for Engram operations.
///
/// This module provides the error hierarchy for the dual-storage core. All
/// errors are well-typed and can be pattern-matched for precise handling.
///
/// Propagation policy: query-validation and configuration errors are fatal to
/// the call and never masked. Transport failures against a non-authoritative
/// store are logged with context and translated to benign returns (absent
/// values, `false`, empty lists) at the proxy boundary, so a transient outage
/// does not cascade into the business layer.
use thiserror::Error;

/// The main error type for Engram operations.
///
/// All fallible operations in Engram return `Result<T, EngramError>`.
#[derive(Error, Debug)]
pub enum EngramError {
    /// A query referenced fields that are not part of the class's lite set.
    ///
    /// Lite-mode collections only materialize indexed fields plus declared
    /// query fields; filtering on anything else would silently match nothing.
    #[error(
        "query on '{class_name}' references non-lite fields {fields:?}; \
         either declare the field as indexed on the class, or add it to the \
         class's query_fields"
    )]
    LiteStorageQuery {
        /// The document class whose query was rejected
        class_name: String,
        /// Every offending field found in the filter tree
        fields: Vec<String>,
    },

    /// An enumerated field carried a value outside its allowed set.
    #[error("invalid value '{value}' for field '{field}' of '{class_name}': allowed {allowed:?}")]
    InvalidFieldValue {
        /// The document class being validated
        class_name: String,
        /// The enumerated field
        field: String,
        /// The rejected value
        value: String,
        /// The allowed value set
        allowed: Vec<String>,
    },

    /// Unique-constraint violation on insert.
    ///
    /// Upsert paths catch this and translate it into a find-and-update.
    #[error("duplicate key '{key}' for '{class_name}'")]
    DuplicateKey {
        /// The document class with the unique constraint
        class_name: String,
        /// The composite key that collided
        key: String,
    },

    /// Serialization error when converting data to/from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A backing store (KV, document store, index, cache) was unreachable
    /// or timed out.
    #[error("transport error against {backend}: {reason}")]
    Transport {
        /// Which backing store failed
        backend: String,
        /// Description of the failure
        reason: String,
    },

    /// Fatal configuration problem detected at startup.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Description of what is missing or malformed
        reason: String,
    },

    /// Generic storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for Engram operations.
pub type EngramResult<T> = Result<T, EngramError>;
