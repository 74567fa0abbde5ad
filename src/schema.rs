/// Lite-field schemas.
///
/// Every document class with dual storage declares a [`LiteSchema`]: which
/// fields carry an index, which composite indexes exist, and which unindexed
/// fields are still permitted in filter predicates. From that declaration the
/// extractor derives the *lite set*: the only fields materialized in the
/// indexed document store. The complete record always lives in the KV.
///
/// The source system derived this set by reflecting over class annotations at
/// runtime; here it is a compile-time declaration attached to each class
/// (see `models`), which makes the derivation total and checkable.
use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde_json::{Map, Value as JsonValue};

/// Fields every lite record carries regardless of class declarations.
pub const SYSTEM_FIELDS: &[&str] = &["id", "created_at", "updated_at", "revision_id"];

/// Soft-delete markers, included when the class declares support.
pub const SOFT_DELETE_FIELDS: &[&str] = &["deleted_at", "deleted_by", "deleted_id"];

/// Compile-time lite-schema declaration for one document class.
#[derive(Debug)]
pub struct LiteSchema {
    /// Logical collection name (base name, no tenant suffix).
    pub class_name: &'static str,
    /// Directly indexed fields.
    pub indexed: &'static [&'static str],
    /// Composite index declarations; every referenced field joins the lite set.
    pub composite_indexes: &'static [&'static [&'static str]],
    /// Unique composite constraints (subset semantics of `composite_indexes`).
    pub unique_indexes: &'static [&'static [&'static str]],
    /// Unindexed fields still allowed in filter predicates.
    pub query_fields: &'static [&'static str],
    /// Whether the class supports soft deletion.
    pub soft_delete: bool,
    /// Lazily computed union (see [`LiteSchema::field_set`]).
    field_set: OnceLock<BTreeSet<&'static str>>,
}

impl LiteSchema {
    /// Declare a schema. `field_set` is computed on first use.
    pub const fn new(
        class_name: &'static str,
        indexed: &'static [&'static str],
        composite_indexes: &'static [&'static [&'static str]],
        unique_indexes: &'static [&'static [&'static str]],
        query_fields: &'static [&'static str],
        soft_delete: bool,
    ) -> Self {
        Self {
            class_name,
            indexed,
            composite_indexes,
            unique_indexes,
            query_fields,
            soft_delete,
            field_set: OnceLock::new(),
        }
    }

    /// The full lite set: system fields ∪ soft-delete fields (if declared)
    /// ∪ indexed fields ∪ composite-index fields ∪ query fields.
    pub fn field_set(&self) -> &BTreeSet<&'static str> {
        self.field_set.get_or_init(|| {
            let mut set: BTreeSet<&'static str> = SYSTEM_FIELDS.iter().copied().collect();
            if self.soft_delete {
                set.extend(SOFT_DELETE_FIELDS.iter().copied());
            }
            set.extend(self.indexed.iter().copied());
            for index in self.composite_indexes {
                set.extend(index.iter().copied());
            }
            for index in self.unique_indexes {
                set.extend(index.iter().copied());
            }
            set.extend(self.query_fields.iter().copied());
            set
        })
    }

    /// Whether `field` may appear in a filter predicate for this class.
    pub fn allows_field(&self, field: &str) -> bool {
        self.field_set().contains(field)
    }
}

/// Project a serialized document onto the lite set.
///
/// Returns a mapping limited to the lite field names; fields absent from the
/// document are simply omitted. The input must be a JSON object (every
/// document class serializes to one).
pub fn extract_lite_data(document: &JsonValue, fields: &BTreeSet<&'static str>) -> Map<String, JsonValue> {
    let mut lite = Map::new();
    if let JsonValue::Object(full) = document {
        for (key, value) in full {
            if fields.contains(key.as_str()) && !value.is_null() {
                lite.insert(key.clone(), value.clone());
            }
        }
    }
    lite
}
