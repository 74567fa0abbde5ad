/// Query-field validation.
///
/// Every filter predicate passed to `find`, `find_one`, `update_many`, or
/// `delete_many` is walked before execution and each referenced field is
/// checked against the class's lite set. In lite mode the document store
/// simply does not materialize other fields, so a query touching one would
/// silently match nothing; failing loudly here is the contract.
use crate::error::{EngramError, EngramResult};
use crate::query::Query;
use crate::schema::LiteSchema;

/// Reject any query whose filter tree references a non-lite field.
///
/// The error names every offending field and both remedies (declare the
/// field as indexed, or add it to the class's `query_fields`). Never
/// swallowed by callers.
pub fn validate_query(schema: &LiteSchema, query: &Query) -> EngramResult<()> {
    let offending: Vec<String> = query
        .collect_fields()
        .into_iter()
        .filter(|field| !schema.allows_field(field))
        .collect();

    if offending.is_empty() {
        Ok(())
    } else {
        Err(EngramError::LiteStorageQuery {
            class_name: schema.class_name.to_string(),
            fields: offending,
        })
    }
}

/// Reject an `update_many` set-document touching non-lite fields.
///
/// The document store only holds lite rows; updating anything else there
/// would fabricate fields the class never declared.
pub fn validate_set_fields<'a>(
    schema: &LiteSchema,
    fields: impl Iterator<Item = &'a str>,
) -> EngramResult<()> {
    let offending: Vec<String> = fields
        .filter(|field| !schema.allows_field(field))
        .map(str::to_string)
        .collect();

    if offending.is_empty() {
        Ok(())
    } else {
        Err(EngramError::LiteStorageQuery {
            class_name: schema.class_name.to_string(),
            fields: offending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;

    static SCHEMA: LiteSchema = LiteSchema::new(
        "validated_docs",
        &["user_id", "group_id", "sync_status"],
        &[],
        &[],
        &["keywords"],
        false,
    );

    #[test]
    fn valid_nested_combinators_pass() {
        let query = Query::new().filter(Filter::and(vec![
            Filter::eq("user_id", "u"),
            Filter::or(vec![
                Filter::eq("group_id", "g"),
                Filter::not(Filter::exists("keywords")),
            ]),
        ]));
        assert!(validate_query(&SCHEMA, &query).is_ok());
    }

    #[test]
    fn one_unknown_field_anywhere_fails_and_is_named() {
        let query = Query::new().filter(Filter::and(vec![
            Filter::eq("user_id", "u"),
            Filter::or(vec![
                Filter::eq("group_id", "g"),
                Filter::eq("unknown_field", 1),
            ]),
        ]));
        let err = validate_query(&SCHEMA, &query).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown_field"));
        assert!(message.contains("indexed"));
        assert!(message.contains("query_fields"));
    }

    #[test]
    fn system_fields_are_always_queryable() {
        let query = Query::new()
            .filter(Filter::gte("created_at", 0))
            .filter(Filter::eq("id", "x"));
        assert!(validate_query(&SCHEMA, &query).is_ok());
    }
}
