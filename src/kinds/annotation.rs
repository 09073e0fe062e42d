//! Annotation schema.

use super::with_identity;
use crate::schema::{AttrType, Attribute, ObjectSchema};

/// The annotation schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("content", Attribute::required(AttrType::String).non_empty())
            .field("timestamp", Attribute::required(AttrType::String).non_empty())
            .field("reports", Attribute::optional(AttrType::set(AttrType::String)))
            .field("labels", Attribute::optional(AttrType::set(AttrType::String))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Value, validate};

    #[test]
    fn test_annotation() {
        let v = Value::object([
            ("content", Value::from("migration to committed use")),
            ("timestamp", Value::from("2026-01-15T00:00:00Z")),
            ("reports", Value::string_set(["r-1", "r-2"])),
        ]);
        assert!(validate(&schema(), &v).is_empty());
        assert_eq!(validate(&schema(), &Value::object([("reports", Value::Null)])).len(), 2);
    }
}
