//! Label schema.

use super::with_identity;
use crate::schema::{AttrType, Attribute, ObjectSchema};

const COLORS: &[&str] = &[
    "blue", "skyBlue", "mint", "teal", "lime", "softYellow", "orange", "pink", "purple", "lavender", "slateGrey",
    "rose", "mauve", "peach", "brown", "red", "green", "yellow",
];

/// The label schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("color", Attribute::required(AttrType::String).one_of(COLORS))
            .field("type", Attribute::computed(AttrType::String)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Mutability, Naming, Value, ViolationKind, decode, encode, field_key, validate};
    use serde_json::json;

    fn label() -> Value {
        Value::object([("name", Value::from("prod")), ("color", Value::from("skyBlue"))])
    }

    #[test]
    fn test_valid_label() {
        assert!(validate(&schema(), &label()).is_empty());
    }

    #[test]
    fn test_name_and_color_required() {
        let violations = validate(&schema(), &Value::object([("name", Value::from("prod"))]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::MissingRequiredField);
        assert_eq!(violations[0].path.to_string(), "color");

        let violations = validate(&schema(), &Value::object([("color", Value::from("blue"))]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path.to_string(), "name");
    }

    #[test]
    fn test_color_outside_palette_rejected() {
        let mut v = label();
        v.set("color", Value::from("magenta"));
        let violations = validate(&schema(), &v);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ConstraintFailed);
    }

    #[test]
    fn test_type_is_server_assigned() {
        let mut v = label();
        v.set("type", Value::from("custom"));
        let violations = validate(&schema(), &v);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ComputedOnly);
    }

    #[test]
    fn test_fields_update_in_place() {
        let schema = schema();
        for name in ["name", "color"] {
            assert_eq!(schema.get(name).map(|a| a.mutability), Some(Mutability::Mutable), "{name}");
        }
        for name in ["id", "type", "create_time", "update_time"] {
            assert_eq!(schema.get(name).map(|a| a.mutability), Some(Mutability::ComputedOnly), "{name}");
        }
    }

    #[test]
    fn test_wire_names() {
        let schema = schema();
        let key = |name: &str| schema.get(name).map(|a| field_key(name, a, Naming::Wire));
        assert_eq!(key("create_time").as_deref(), Some("createTime"));
        assert_eq!(key("color").as_deref(), Some("color"));

        let body = encode(&schema, &label()).expect("encodes");
        assert_eq!(body, json!({"name": "prod", "color": "skyBlue"}));

        let decoded = decode(
            &schema,
            &json!({"id": "l-1", "name": "prod", "color": "skyBlue", "type": "custom", "createTime": 7, "updateTime": 9}),
        )
        .expect("decodes");
        assert_eq!(decoded.get("update_time"), &Value::from(9.0));
        assert_eq!(decoded.get("type"), &Value::from("custom"));
    }
}
