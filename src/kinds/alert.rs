//! Cost alert schema.

use super::{CURRENCIES, dimension_filter, metric, with_identity};
use crate::schema::{AttrType, Attribute, ObjectSchema};

fn config() -> ObjectSchema {
    ObjectSchema::new()
        .field("metric", Attribute::required(metric()))
        .field(
            "condition",
            Attribute::required(AttrType::String).one_of(&["value", "forecast", "percentage-change"]),
        )
        .field(
            "currency",
            Attribute::optional(AttrType::String).one_of(CURRENCIES).with_default("USD"),
        )
        .field("operator", Attribute::required(AttrType::String).one_of(&["gt", "lt"]))
        .field(
            "time_interval",
            Attribute::required(AttrType::String).one_of(&["day", "week", "month", "quarter", "year"]),
        )
        .field("value", Attribute::required(AttrType::Number))
        .field("scopes", Attribute::optional(AttrType::list(dimension_filter())))
        .field(
            "data_source",
            Attribute::optional(AttrType::String)
                .one_of(&["billing", "bqlens", "billing_datahub"])
                .with_default("billing"),
        )
        .field("evaluate_for_each", Attribute::optional(AttrType::String))
}

/// The alert schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("config", Attribute::required(AttrType::Object(config())))
            .field(
                "recipients",
                Attribute::optional_computed(AttrType::set(AttrType::String)),
            )
            .field("last_alerted", Attribute::computed(AttrType::Number)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Value, ViolationKind, validate};

    fn alert(metric: Value) -> Value {
        Value::object([
            ("name", Value::from("spend spike")),
            (
                "config",
                Value::object([
                    ("metric", metric),
                    ("condition", Value::from("value")),
                    ("operator", Value::from("gt")),
                    ("time_interval", Value::from("month")),
                    ("value", Value::from(5000.0)),
                ]),
            ),
        ])
    }

    #[test]
    fn test_valid_alert() {
        let v = alert(Value::object([("type", Value::from("basic")), ("value", Value::from("cost"))]));
        assert!(validate(&schema(), &v).is_empty());
    }

    #[test]
    fn test_metric_with_two_variants_rejected() {
        let v = alert(Value::object([
            ("type", Value::from("basic")),
            ("value", Value::from("cost")),
            ("extended_metric", Value::from("amortized_cost")),
        ]));
        let violations = validate(&schema(), &v);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ConflictingVariant);
        assert_eq!(violations[0].actual, "extended");
    }
}
