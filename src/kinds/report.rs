//! Cost report schema.

use super::{CURRENCIES, DIMENSION_TYPES, TIME_INTERVALS, dimension_filter, metric, with_identity};
use crate::schema::{AttrType, Attribute, ObjectRule, ObjectSchema};

const AGGREGATIONS: &[&str] = &["total", "percent_total", "percent_col", "percent_row"];

const LAYOUTS: &[&str] = &[
    "table",
    "table_heatmap",
    "table_row_heatmap",
    "table_col_heatmap",
    "csv_export",
    "sheets_export",
    "column_chart",
    "stacked_column_chart",
    "bar_chart",
    "stacked_bar_chart",
    "line_chart",
    "spline_chart",
    "area_chart",
    "area_spline_chart",
    "stacked_area_chart",
    "treemap_chart",
];

const SORTS: &[&str] = &["a_to_z", "asc", "desc"];

fn dimension() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("id", Attribute::required(AttrType::String).non_empty())
            .field("type", Attribute::required(AttrType::String).one_of(DIMENSION_TYPES)),
    )
}

fn group() -> AttrType {
    let limit = ObjectSchema::new()
        .field("value", Attribute::required(AttrType::Number).range(Some(0.0), None))
        .field("sort", Attribute::required(AttrType::String).one_of(SORTS))
        .field("metric", Attribute::required(metric()));
    AttrType::Object(
        ObjectSchema::new()
            .field("id", Attribute::required(AttrType::String).non_empty())
            .field("type", Attribute::required(AttrType::String).one_of(DIMENSION_TYPES))
            .field("limit", Attribute::optional(AttrType::Object(limit))),
    )
}

fn time_range() -> AttrType {
    let custom = ObjectSchema::new()
        .field("from", Attribute::required(AttrType::String).non_empty())
        .field("to", Attribute::required(AttrType::String).non_empty());
    AttrType::Object(
        ObjectSchema::new()
            .field(
                "mode",
                Attribute::required(AttrType::String).one_of(&["last", "current", "custom"]),
            )
            .field("amount", Attribute::optional(AttrType::Number).range(Some(0.0), None))
            .field("include_current", Attribute::optional(AttrType::Bool))
            .field(
                "unit",
                Attribute::optional(AttrType::String).one_of(&["day", "week", "month", "quarter", "year"]),
            )
            .field("custom_time_range", Attribute::optional(AttrType::Object(custom)))
            .rule(ObjectRule::required_when("custom_time_range", "mode", "custom")),
    )
}

fn advanced_analysis() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("forecast", Attribute::optional(AttrType::Bool))
            .field("not_trending", Attribute::optional(AttrType::Bool))
            .field("trending_down", Attribute::optional(AttrType::Bool))
            .field("trending_up", Attribute::optional(AttrType::Bool)),
    )
}

fn config() -> ObjectSchema {
    ObjectSchema::new()
        .field(
            "aggregation",
            Attribute::optional(AttrType::String)
                .one_of(AGGREGATIONS)
                .with_default("total"),
        )
        .field(
            "currency",
            Attribute::optional(AttrType::String).one_of(CURRENCIES).with_default("USD"),
        )
        .field(
            "time_interval",
            Attribute::optional(AttrType::String)
                .one_of(TIME_INTERVALS)
                .with_default("month"),
        )
        .field(
            "layout",
            Attribute::optional(AttrType::String).one_of(LAYOUTS).with_default("table"),
        )
        .field(
            "display_values",
            Attribute::optional(AttrType::String).one_of(&["actuals_only", "percent", "actuals_and_percent"]),
        )
        .field("include_promotional_credits", Attribute::optional(AttrType::Bool))
        .field(
            "data_source",
            Attribute::optional(AttrType::String).one_of(&["billing", "bqlens", "billing_datahub"]),
        )
        .field("metric", Attribute::optional(metric()))
        .field("advanced_analysis", Attribute::optional(advanced_analysis()))
        .field("dimensions", Attribute::optional(AttrType::list(dimension())))
        .field("filters", Attribute::optional(AttrType::list(dimension_filter())))
        .field("group", Attribute::optional(AttrType::list(group())))
        .field("time_range", Attribute::optional(time_range()))
        .field("sort_groups", Attribute::optional(AttrType::String).one_of(SORTS))
        .field("sort_dimensions", Attribute::optional(AttrType::String).one_of(SORTS))
}

/// The report schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("description", Attribute::optional(AttrType::String))
            .field("config", Attribute::optional(AttrType::Object(config())))
            .field("type", Attribute::computed(AttrType::String)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::schema::{Value, ViolationKind, apply_defaults, validate};

    fn report(config: Value) -> Value {
        Value::object([("name", Value::from("test-ds-report-1")), ("config", config)])
    }

    #[test]
    fn test_minimal_report_is_valid() {
        let v = report(Value::object([
            ("aggregation", Value::from("total")),
            ("currency", Value::from("USD")),
            ("time_interval", Value::from("month")),
            ("layout", Value::from("table")),
        ]));
        assert!(validate(&schema(), &v).is_empty());
    }

    #[test]
    fn test_defaults_fill_config() {
        let v = apply_defaults(&schema(), &report(Value::Object(BTreeMap::new())));
        let config = v.get("config");
        assert_eq!(config.get("aggregation"), &Value::from("total"));
        assert_eq!(config.get("currency"), &Value::from("USD"));
        assert_eq!(config.get("layout"), &Value::from("table"));
    }

    #[test]
    fn test_custom_time_range_required() {
        let v = report(Value::object([(
            "time_range",
            Value::object([("mode", Value::from("custom"))]),
        )]));
        let violations = validate(&schema(), &v);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::MissingRequiredField);
        assert_eq!(violations[0].path.to_string(), "config.time_range.custom_time_range");
    }

    #[test]
    fn test_unknown_currency_rejected() {
        let v = report(Value::object([("currency", Value::from("XYZ"))]));
        assert_eq!(validate(&schema(), &v).len(), 1);
    }
}
