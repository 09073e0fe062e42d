//! Budget schema.
//!
//! A budget's `type` and `start_period` cannot change in place; the API
//! replaces the whole object on update.

use super::{CURRENCIES, dimension_filter, metric, with_identity};
use crate::schema::{AttrType, Attribute, ObjectRule, ObjectSchema};

fn alert() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field(
                "percentage",
                Attribute::required(AttrType::Number).range(Some(0.0), Some(100.0)),
            )
            .field("forecasted_date", Attribute::computed(AttrType::Number))
            .field("triggered", Attribute::computed(AttrType::Bool)),
    )
}

fn collaborator() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("email", Attribute::required(AttrType::String).non_empty())
            .field(
                "role",
                Attribute::required(AttrType::String).one_of(&["owner", "editor", "viewer"]),
            ),
    )
}

fn slack_channel() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("customer_id", Attribute::optional(AttrType::String))
            .field("id", Attribute::required(AttrType::String))
            .field("name", Attribute::optional(AttrType::String))
            .field("shared", Attribute::optional(AttrType::Bool))
            .field("type", Attribute::optional(AttrType::String))
            .field("workspace", Attribute::optional(AttrType::String)),
    )
}

/// The budget schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("description", Attribute::optional(AttrType::String))
            .field(
                "type",
                Attribute::required(AttrType::String)
                    .one_of(&["fixed", "recurring"])
                    .immutable(),
            )
            .field("start_period", Attribute::required(AttrType::Number).immutable())
            .field("end_period", Attribute::optional(AttrType::Number))
            .field(
                "time_interval",
                Attribute::optional(AttrType::String).one_of(&["day", "week", "month", "quarter", "year"]),
            )
            .field("amount", Attribute::optional(AttrType::Number).range(Some(0.0), None))
            .field(
                "currency",
                Attribute::required(AttrType::String).one_of(CURRENCIES),
            )
            .field("growth_per_period", Attribute::optional(AttrType::Number))
            .field("use_prev_spend", Attribute::optional(AttrType::Bool))
            .field("public", Attribute::optional(AttrType::String).one_of(&["viewer", "editor"]))
            .field("metric", Attribute::optional(metric()))
            .field(
                "alerts",
                Attribute::optional(AttrType::set_keyed(alert(), &["percentage"])).unique_by(Some("percentage")),
            )
            .field(
                "recipients",
                Attribute::optional_computed(AttrType::set(AttrType::String)),
            )
            .field(
                "recipients_slack_channels",
                Attribute::optional(AttrType::set(slack_channel())),
            )
            .field(
                "collaborators",
                Attribute::optional_computed(AttrType::set_keyed(collaborator(), &["email"])),
            )
            .field("scopes", Attribute::optional(AttrType::list(dimension_filter())))
            .field("current_utilization", Attribute::computed(AttrType::Number))
            .field("forecasted_utilization", Attribute::computed(AttrType::Number))
            .rule(ObjectRule::required_when("time_interval", "type", "recurring"))
            .rule(ObjectRule::required_when("end_period", "type", "fixed")),
    )
}
