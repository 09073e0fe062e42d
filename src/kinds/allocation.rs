//! Cost allocation schema.
//!
//! An allocation carries either a single `rule` or a list of `rules` with an
//! `unallocated_costs` bucket. Rule components form an unordered set.

use super::{allocation_component, with_identity};
use crate::schema::{AttrType, Attribute, ObjectRule, ObjectSchema};

fn rule() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("formula", Attribute::optional(AttrType::String))
            .field(
                "components",
                Attribute::required(AttrType::set(allocation_component())).non_empty(),
            ),
    )
}

fn named_rule() -> AttrType {
    AttrType::Object(
        ObjectSchema::new()
            .field("id", Attribute::optional_computed(AttrType::String))
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("description", Attribute::optional(AttrType::String))
            .field(
                "action",
                Attribute::required(AttrType::String).one_of(&["create", "update", "select"]),
            )
            .field("formula", Attribute::optional(AttrType::String))
            .field("components", Attribute::optional(AttrType::set(allocation_component()))),
    )
}

/// The allocation schema.
pub(super) fn schema() -> ObjectSchema {
    with_identity(
        ObjectSchema::new()
            .field("name", Attribute::required(AttrType::String).non_empty())
            .field("description", Attribute::optional(AttrType::String))
            .field("rule", Attribute::optional(rule()))
            .field("rules", Attribute::optional(AttrType::list(named_rule())))
            .field("unallocated_costs", Attribute::optional(AttrType::String))
            .field("allocation_type", Attribute::computed(AttrType::String))
            .rule(ObjectRule::exactly_one_of(&["rule", "rules"]))
            .rule(ObjectRule::required_with("unallocated_costs", "rules")),
    )
}
