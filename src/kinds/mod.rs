//! Resource and data-source kinds.
//!
//! Each kind module declares the attribute schema of one cost-management
//! entity. Shared fragments (metrics, dimension filters) live here.

mod alert;
mod allocation;
mod annotation;
mod budget;
mod label;
mod report;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::{AttrType, Attribute, ObjectRule, ObjectSchema, UnionSchema};

/// Dimension types a filter, scope or allocation component may target.
pub const DIMENSION_TYPES: &[&str] = &[
    "datetime",
    "fixed",
    "optional",
    "label",
    "tag",
    "project_label",
    "system_label",
    "attribution",
    "attribution_group",
    "gke",
    "gke_label",
    "allocation_rule",
];

/// Matching modes of a dimension filter.
pub const FILTER_MODES: &[&str] = &["is", "starts_with", "ends_with", "contains", "regexp"];

/// Dimension types that only support exact matching.
pub const EXACT_ONLY_TYPES: &[&str] = &["attribution", "attribution_group", "allocation_rule"];

/// Supported currencies.
pub const CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "AUD", "CAD", "DKK", "NOK", "SEK", "BRL", "SGD", "MXN", "CHF", "MYR", "TWD",
    "EGP", "ZAR", "ILS", "NZD", "INR", "IDR",
];

/// Time granularities.
pub const TIME_INTERVALS: &[&str] = &["hour", "day", "dayCumSum", "week", "isoweek", "month", "quarter", "year"];

/// Basic metric values.
pub const BASIC_METRICS: &[&str] = &["cost", "usage", "savings"];

/// A managed resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A cost report.
    Report,
    /// A budget.
    Budget,
    /// A cost allocation.
    Allocation,
    /// A cost alert.
    Alert,
    /// A label.
    Label,
    /// A timeline annotation.
    Annotation,
}

impl ResourceKind {
    /// Every kind, in a fixed order.
    #[must_use]
    pub const fn all() -> [Self; 6] {
        [
            Self::Report,
            Self::Budget,
            Self::Allocation,
            Self::Alert,
            Self::Label,
            Self::Annotation,
        ]
    }

    /// Configuration name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Budget => "budget",
            Self::Allocation => "allocation",
            Self::Alert => "alert",
            Self::Label => "label",
            Self::Annotation => "annotation",
        }
    }

    /// Plural name, used for collection data sources and API paths.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Report => "reports",
            Self::Budget => "budgets",
            Self::Allocation => "allocations",
            Self::Alert => "alerts",
            Self::Label => "labels",
            Self::Annotation => "annotations",
        }
    }

    /// API path of the kind's collection.
    #[must_use]
    pub fn collection_path(self) -> String {
        format!("/analytics/v1/{}", self.plural())
    }

    /// Key holding the items in a collection response.
    #[must_use]
    pub const fn items_key(self) -> &'static str {
        self.plural()
    }

    /// Suffix appended to the item path when reading, if the kind's full
    /// record lives on a sub-resource.
    #[must_use]
    pub const fn read_suffix(self) -> Option<&'static str> {
        match self {
            Self::Report => Some("config"),
            _ => None,
        }
    }

    /// The resource schema.
    #[must_use]
    pub fn schema(self) -> ObjectSchema {
        match self {
            Self::Report => report::schema(),
            Self::Budget => budget::schema(),
            Self::Allocation => allocation::schema(),
            Self::Alert => alert::schema(),
            Self::Label => label::schema(),
            Self::Annotation => annotation::schema(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKind { kind: s.to_string() })
    }
}

/// A read-only kind: a single item by id, or a filtered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    /// One item, looked up by `id`.
    Single(ResourceKind),
    /// The kind's collection.
    Collection(ResourceKind),
}

impl DataSourceKind {
    /// The underlying resource kind.
    #[must_use]
    pub const fn resource(self) -> ResourceKind {
        match self {
            Self::Single(k) | Self::Collection(k) => k,
        }
    }

    /// The data source schema.
    #[must_use]
    pub fn schema(self) -> ObjectSchema {
        match self {
            Self::Single(kind) => kind.schema().as_data_source(&["id"]),
            Self::Collection(kind) => collection_schema(kind),
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(k) => write!(f, "{}", k.as_str()),
            Self::Collection(k) => write!(f, "{}", k.plural()),
        }
    }
}

impl FromStr for DataSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::all()
            .into_iter()
            .find_map(|k| {
                if k.as_str() == s {
                    Some(Self::Single(k))
                } else if k.plural() == s {
                    Some(Self::Collection(k))
                } else {
                    None
                }
            })
            .ok_or_else(|| ConfigError::UnknownKind { kind: s.to_string() })
    }
}

/// Schema of a collection data source.
fn collection_schema(kind: ResourceKind) -> ObjectSchema {
    let item = kind.schema().as_data_source(&[]);
    ObjectSchema::new()
        .field("filter", Attribute::optional(AttrType::String))
        .field("sort_by", Attribute::optional(AttrType::String))
        .field(
            "sort_order",
            Attribute::optional(AttrType::String).one_of(&["asc", "desc"]),
        )
        .field(
            "page_size",
            Attribute::optional(AttrType::Number)
                .range(Some(1.0), Some(1000.0))
                .wire("maxResults"),
        )
        .field("row_count", Attribute::computed(AttrType::Number))
        .field("items", Attribute::computed(AttrType::list(AttrType::Object(item))))
}

/// The metric union: `basic`, `custom` or `extended`.
///
/// All three variants travel as `{type, value}` on the wire.
pub(crate) fn metric() -> AttrType {
    AttrType::Union(
        UnionSchema::new("type")
            .variant(
                "basic",
                ObjectSchema::new().field("value", Attribute::required(AttrType::String).one_of(BASIC_METRICS)),
            )
            .variant(
                "custom",
                ObjectSchema::new().field(
                    "custom_metric_id",
                    Attribute::required(AttrType::String).non_empty().wire("value"),
                ),
            )
            .variant(
                "extended",
                ObjectSchema::new().field(
                    "extended_metric",
                    Attribute::required(AttrType::String).non_empty().wire("value"),
                ),
            ),
    )
}

/// Rules shared by every dimension-selecting object.
fn dimension_rules(schema: ObjectSchema, mode_field: &str) -> ObjectSchema {
    schema
        .rule(ObjectRule::required_when("values", "type", "fixed"))
        .rule(ObjectRule::allowed_when(mode_field, "type", EXACT_ONLY_TYPES, &["is"]))
}

/// A dimension filter or scope: `{id, type, mode, values, include_null, inverse}`.
pub(crate) fn dimension_filter() -> AttrType {
    let schema = ObjectSchema::new()
        .field("id", Attribute::required(AttrType::String).non_empty())
        .field("type", Attribute::required(AttrType::String).one_of(DIMENSION_TYPES))
        .field(
            "mode",
            Attribute::optional(AttrType::String)
                .one_of(FILTER_MODES)
                .with_default("is"),
        )
        .field("values", Attribute::optional(AttrType::list(AttrType::String)))
        .field("include_null", Attribute::optional(AttrType::Bool))
        .field("inverse", Attribute::optional(AttrType::Bool));
    AttrType::Object(dimension_rules(schema, "mode"))
}

/// An allocation rule component.
pub(crate) fn allocation_component() -> AttrType {
    let schema = ObjectSchema::new()
        .field("key", Attribute::required(AttrType::String).non_empty())
        .field("type", Attribute::required(AttrType::String).one_of(DIMENSION_TYPES))
        .field("mode", Attribute::required(AttrType::String).one_of(FILTER_MODES))
        .field("values", Attribute::required(AttrType::list(AttrType::String)))
        .field("include_null", Attribute::optional(AttrType::Bool))
        .field("inverse_selection", Attribute::optional(AttrType::Bool))
        .field("case_insensitive", Attribute::optional(AttrType::Bool));
    AttrType::Object(dimension_rules(schema, "mode"))
}

/// The common computed identity and timestamps.
pub(crate) fn with_identity(schema: ObjectSchema) -> ObjectSchema {
    schema
        .field("id", Attribute::computed(AttrType::String))
        .field("create_time", Attribute::computed(AttrType::Number))
        .field("update_time", Attribute::computed(AttrType::Number))
}
