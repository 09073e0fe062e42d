//! Attribute schemas.
//!
//! A schema is a tree of [`AttrType`] nodes. Object fields carry an
//! [`Attribute`] describing presence, mutability, defaults and constraints;
//! objects may also carry cross-field [`ObjectRule`]s.

use std::collections::BTreeMap;

use super::value::Value;

/// How a field reacts to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// Changed in place.
    Mutable,
    /// Any change forces the instance to be replaced.
    Immutable,
    /// Assigned by the remote system; never configured, never diffed.
    ComputedOnly,
}

/// Whether configuration must supply a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Must be set (unless a default exists).
    Required,
    /// May be omitted.
    Optional,
}

/// Shape of an attribute node.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrType {
    /// A string scalar.
    String,
    /// A numeric scalar.
    Number,
    /// A boolean scalar.
    Bool,
    /// An ordered list; diffed by position.
    List(Box<AttrType>),
    /// An unordered set; diffed by element identity.
    Set {
        /// Element type.
        element: Box<AttrType>,
        /// Fields identifying an element. Empty means the whole content.
        key_fields: Vec<String>,
    },
    /// A nested object.
    Object(ObjectSchema),
    /// A discriminated union.
    Union(UnionSchema),
}

impl AttrType {
    /// An ordered list of `element`.
    #[must_use]
    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// An unordered set of `element`, identified by content.
    #[must_use]
    pub fn set(element: Self) -> Self {
        Self::Set {
            element: Box::new(element),
            key_fields: Vec::new(),
        }
    }

    /// An unordered set of objects, identified by the given fields.
    #[must_use]
    pub fn set_keyed(element: Self, key_fields: &[&str]) -> Self {
        Self::Set {
            element: Box::new(element),
            key_fields: key_fields.iter().map(ToString::to_string).collect(),
        }
    }

    /// A human-readable name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::String => String::from("string"),
            Self::Number => String::from("number"),
            Self::Bool => String::from("bool"),
            Self::List(el) => format!("list<{}>", el.name()),
            Self::Set { element, .. } => format!("set<{}>", element.name()),
            Self::Object(_) => String::from("object"),
            Self::Union(u) => format!("union<{}>", u.variant_names().join("|")),
        }
    }
}

/// A field-level constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// String value must be one of these.
    OneOf(Vec<String>),
    /// Number must lie within bounds (inclusive).
    Range {
        /// Lower bound.
        min: Option<f64>,
        /// Upper bound.
        max: Option<f64>,
    },
    /// String or collection must not be empty.
    NonEmpty,
    /// Collection elements must be unique, by the named field or by whole value.
    UniqueBy(Option<String>),
}

/// An object field.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Shape of the field.
    pub ty: AttrType,
    /// Required or optional.
    pub presence: Presence,
    /// Change classification.
    pub mutability: Mutability,
    /// Value used when configuration omits the field.
    pub default: Option<Value>,
    /// Field-level constraints.
    pub constraints: Vec<Constraint>,
    /// Remote name, when it is not the camelCase form of the field name.
    pub wire_name: Option<String>,
    /// The remote system fills this field when configuration leaves it out.
    pub fills_when_absent: bool,
}

impl Attribute {
    fn new(ty: AttrType, presence: Presence, mutability: Mutability) -> Self {
        Self {
            ty,
            presence,
            mutability,
            default: None,
            constraints: Vec::new(),
            wire_name: None,
            fills_when_absent: false,
        }
    }

    /// A required, mutable field.
    #[must_use]
    pub fn required(ty: AttrType) -> Self {
        Self::new(ty, Presence::Required, Mutability::Mutable)
    }

    /// An optional, mutable field.
    #[must_use]
    pub fn optional(ty: AttrType) -> Self {
        Self::new(ty, Presence::Optional, Mutability::Mutable)
    }

    /// A field only the remote system assigns.
    #[must_use]
    pub fn computed(ty: AttrType) -> Self {
        Self::new(ty, Presence::Optional, Mutability::ComputedOnly)
    }

    /// An optional field the remote system fills in when omitted.
    #[must_use]
    pub fn optional_computed(ty: AttrType) -> Self {
        let mut attr = Self::optional(ty);
        attr.fills_when_absent = true;
        attr
    }

    /// Marks the field as forcing replacement on change.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutability = Mutability::Immutable;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restricts a string to the given options.
    #[must_use]
    pub fn one_of(mut self, options: &[&str]) -> Self {
        self.constraints
            .push(Constraint::OneOf(options.iter().map(ToString::to_string).collect()));
        self
    }

    /// Restricts a number to `[min, max]`.
    #[must_use]
    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.push(Constraint::Range { min, max });
        self
    }

    /// Requires a non-empty string or collection.
    #[must_use]
    pub fn non_empty(mut self) -> Self {
        self.constraints.push(Constraint::NonEmpty);
        self
    }

    /// Requires unique collection elements.
    #[must_use]
    pub fn unique_by(mut self, field: Option<&str>) -> Self {
        self.constraints.push(Constraint::UniqueBy(field.map(ToString::to_string)));
        self
    }

    /// Overrides the remote field name.
    #[must_use]
    pub fn wire(mut self, name: &str) -> Self {
        self.wire_name = Some(name.to_string());
        self
    }

    /// Returns true if configuration may set this field.
    #[must_use]
    pub fn is_configurable(&self) -> bool {
        self.mutability != Mutability::ComputedOnly
    }
}

/// A cross-field rule evaluated on an object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRule {
    /// `field` must be non-empty when `when_field` equals `equals`.
    RequiredWhen {
        /// Field that becomes required.
        field: String,
        /// Field whose value triggers the requirement.
        when_field: String,
        /// Triggering value.
        equals: String,
    },
    /// When `when_field` is one of `when_values`, `field` must be one of `allowed`.
    AllowedValuesWhen {
        /// Restricted field.
        field: String,
        /// Field whose value triggers the restriction.
        when_field: String,
        /// Triggering values.
        when_values: Vec<String>,
        /// Values `field` may take.
        allowed: Vec<String>,
    },
    /// Exactly one of these fields must be set.
    ExactlyOneOf(Vec<String>),
    /// `field` must be set whenever `with` is set.
    RequiredWith {
        /// Field that becomes required.
        field: String,
        /// Field whose presence triggers the requirement.
        with: String,
    },
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl ObjectRule {
    /// Builds a [`ObjectRule::RequiredWhen`].
    #[must_use]
    pub fn required_when(field: &str, when_field: &str, equals: &str) -> Self {
        Self::RequiredWhen {
            field: field.to_string(),
            when_field: when_field.to_string(),
            equals: equals.to_string(),
        }
    }

    /// Builds a [`ObjectRule::AllowedValuesWhen`].
    #[must_use]
    pub fn allowed_when(field: &str, when_field: &str, when_values: &[&str], allowed: &[&str]) -> Self {
        Self::AllowedValuesWhen {
            field: field.to_string(),
            when_field: when_field.to_string(),
            when_values: strings(when_values),
            allowed: strings(allowed),
        }
    }

    /// Builds a [`ObjectRule::ExactlyOneOf`].
    #[must_use]
    pub fn exactly_one_of(fields: &[&str]) -> Self {
        Self::ExactlyOneOf(strings(fields))
    }

    /// Builds a [`ObjectRule::RequiredWith`].
    #[must_use]
    pub fn required_with(field: &str, with: &str) -> Self {
        Self::RequiredWith {
            field: field.to_string(),
            with: with.to_string(),
        }
    }
}

/// Schema of an object node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    /// Fields by attribute name.
    pub fields: BTreeMap<String, Attribute>,
    /// Cross-field rules.
    pub rules: Vec<ObjectRule>,
}

impl ObjectSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: &str, attr: Attribute) -> Self {
        self.fields.insert(name.to_string(), attr);
        self
    }

    /// Adds a cross-field rule.
    #[must_use]
    pub fn rule(mut self, rule: ObjectRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.fields.get(name)
    }

    /// Derives a read-only schema: `inputs` become required arguments and
    /// every other field is computed. Cross-field rules are dropped.
    #[must_use]
    pub fn as_data_source(&self, inputs: &[&str]) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(name, attr)| {
                let mut attr = attr.clone();
                if inputs.contains(&name.as_str()) {
                    attr.presence = Presence::Required;
                    attr.mutability = Mutability::Mutable;
                } else {
                    attr.presence = Presence::Optional;
                    attr.mutability = Mutability::ComputedOnly;
                    attr.default = None;
                }
                (name.clone(), attr)
            })
            .collect();
        Self {
            fields,
            rules: Vec::new(),
        }
    }
}

/// Schema of a discriminated union.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionSchema {
    /// Name of the discriminator field.
    pub discriminator: String,
    /// Fields shared by every variant.
    pub common: ObjectSchema,
    /// Variant-specific fields, by discriminator value.
    pub variants: BTreeMap<String, ObjectSchema>,
}

impl UnionSchema {
    /// Creates a union discriminated by `discriminator`.
    #[must_use]
    pub fn new(discriminator: &str) -> Self {
        Self {
            discriminator: discriminator.to_string(),
            common: ObjectSchema::new(),
            variants: BTreeMap::new(),
        }
    }

    /// Adds fields shared by every variant.
    #[must_use]
    pub fn common(mut self, common: ObjectSchema) -> Self {
        self.common = common;
        self
    }

    /// Adds a variant.
    #[must_use]
    pub fn variant(mut self, name: &str, schema: ObjectSchema) -> Self {
        self.variants.insert(name.to_string(), schema);
        self
    }

    /// Variant names in sorted order.
    #[must_use]
    pub fn variant_names(&self) -> Vec<&str> {
        self.variants.keys().map(String::as_str).collect()
    }

    /// The full object schema of one variant: discriminator, common fields
    /// and the variant's own fields.
    #[must_use]
    pub fn resolve(&self, variant: &str) -> Option<ObjectSchema> {
        let own = self.variants.get(variant)?;
        let mut schema = self.common.clone();
        schema.fields.insert(
            self.discriminator.clone(),
            Attribute::required(AttrType::String).one_of(&self.variant_names()),
        );
        for (name, attr) in &own.fields {
            schema.fields.insert(name.clone(), attr.clone());
        }
        schema.rules.extend(own.rules.iter().cloned());
        Some(schema)
    }

    /// Returns the variants, other than `variant`, that own `field`.
    #[must_use]
    pub fn owners_of(&self, field: &str, variant: &str) -> Vec<&str> {
        if field == self.discriminator || self.common.fields.contains_key(field) {
            return Vec::new();
        }
        if self.variants.get(variant).is_some_and(|v| v.fields.contains_key(field)) {
            return Vec::new();
        }
        self.variants
            .iter()
            .filter(|(name, schema)| name.as_str() != variant && schema.fields.contains_key(field))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
