//! Attribute paths.

use std::fmt;

/// One step from a node to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    /// A named object field.
    Field(String),
    /// A list position.
    Index(usize),
    /// A set element, identified by its content key.
    Key(String),
}

/// Location of a node within an attribute tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrPath(Vec<PathStep>);

impl AttrPath {
    /// The empty path, addressing the root.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a dotted path such as `config.metric.type`.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(|s| PathStep::Field(s.to_string()))
                .collect(),
        )
    }

    /// Returns this path extended by a field step.
    #[must_use]
    pub fn field(&self, name: &str) -> Self {
        self.with(PathStep::Field(name.to_string()))
    }

    /// Returns this path extended by a list index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.with(PathStep::Index(index))
    }

    /// Returns this path extended by a set element key.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        self.with(PathStep::Key(key.to_string()))
    }

    fn with(&self, step: PathStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    /// The steps of this path.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// The first field name, i.e. the top-level attribute this path lives under.
    #[must_use]
    pub fn top_level(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathStep::Field(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, step) in self.0.iter().enumerate() {
            match step {
                PathStep::Field(name) if i == 0 => write!(f, "{name}")?,
                PathStep::Field(name) => write!(f, ".{name}")?,
                PathStep::Index(idx) => write!(f, "[{idx}]")?,
                PathStep::Key(key) => write!(f, "[#{}]", &key[..key.len().min(8)])?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let path = AttrPath::root().field("config").field("filters").index(2).field("values");
        assert_eq!(path.to_string(), "config.filters[2].values");
        assert_eq!(AttrPath::root().to_string(), "<root>");
    }

    #[test]
    fn test_set_key_is_shortened() {
        let path = AttrPath::root().field("alerts").key("0123456789abcdef");
        assert_eq!(path.to_string(), "alerts[#01234567]");
    }

    #[test]
    fn test_parse_and_top_level() {
        let path = AttrPath::parse("config.metric.type");
        assert_eq!(path.top_level(), Some("config"));
        assert_eq!(path, AttrPath::root().field("config").field("metric").field("type"));
    }
}
