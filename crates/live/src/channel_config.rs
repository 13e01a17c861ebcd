//! Per-path channel configuration handed out by scope resolvers.

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::address::SEPARATOR;

/// Feature-specific behaviour attached to a channel config.
///
/// Implemented by whoever owns the feature behind a namespace; the registry
/// only calls it.
pub trait ChannelHandler: Send + Sync {
    /// Whether the current client may publish into the channel. Evaluated once,
    /// when the channel initializes.
    fn can_publish(&self) -> bool {
        false
    }

    /// Transform a raw publication before it reaches subscribers.
    fn process_message(&self, message: Value) -> Value {
        message
    }
}

/// Describes one `{var}` placeholder in a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VariableDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Channel configuration for one path pattern.
#[derive(Clone)]
pub struct ChannelConfig {
    pattern: PathPattern,
    pub description: Option<String>,
    pub variables: Vec<VariableDescriptor>,
    pub has_presence: bool,
    pub handler: Option<Arc<dyn ChannelHandler>>,
}

impl ChannelConfig {
    pub fn new(path: impl Into<String>) -> Self {
        let pattern = PathPattern::new(path);
        let variables = pattern
            .placeholders()
            .map(|name| VariableDescriptor {
                name: name.to_string(),
                description: None,
            })
            .collect();
        Self {
            pattern,
            description: None,
            variables,
            has_presence: false,
            handler: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_presence(mut self) -> Self {
        self.has_presence = true;
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach a description to a declared variable.
    #[must_use]
    pub fn describe_variable(mut self, name: &str, description: impl Into<String>) -> Self {
        if let Some(var) = self.variables.iter_mut().find(|v| v.name == name) {
            var.description = Some(description.into());
        }
        self
    }

    /// The declared path pattern, e.g. `uid/{uid}`.
    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn can_publish(&self) -> bool {
        self.handler.as_ref().is_some_and(|h| h.can_publish())
    }

    pub fn process_message(&self, message: Value) -> Value {
        match self.handler {
            Some(ref h) => h.process_message(message),
            None => message,
        }
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("path", &self.path())
            .field("description", &self.description)
            .field("variables", &self.variables)
            .field("has_presence", &self.has_presence)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

// ── Path patterns ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A channel path pattern. Literal segments match exactly and `{name}`
/// segments match any single non-empty segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = raw
            .split(SEPARATOR)
            .map(|seg| match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if !name.is_empty() => Segment::Placeholder(name.to_string()),
                _ => Segment::Literal(seg.to_string()),
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Number of placeholder segments; lower is more specific.
    pub fn wildcard_count(&self) -> usize {
        self.placeholders().count()
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split(SEPARATOR);
        for segment in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            match segment {
                Segment::Literal(lit) if lit != part => return false,
                Segment::Placeholder(_) if part.is_empty() => return false,
                _ => {},
            }
        }
        parts.next().is_none()
    }

    /// Extract placeholder values from a matching path.
    pub fn captures<'a>(&'a self, path: &'a str) -> Option<Vec<(&'a str, &'a str)>> {
        if !self.matches(path) {
            return None;
        }
        Some(
            self.segments
                .iter()
                .zip(path.split(SEPARATOR))
                .filter_map(|(seg, part)| match seg {
                    Segment::Placeholder(name) => Some((name.as_str(), part)),
                    Segment::Literal(_) => None,
                })
                .collect(),
        )
    }
}

/// Pick the config whose pattern matches `path` with the fewest placeholders.
/// Equal specificity keeps declaration order.
pub fn best_match<'a>(
    configs: impl IntoIterator<Item = &'a ChannelConfig>,
    path: &str,
) -> Option<&'a ChannelConfig> {
    configs
        .into_iter()
        .filter(|c| c.pattern.matches(path))
        .min_by_key(|c| c.pattern.wildcard_count())
}
