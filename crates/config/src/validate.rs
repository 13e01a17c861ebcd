//! Configuration validation.
//!
//! Checks a loaded [`DashliveConfig`] for values the transport cannot work
//! with, and a raw TOML document for unknown (usually misspelled) keys.

use std::path::Path;

use crate::schema::DashliveConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "server.url"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Number of diagnostics at `severity`.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Known keys per section, used for unknown-field detection.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("server", &["url"]),
    ("auth", &["token"]),
    ("transport", &[
        "handshake_timeout_ms",
        "request_timeout_ms",
        "max_backoff_ms",
        "ca_cert",
    ]),
    ("channels", &["buffer"]),
    ("datasources", &["uid", "name", "type", "streaming"]),
];

/// Validate semantic constraints of a loaded config.
pub fn validate(config: &DashliveConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    match url::Url::parse(&config.server.url) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => {
            if url.scheme() == "ws" && config.auth.token.is_some() && !is_loopback(&url) {
                result.push(
                    Severity::Warning,
                    "server.url",
                    "token is sent over an unencrypted ws:// connection",
                );
            }
        },
        Ok(url) => result.push(
            Severity::Error,
            "server.url",
            format!("unsupported scheme '{}', expected ws or wss", url.scheme()),
        ),
        Err(e) => result.push(Severity::Error, "server.url", format!("invalid URL: {e}")),
    }

    if config.channels.buffer == 0 {
        result.push(Severity::Error, "channels.buffer", "must be greater than 0");
    }

    for (path, value) in [
        (
            "transport.handshake_timeout_ms",
            config.transport.handshake_timeout_ms,
        ),
        (
            "transport.request_timeout_ms",
            config.transport.request_timeout_ms,
        ),
        ("transport.max_backoff_ms", config.transport.max_backoff_ms),
    ] {
        if value == 0 {
            result.push(Severity::Error, path, "must be greater than 0");
        }
    }

    let mut seen = std::collections::HashSet::new();
    for (i, ds) in config.datasources.iter().enumerate() {
        let path = format!("datasources[{i}].uid");
        if ds.uid.is_empty() || ds.uid.contains('/') {
            result.push(Severity::Error, path, "uid must be non-empty and contain no '/'");
        } else if !seen.insert(ds.uid.as_str()) {
            result.push(Severity::Warning, path, format!("duplicate uid '{}'", ds.uid));
        }
    }

    if let Some(ref ca) = config.transport.ca_cert
        && !ca.exists()
    {
        result.push(
            Severity::Warning,
            "transport.ca_cert",
            format!("file not found: {}", ca.display()),
        );
    }

    result
}

/// Validate a TOML config file: syntax, unknown keys, then semantics.
pub fn validate_file(path: &Path) -> anyhow::Result<ValidationResult> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = crate::env_subst::substitute_env(&raw);
    let mut result = ValidationResult::default();

    let table: toml::Table = match toml::from_str(&raw) {
        Ok(t) => t,
        Err(e) => {
            result.push(Severity::Error, "", format!("syntax error: {e}"));
            return Ok(result);
        },
    };
    check_unknown_keys(&table, &mut result);

    match toml::from_str::<DashliveConfig>(&raw) {
        Ok(config) => result.diagnostics.extend(validate(&config).diagnostics),
        Err(e) => result.push(Severity::Error, "", format!("type error: {e}")),
    }
    Ok(result)
}

fn check_unknown_keys(table: &toml::Table, result: &mut ValidationResult) {
    for (section, value) in table {
        let Some((_, fields)) = KNOWN_SECTIONS
            .iter()
            .find(|(name, _)| *name == section.as_str())
        else {
            result.push(
                Severity::Warning,
                section.clone(),
                format!("unknown section '{section}'"),
            );
            continue;
        };
        let tables: Vec<&toml::Table> = match value {
            toml::Value::Table(t) => vec![t],
            toml::Value::Array(items) => items.iter().filter_map(toml::Value::as_table).collect(),
            _ => {
                result.push(Severity::Error, section.clone(), "expected a table");
                continue;
            },
        };
        for key in tables.iter().flat_map(|t| t.keys()) {
            if !fields.contains(&key.as_str()) {
                result.push(
                    Severity::Warning,
                    format!("{section}.{key}"),
                    format!("unknown field '{key}'"),
                );
            }
        }
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
