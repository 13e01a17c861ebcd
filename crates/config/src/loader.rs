use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::DashliveConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "dashlive.toml",
    "dashlive.yaml",
    "dashlive.yml",
    "dashlive.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<DashliveConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./dashlive.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/dashlive/dashlive.{toml,yaml,yml,json}` (user-global)
///
/// Returns `DashliveConfig::default()` if no config file is found. Env
/// overrides are applied in every case.
pub fn discover_and_load() -> DashliveConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                DashliveConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        DashliveConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `DASHLIVE_URL` / `DASHLIVE_TOKEN` on top of a loaded config.
pub fn apply_env_overrides(config: &mut DashliveConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut DashliveConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("DASHLIVE_URL").filter(|v| !v.is_empty()) {
        config.server.url = url;
    }
    if let Some(token) = lookup("DASHLIVE_TOKEN").filter(|v| !v.is_empty()) {
        config.auth.token = Some(Secret::new(token));
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/dashlive/
    if let Some(config_dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/dashlive/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "dashlive").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<DashliveConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
