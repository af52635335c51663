use anyhow::{Context, Result};
use relay_core::RelayConfig;
use relay_core::config::mask_secret;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay")
}

pub fn config_path(custom_path: &Option<PathBuf>) -> PathBuf {
    custom_path
        .clone()
        .unwrap_or_else(|| config_dir().join("config.toml"))
}

/// Read, expand and validate the config file
pub fn load(custom_path: &Option<PathBuf>) -> Result<RelayConfig> {
    let path = config_path(custom_path);
    check_permissions(&path)?;

    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read config at {}. Run `relay init` first.",
            path.display()
        )
    })?;

    for provider in hardcoded_keys(&content) {
        warn!(
            "API key for provider '{}' is hardcoded in config file. For security, use environment variables: api_key = \"${{{}_API_KEY}}\"",
            provider,
            provider.to_uppercase()
        );
    }

    // Expand environment variables before parsing
    let expanded = expand_env_vars(&content);

    RelayConfig::from_toml_str(&expanded)
        .with_context(|| format!("Failed to load config at {}", path.display()))
}

/// Copy of `config` with every api_key masked, for display
pub fn redacted(config: &RelayConfig) -> RelayConfig {
    let mut config = config.clone();
    for provider in config.providers.values_mut() {
        provider.api_key = mask_secret(&provider.api_key);
    }
    config
}

/// Refuse config files that group or other can read (Unix only)
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(anyhow::anyhow!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Providers whose api_key is a literal rather than a `${VAR}` reference
fn hardcoded_keys(content: &str) -> Vec<String> {
    let Ok(raw) = content.parse::<toml::Table>() else {
        return Vec::new();
    };
    let Some(providers) = raw.get("providers").and_then(|p| p.as_table()) else {
        return Vec::new();
    };
    providers
        .iter()
        .filter(|(_, p)| {
            p.get("api_key")
                .and_then(|k| k.as_str())
                .is_some_and(|k| !k.is_empty() && !k.contains("${"))
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "GEMINI_API_KEY",
    "GROQ_API_KEY",
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
