use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;

use crate::integrity::KeyPolicy;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
pub const ENV_FILE_NAME: &str = ".corepack.env";

/// Resolved environment flags. Loaded once, before any resolution step.
#[derive(Debug, Clone)]
pub struct Env {
    /// Cache root (`COREPACK_HOME`).
    pub home: PathBuf,
    pub default_to_latest: bool,
    pub enable_network: bool,
    pub enable_project_spec: bool,
    pub enable_auto_pin: bool,
    pub strict: bool,
    /// Only honored from the process environment, never the env file.
    pub download_prompt: bool,
    pub unsafe_custom_urls: bool,
    pub registry: String,
    pub npm_token: Option<String>,
    pub npm_user: Option<String>,
    pub npm_password: Option<String>,
    pub integrity_keys: KeyPolicy,
}

impl Env {
    /// Snapshots the process environment and merges the project's env
    /// file, if any. File values never override process values.
    pub fn load(project_root: Option<&Path>) -> Result<Env> {
        let process: HashMap<String, String> = std::env::vars().collect();
        let mut merged = process.clone();
        if let Some(path) = env_file_path(&process, project_root) {
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                for (key, value) in parse_env_file(&content) {
                    merged.entry(key).or_insert(value);
                }
            }
        }
        Env::from_maps(&merged, &process)
    }

    /// Builds the flag set from a merged map plus the raw process map
    /// (the latter only for flags that must ignore the env file).
    pub fn from_maps(
        merged: &HashMap<String, String>,
        process: &HashMap<String, String>,
    ) -> Result<Env> {
        let home = match merged.get("COREPACK_HOME") {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => default_home()?,
        };
        let registry = match merged.get("COREPACK_NPM_REGISTRY") {
            Some(registry) if !registry.is_empty() => registry.trim_end_matches('/').to_string(),
            _ => DEFAULT_REGISTRY.to_string(),
        };
        Ok(Env {
            home,
            default_to_latest: flag(merged, "COREPACK_DEFAULT_TO_LATEST", false),
            enable_network: flag(merged, "COREPACK_ENABLE_NETWORK", true),
            enable_project_spec: flag(merged, "COREPACK_ENABLE_PROJECT_SPEC", true),
            enable_auto_pin: flag(merged, "COREPACK_ENABLE_AUTO_PIN", false),
            strict: flag(merged, "COREPACK_ENABLE_STRICT", true),
            download_prompt: flag(process, "COREPACK_ENABLE_DOWNLOAD_PROMPT", true),
            unsafe_custom_urls: flag(merged, "COREPACK_ENABLE_UNSAFE_CUSTOM_URLS", false),
            registry,
            npm_token: non_empty(merged, "COREPACK_NPM_TOKEN"),
            npm_user: non_empty(merged, "COREPACK_NPM_USER"),
            npm_password: non_empty(merged, "COREPACK_NPM_PASSWORD"),
            integrity_keys: key_policy(merged)?,
        })
    }
}

fn default_home() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "nodejs", "corepack")
        .ok_or_else(|| anyhow!("could not determine a cache directory"))?;
    Ok(dirs.cache_dir().to_path_buf())
}

fn flag(map: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match map.get(key).map(String::as_str) {
        None | Some("") => default,
        Some("0") => false,
        Some(_) => true,
    }
}

fn non_empty(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

fn key_policy(map: &HashMap<String, String>) -> Result<KeyPolicy> {
    match map.get("COREPACK_INTEGRITY_KEYS").map(String::as_str) {
        None => Ok(KeyPolicy::Builtin),
        Some("") | Some("0") => Ok(KeyPolicy::Disabled),
        Some(json) => {
            let keys = serde_json::from_str(json)
                .context("failed to parse COREPACK_INTEGRITY_KEYS")?;
            Ok(KeyPolicy::Custom(keys))
        }
    }
}

/// Selects the env file: `COREPACK_ENV_FILE=0` disables it, any other
/// value names it, and the default is `.corepack.env` at the project
/// root. Without a project there is no default file.
fn env_file_path(
    process: &HashMap<String, String>,
    project_root: Option<&Path>,
) -> Option<PathBuf> {
    match process.get("COREPACK_ENV_FILE").map(String::as_str) {
        Some("0") => None,
        Some(name) if !name.is_empty() => {
            let name = Path::new(name);
            if name.is_absolute() {
                Some(name.to_path_buf())
            } else {
                Some(project_root.unwrap_or(Path::new(".")).join(name))
            }
        }
        _ => project_root.map(|root| root.join(ENV_FILE_NAME)),
    }
}

/// `KEY=VALUE` per line, `#` comments, blank lines. No interpolation.
/// Lines without `=` are skipped. Surrounding single or double quotes on
/// the value are stripped.
fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        entries.push((key.to_string(), value.to_string()));
    }
    entries
}
