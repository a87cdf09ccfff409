use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

pub const MANIFEST_NAME: &str = "package.json";

/// The controlling project: the closest ancestor manifest declaring
/// `packageManager` or `devEngines.packageManager`.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub package_manager: Option<String>,
    pub dev_engines: Option<Value>,
}

/// Walks upward from `start`. Manifests inside a `node_modules` segment
/// are vendored dependencies and never control resolution; manifests
/// without the relevant fields are transparent and the walk continues.
pub fn find_project(start: &Path) -> Option<Project> {
    for dir in start.ancestors() {
        if dir
            .components()
            .any(|c| c.as_os_str() == "node_modules")
        {
            continue;
        }
        let manifest_path = dir.join(MANIFEST_NAME);
        if !manifest_path.is_file() {
            continue;
        }
        let Some(project) = read_manifest(dir, &manifest_path) else {
            continue;
        };
        if project.package_manager.is_some() || project.dev_engines.is_some() {
            return Some(project);
        }
    }
    None
}

/// The closest manifest regardless of its contents: the auto-pin target
/// in projects that do not declare a package manager yet. Vendored
/// folders are skipped here too.
pub fn find_nearest_manifest(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        if dir
            .components()
            .any(|c| c.as_os_str() == "node_modules")
        {
            continue;
        }
        let manifest_path = dir.join(MANIFEST_NAME);
        if manifest_path.is_file() {
            return Some(manifest_path);
        }
    }
    None
}

/// Reads the two fields the shim consumes; everything else in the
/// manifest is ignored. Unreadable or malformed manifests are treated as
/// transparent.
fn read_manifest(root: &Path, manifest_path: &Path) -> Option<Project> {
    let content = std::fs::read_to_string(manifest_path).ok()?;
    let doc: Value = serde_json::from_str(&content).ok()?;
    let package_manager = doc
        .get("packageManager")
        .and_then(Value::as_str)
        .map(str::to_string);
    let dev_engines = doc
        .get("devEngines")
        .and_then(|engines| engines.get("packageManager"))
        .cloned();
    Some(Project {
        root: root.to_path_buf(),
        manifest_path: manifest_path.to_path_buf(),
        package_manager,
        dev_engines,
    })
}

/// Writes `packageManager` into the manifest, creating the file if it
/// does not exist. Key order of an existing manifest is preserved.
pub fn write_package_manager(manifest_path: &Path, value: &str) -> Result<()> {
    let mut doc: Value = if manifest_path.exists() {
        let content = std::fs::read_to_string(manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?
    } else {
        Value::Object(Default::default())
    };
    doc.as_object_mut()
        .with_context(|| format!("{} is not a JSON object", manifest_path.display()))?
        .insert("packageManager".to_string(), Value::String(value.to_string()));
    let mut content = serde_json::to_string_pretty(&doc)?;
    content.push('\n');
    std::fs::write(manifest_path, content)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    Ok(())
}
