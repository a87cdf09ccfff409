use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use walkdir::WalkDir;

use crate::cache::CacheEntry;
use crate::config::ToolDefinition;

/// The runtime the managed tools' scripts execute under. Which module
/// format a script uses is the runtime's concern; the sibling
/// `package.json` travels with the install and declares it.
const RUNTIME: &str = "node";

/// Runs the invoked command from an installed tool, propagating the
/// child's exit status verbatim.
pub fn dispatch(
    entry: &CacheEntry,
    def: Option<&'static ToolDefinition>,
    command: &str,
    args: &[String],
) -> Result<i32> {
    let script = locate_script(entry, def, command)?;
    run_script(RUNTIME, entry, &script, args)
}

/// Finds the script backing the invoked command name. Known tools carry
/// their bin table in the static config (aliases map to one script);
/// custom archives declare theirs in their own manifest, with a
/// filename scan as the last resort.
pub fn locate_script(
    entry: &CacheEntry,
    def: Option<&'static ToolDefinition>,
    command: &str,
) -> Result<PathBuf> {
    if let Some(def) = def {
        let rel = def
            .bin_entries
            .iter()
            .find(|(name, _)| *name == command)
            .map(|(_, path)| *path)
            // Unlisted commands fall back to the canonical entry.
            .unwrap_or(def.bin_entries[0].1);
        return Ok(entry.path.join(rel));
    }
    if let Some(script) = bin_from_manifest(entry, command) {
        return Ok(script);
    }
    for candidate in WalkDir::new(&entry.path).into_iter().flatten() {
        if !candidate.file_type().is_file() {
            continue;
        }
        let stem = candidate
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem == command {
            return Ok(candidate.path().to_path_buf());
        }
    }
    bail!(
        "no entry point for '{}' in {}",
        command,
        entry.path.display()
    )
}

/// Reads the `bin` field of the installed tool's own manifest: either a
/// single script or a map of command names to scripts.
fn bin_from_manifest(entry: &CacheEntry, command: &str) -> Option<PathBuf> {
    let content = std::fs::read_to_string(entry.path.join("package.json")).ok()?;
    let doc: Value = serde_json::from_str(&content).ok()?;
    match doc.get("bin")? {
        Value::String(path) => Some(entry.path.join(path)),
        Value::Object(map) => {
            let script = map
                .get(command)
                .or_else(|| map.values().next())
                .and_then(Value::as_str)?;
            Some(entry.path.join(script))
        }
        _ => None,
    }
}

fn run_script(
    runtime: &str,
    entry: &CacheEntry,
    script: &PathBuf,
    args: &[String],
) -> Result<i32> {
    if !script.exists() {
        bail!("{} is missing its entry point {}", entry.name, script.display());
    }
    let status = Command::new(runtime)
        .arg(script)
        .args(args)
        // Children locate the shim through this.
        .env("COREPACK_ROOT", &entry.path)
        .status()
        .with_context(|| format!("failed to spawn {}", runtime))?;
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        Ok(status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
    }
    #[cfg(not(unix))]
    {
        Ok(status.code().unwrap_or(1))
    }
}
