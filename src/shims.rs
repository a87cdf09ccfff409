use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::config;

/// Creates the per-binary entry points (`npm`, `npx`, `yarn`, ...) that
/// route invocations through the shim: symlinks on Unix, `.cmd`
/// wrappers on Windows. With no tools given, every managed binary is
/// covered.
pub fn enable(install_directory: Option<PathBuf>, tools: &[String]) -> Result<()> {
    let dir = target_directory(install_directory)?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let exe = std::env::current_exe().context("failed to locate the shim binary")?;
    for name in selected_binaries(tools)? {
        create_shim(&exe, &dir, name)?;
    }
    Ok(())
}

/// Removes the entry points `enable` created. Missing files are fine.
pub fn disable(install_directory: Option<PathBuf>, tools: &[String]) -> Result<()> {
    let dir = target_directory(install_directory)?;
    for name in selected_binaries(tools)? {
        let _ = std::fs::remove_file(dir.join(name));
        let _ = std::fs::remove_file(dir.join(format!("{}.cmd", name)));
    }
    Ok(())
}

fn target_directory(install_directory: Option<PathBuf>) -> Result<PathBuf> {
    match install_directory {
        Some(dir) => Ok(dir),
        None => {
            let exe = std::env::current_exe().context("failed to locate the shim binary")?;
            Ok(exe
                .parent()
                .ok_or_else(|| anyhow!("the shim binary has no parent directory"))?
                .to_path_buf())
        }
    }
}

fn selected_binaries(tools: &[String]) -> Result<Vec<&'static str>> {
    if tools.is_empty() {
        return Ok(config::all_binaries());
    }
    let mut names: Vec<&'static str> = Vec::new();
    for tool in tools {
        let def = config::find_by_name(tool, None)
            .ok_or_else(|| anyhow!("unknown package manager '{}'", tool))?;
        for (name, _) in def.bin_entries {
            if !names.contains(name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn create_shim(exe: &Path, dir: &Path, name: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::symlink;
        let shim = dir.join(name);
        let _ = std::fs::remove_file(&shim);
        symlink(exe, &shim)
            .with_context(|| format!("failed to create shim {}", shim.display()))?;
    }
    #[cfg(windows)]
    {
        let shim = dir.join(format!("{}.cmd", name));
        let script = format!("@echo off\r\n\"{}\" {} %*\r\n", exe.display(), name);
        std::fs::write(&shim, script)
            .with_context(|| format!("failed to create shim {}", shim.display()))?;
    }
    Ok(())
}
