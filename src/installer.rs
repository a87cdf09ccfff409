use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use semver::Version;
use tar::Archive;
use verbosio::verbose;

use crate::cache::{Cache, CacheEntry, READY_MARKER};
use crate::env::Env;
use crate::errors::warn_user;
use crate::integrity::{self, Integrity, StreamingHasher};
use crate::registry;
use crate::resolver::Resolution;
use crate::spec::VersionExpression;

/// Materializes the resolved tool in the cache. A ready cache entry is
/// always preferred over the network; on a miss the archive is
/// downloaded, verified, extracted to a sibling temp directory, and
/// renamed into place.
pub fn ensure_installed(env: &Env, cache: &Cache, resolution: &Resolution) -> Result<CacheEntry> {
    if let Some(entry) = cache.find_entry(&resolution.name, &resolution.version) {
        return Ok(entry);
    }
    let (source, expected) = match &resolution.source {
        Some(url) => (url.clone(), resolution.integrity.clone()),
        None => {
            // Exact resolution without a pinned digest: the registry
            // supplies tarball, integrity, and signatures now.
            let def = resolution
                .def
                .ok_or_else(|| anyhow!("unknown package manager '{}'", resolution.name))?;
            let version = Version::parse(&resolution.version)
                .with_context(|| format!("malformed version '{}'", resolution.version))?;
            let expression = VersionExpression::Exact {
                version,
                integrity: None,
            };
            let release = registry::resolve(env, def, &expression)?;
            if let Some(sri) = &release.integrity {
                integrity::verify_signatures(
                    &env.integrity_keys,
                    def.registry_package,
                    &resolution.version,
                    sri,
                    &release.signatures,
                )?;
            }
            let expected = release
                .integrity
                .as_deref()
                .map(Integrity::from_sri)
                .transpose()?;
            (release.tarball, expected)
        }
    };
    download_and_install(env, cache, resolution, &source, expected.as_ref())
}

fn download_and_install(
    env: &Env,
    cache: &Cache,
    resolution: &Resolution,
    url: &str,
    expected: Option<&Integrity>,
) -> Result<CacheEntry> {
    registry::ensure_network(env)?;
    if env.download_prompt {
        warn_user(&format!("Corepack is about to download {}", url));
    }
    let mut response = registry::apply_auth(registry::http_client()?.get(url), env)
        .send()
        .with_context(|| format!("failed to download {}", url))?;
    if !response.status().is_success() {
        bail!("failed to download {}: HTTP {}", url, response.status());
    }

    let tool_dir = cache.tool_dir(&resolution.name);
    std::fs::create_dir_all(&tool_dir)
        .with_context(|| format!("failed to create {}", tool_dir.display()))?;

    // Stream to a temp file, hashing as the bytes arrive. On any failure
    // below the temp file is dropped and nothing reaches the cache.
    let mut archive = tempfile::NamedTempFile::new_in(&tool_dir)?;
    let mut hasher = expected.map(|integrity| StreamingHasher::new(integrity.algo));
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = response
            .read(&mut buf)
            .with_context(|| format!("failed while downloading {}", url))?;
        if n == 0 {
            break;
        }
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        archive.write_all(&buf[..n])?;
    }
    archive.flush()?;
    if let (Some(expected), Some(hasher)) = (expected, hasher) {
        integrity::verify_digest(expected, &hasher.finish())?;
    }

    verbose!(1, "Extracting {}", url);
    let staging = tempfile::tempdir_in(&tool_dir)?;
    extract_tarball(archive.path(), staging.path())?;
    let staging = staging.into_path();
    let entry = cache.commit(&staging, &resolution.name, &resolution.version)?;
    verbose!(1, "Installed {}@{}", resolution.name, resolution.version);
    Ok(entry)
}

/// Unpacks a gzipped tarball, stripping the top-level directory every
/// registry tarball nests its files under (`package/...`).
pub fn extract_tarball(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("failed to open {}", archive.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut components = path.components();
        components.next();
        let stripped = components.as_path().to_path_buf();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

/// Bundles installed cache entries into a redistributable archive. The
/// archive holds `<name>/<version>/...` trees, ready markers included,
/// so re-installing it reproduces the cache bytes exactly. When `shim`
/// is given (the running executable), it travels along at the archive
/// root so the bundle is self-contained.
pub fn pack_entries(entries: &[CacheEntry], shim: Option<&Path>, output: &Path) -> Result<()> {
    let file = std::fs::File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        builder
            .append_dir_all(format!("{}/{}", entry.name, entry.version), &entry.path)
            .with_context(|| format!("failed to archive {}", entry.path.display()))?;
    }
    if let Some(shim) = shim {
        builder
            .append_path_with_name(shim, "corepack")
            .with_context(|| format!("failed to archive {}", shim.display()))?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Installs the cache entries of an archive produced by `pack_entries`.
/// Returns the `(name, version)` pairs found in the archive.
pub fn install_from_archive(cache: &Cache, archive: &Path) -> Result<Vec<(String, String)>> {
    std::fs::create_dir_all(cache.home())
        .with_context(|| format!("failed to create {}", cache.home().display()))?;
    let staging = tempfile::tempdir_in(cache.home())?;
    let file = std::fs::File::open(archive)
        .with_context(|| format!("failed to open {}", archive.display()))?;
    Archive::new(GzDecoder::new(file)).unpack(staging.path())?;

    let mut installed = Vec::new();
    for tool in std::fs::read_dir(staging.path())? {
        let tool = tool?;
        if !tool.file_type()?.is_dir() {
            continue;
        }
        let name = tool.file_name().to_string_lossy().to_string();
        for version_dir in std::fs::read_dir(tool.path())? {
            let version_dir = version_dir?;
            let version = version_dir.file_name().to_string_lossy().to_string();
            if !version_dir.path().join(READY_MARKER).exists() {
                bail!(
                    "archive entry {}/{} is not a complete install",
                    name,
                    version
                );
            }
            if cache.find_entry(&name, &version).is_none() {
                cache.commit(&version_dir.path(), &name, &version)?;
            }
            installed.push((name.clone(), version));
        }
    }
    if installed.is_empty() {
        bail!("{} contains no cache entries", archive.display());
    }
    Ok(installed)
}
