use anyhow::{bail, Result};
use semver::Version;
use sha2::{Digest, Sha256};

use crate::cache::Cache;
use crate::config::{self, ToolDefinition};
use crate::env::Env;
use crate::errors::{warn_user, CorepackError};
use crate::integrity::{self, Integrity};
use crate::project::Project;
use crate::registry;
use crate::spec::{self, DevEnginesSpec, OnFail, SpecLocator, SpecRequest, VersionExpression};

/// The single authoritative outcome of resolution. Immutable; cache
/// lookup, fetch, and dispatch are all keyed off this.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Known tool definition, absent for custom-archive tools.
    pub def: Option<&'static ToolDefinition>,
    pub name: String,
    /// Exact version, or a digest-derived pseudo-version for URL specs.
    pub version: String,
    pub integrity: Option<Integrity>,
    /// Download URL when already known; otherwise the installer derives
    /// it from the registry document on a cache miss.
    pub source: Option<String>,
    pub locator: SpecLocator,
}

impl Resolution {
    /// The `name@version[+suffix]` form written by `use` and auto-pin.
    pub fn spec_string(&self) -> String {
        match &self.integrity {
            Some(integrity) => {
                format!("{}@{}+{}", self.name, self.version, integrity.to_suffix())
            }
            None => format!("{}@{}", self.name, self.version),
        }
    }
}

/// Decides which tool and version this invocation runs, per the
/// precedence ladder: inline spec, project manifest(s), same-major
/// global pin, built-in default.
pub fn resolve(
    env: &Env,
    cache: &Cache,
    project: Option<&Project>,
    command: &str,
    inline: Option<SpecRequest>,
    args: &[String],
) -> Result<Resolution> {
    if let Some(request) = inline {
        // A one-shot spec wins for this run and never pins anything.
        return resolve_request(env, request);
    }

    let invoked = config::find_by_binary(command);
    if env.enable_project_spec {
        if let Some(project) = project {
            if let Some(request) = project_request(project)? {
                let Some(invoked) = invoked else {
                    bail!("unknown package manager '{}'", command);
                };
                if request.name != invoked.name {
                    return foreign_pin_fallback(env, invoked, &request, args);
                }
                return resolve_request(env, request);
            }
        }
    }

    let Some(invoked) = invoked else {
        bail!("unknown package manager '{}'", command);
    };
    fallback_request(env, cache, invoked).and_then(|request| resolve_request(env, request))
}

/// Resolution for a tool with no project pin: latest (when opted in),
/// then the same-major global pin, then the built-in default.
fn fallback_request(
    env: &Env,
    cache: &Cache,
    invoked: &'static ToolDefinition,
) -> Result<SpecRequest> {
    if env.default_to_latest {
        return Ok(SpecRequest {
            name: invoked.name.to_string(),
            expression: VersionExpression::Tag("latest".to_string()),
            locator: SpecLocator::BuiltinDefault,
        });
    }
    let default = spec::parse_exact(invoked.default_version)?;
    if let Some(pinned) = cache.load_last_known_good().get(invoked.name) {
        if let (Ok(pin), VersionExpression::Exact { version, .. }) =
            (Version::parse(pinned), &default)
        {
            if pin.major == version.major {
                return Ok(SpecRequest {
                    name: invoked.name.to_string(),
                    expression: VersionExpression::Exact {
                        version: pin,
                        integrity: None,
                    },
                    locator: SpecLocator::GlobalPin,
                });
            }
        }
    }
    Ok(SpecRequest {
        name: invoked.name.to_string(),
        expression: default,
        locator: SpecLocator::BuiltinDefault,
    })
}

/// The project pins a different tool. Transparent subcommands of the
/// invoked tool still run (at their own default); non-strict mode
/// degrades to the invoked tool's default; otherwise the mismatch is
/// fatal.
fn foreign_pin_fallback(
    env: &Env,
    invoked: &'static ToolDefinition,
    request: &SpecRequest,
    args: &[String],
) -> Result<Resolution> {
    if let Some(first) = args.first() {
        for def in config::DEFINITIONS {
            if def.name == invoked.name
                && def.transparent_commands.contains(&first.as_str())
            {
                let transparent = SpecRequest {
                    name: def.name.to_string(),
                    expression: spec::parse_exact(def.transparent_default)?,
                    locator: SpecLocator::BuiltinDefault,
                };
                return resolve_request(env, transparent);
            }
        }
    }
    if !env.strict {
        let request = SpecRequest {
            name: invoked.name.to_string(),
            expression: spec::parse_exact(invoked.default_version)?,
            locator: SpecLocator::BuiltinDefault,
        };
        return resolve_request(env, request);
    }
    Err(CorepackError::NameMismatch {
        expected: request.name.clone(),
    }
    .into())
}

/// Extracts the project's request from `packageManager` and
/// `devEngines.packageManager`, applying the agreement rules.
fn project_request(project: &Project) -> Result<Option<SpecRequest>> {
    let dev = project
        .dev_engines
        .as_ref()
        .and_then(|value| spec::parse_dev_engines(value, &project.manifest_path));
    match (&project.package_manager, dev) {
        (Some(raw), dev) => {
            let request = spec::parse_package_manager(raw, &project.manifest_path)?;
            if let Some(dev) = dev {
                check_dev_engines(&request, &dev)?;
            }
            Ok(Some(request))
        }
        (None, Some(dev)) => {
            // devEngines alone must pin an exact version; a range only
            // ever asserts.
            let expression = dev.exact()?;
            Ok(Some(SpecRequest {
                name: dev.name.clone(),
                expression,
                locator: SpecLocator::ProjectDevEngines(dev.manifest.clone()),
            }))
        }
        (None, None) => Ok(None),
    }
}

/// Asserts `devEngines.packageManager` against the `packageManager`
/// pin. Severity follows `onFail`; `packageManager` stays the source of
/// the concrete version either way.
fn check_dev_engines(request: &SpecRequest, dev: &DevEnginesSpec) -> Result<()> {
    if dev.name != request.name {
        return report(
            dev.on_fail,
            CorepackError::DevEnginesMismatch {
                field: "packageManager".to_string(),
                got: request.name.clone(),
                want: dev.name.clone(),
            },
        );
    }
    let VersionExpression::Exact { version, integrity } = &request.expression else {
        return Ok(());
    };
    if let Some(req) = dev.version_req() {
        if !req.matches(version) {
            report(
                dev.on_fail,
                CorepackError::DevEnginesMismatch {
                    field: "packageManager".to_string(),
                    got: version.to_string(),
                    want: dev.version.clone().unwrap_or_default(),
                },
            )?;
        }
    }
    // The packageManager suffix is authoritative; a conflicting suffix
    // in devEngines is a mismatch.
    if let (Some(pinned), Some(asserted)) = (integrity, dev.integrity()) {
        if *pinned != asserted {
            report(
                dev.on_fail,
                CorepackError::DevEnginesMismatch {
                    field: "packageManager".to_string(),
                    got: pinned.to_suffix(),
                    want: asserted.to_suffix(),
                },
            )?;
        }
    }
    Ok(())
}

fn report(on_fail: OnFail, error: CorepackError) -> Result<()> {
    match on_fail {
        OnFail::Error => Err(error.into()),
        OnFail::Warn => {
            warn_user(&error.to_string());
            Ok(())
        }
        OnFail::Ignore => Ok(()),
    }
}

/// Resolves the project's own pin, independent of any invocation.
/// Used by `install` (no args), `pack`, and `up`.
pub fn resolve_project(env: &Env, project: &Project) -> Result<Resolution> {
    match project_request(project)? {
        Some(request) => resolve_request(env, request),
        None => bail!(
            "no package manager pinned in {}",
            project.manifest_path.display()
        ),
    }
}

/// Turns a request into a `Resolution`, consulting the registry only
/// when a range or tag needs a concrete version now.
pub fn resolve_request(env: &Env, request: SpecRequest) -> Result<Resolution> {
    let known = config::find_by_name(&request.name, major_hint(&request.expression));
    match request.expression {
        VersionExpression::Url { url, integrity } => {
            if known.is_some() && !env.unsafe_custom_urls {
                return Err(CorepackError::UrlForKnownTool.into());
            }
            Ok(Resolution {
                def: known,
                name: request.name,
                version: pseudo_version(&url),
                integrity,
                source: Some(url),
                locator: request.locator,
            })
        }
        VersionExpression::Exact { version, integrity } => {
            let Some(def) = known else {
                bail!("unknown package manager '{}'", request.name);
            };
            let def = config::refine_for_version(def, &version);
            // A project-pinned digest fixes the artifact completely, so
            // the tarball URL can come straight from the template and no
            // metadata fetch is ever needed.
            let source = integrity
                .as_ref()
                .map(|_| config::tarball_url(def, &env.registry, &version.to_string()));
            Ok(Resolution {
                def: Some(def),
                name: request.name,
                version: version.to_string(),
                integrity,
                source,
                locator: request.locator,
            })
        }
        expression @ (VersionExpression::Range(_) | VersionExpression::Tag(_)) => {
            let Some(def) = known else {
                bail!("unknown package manager '{}'", request.name);
            };
            let release = registry::resolve(env, def, &expression)?;
            let def = config::refine_for_version(def, &release.version);
            if let Some(sri) = &release.integrity {
                integrity::verify_signatures(
                    &env.integrity_keys,
                    def.registry_package,
                    &release.version.to_string(),
                    sri,
                    &release.signatures,
                )?;
            }
            let integrity = release
                .integrity
                .as_deref()
                .map(Integrity::from_sri)
                .transpose()?;
            Ok(Resolution {
                def: Some(def),
                name: request.name,
                version: release.version.to_string(),
                integrity,
                source: Some(release.tarball),
                locator: request.locator,
            })
        }
    }
}

fn major_hint(expression: &VersionExpression) -> Option<u64> {
    match expression {
        VersionExpression::Exact { version, .. } => Some(version.major),
        VersionExpression::Range(req) => req.comparators.first().map(|c| c.major),
        _ => None,
    }
}

/// Cache key for custom-archive installs, derived from the URL.
fn pseudo_version(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("url-{}", hex::encode(&digest[..8]))
}
