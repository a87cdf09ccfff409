use std::path::{Path, PathBuf};

use anyhow::Result;
use semver::{Version, VersionReq};
use serde_json::Value;

use crate::errors::{warn_user, CorepackError};
use crate::integrity::Integrity;

/// Where a version request came from. Only used for precedence decisions
/// and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLocator {
    Env,
    ProjectManifest(PathBuf),
    ProjectDevEngines(PathBuf),
    GlobalPin,
    BuiltinDefault,
}

/// What kind of version the request names. Each variant has distinct
/// legality depending on the locator it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionExpression {
    Exact {
        version: Version,
        integrity: Option<Integrity>,
    },
    Range(VersionReq),
    Tag(String),
    Url {
        url: String,
        integrity: Option<Integrity>,
    },
}

/// Policy for `devEngines.packageManager` disagreements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFail {
    Error,
    Warn,
    Ignore,
}

impl OnFail {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("warn") => OnFail::Warn,
            Some("ignore") => OnFail::Ignore,
            _ => OnFail::Error,
        }
    }
}

/// A parsed request for one tool at one version.
#[derive(Debug, Clone)]
pub struct SpecRequest {
    pub name: String,
    pub expression: VersionExpression,
    pub locator: SpecLocator,
}

/// Parses a manifest `packageManager` string:
/// `<name>@<exact>[+<algo>.<hex>]` or `<name>@<URL>[#<algo>.<hex>]`.
/// Ranges, tags, and missing versions are rejected here; URL legality for
/// known tools is the resolver's call.
pub fn parse_package_manager(raw: &str, manifest: &Path) -> Result<SpecRequest> {
    let (name, rest) = raw
        .split_once('@')
        .ok_or_else(|| CorepackError::SpecSyntax { raw: raw.to_string() })?;
    if name.is_empty() || rest.is_empty() {
        return Err(CorepackError::SpecSyntax { raw: raw.to_string() }.into());
    }
    let locator = SpecLocator::ProjectManifest(manifest.to_path_buf());
    if rest.contains("://") {
        let (url, integrity) = match rest.split_once('#') {
            Some((url, fragment)) => (url.to_string(), Some(Integrity::from_suffix(fragment)?)),
            None => (rest.to_string(), None),
        };
        return Ok(SpecRequest {
            name: name.to_string(),
            expression: VersionExpression::Url { url, integrity },
            locator,
        });
    }
    Ok(SpecRequest {
        name: name.to_string(),
        expression: parse_exact(rest)?,
        locator,
    })
}

/// Parses `<exact>[+<algo>.<hex>]` into an `Exact` expression.
pub fn parse_exact(raw: &str) -> Result<VersionExpression> {
    let (version, integrity) = match raw.split_once('+') {
        Some((version, suffix)) => (version, Some(Integrity::from_suffix(suffix)?)),
        None => (raw, None),
    };
    let version = Version::parse(version)
        .map_err(|_| CorepackError::SpecSyntax { raw: raw.to_string() })?;
    Ok(VersionExpression::Exact { version, integrity })
}

/// Parses a command-line spec `<name>[@<versionOrRange>]`. Ranges and
/// tags are legal here; a bare name means the registry's `latest`.
pub fn parse_cli_spec(raw: &str) -> Result<SpecRequest> {
    let (name, rest) = match raw.split_once('@') {
        Some((name, rest)) if !name.is_empty() && !rest.is_empty() => (name, Some(rest)),
        Some(_) => {
            return Err(CorepackError::SpecSyntax { raw: raw.to_string() }.into());
        }
        None => (raw, None),
    };
    let expression = match rest {
        None => VersionExpression::Tag("latest".to_string()),
        Some(rest) if rest.contains("://") => {
            let (url, integrity) = match rest.split_once('#') {
                Some((url, fragment)) => {
                    (url.to_string(), Some(Integrity::from_suffix(fragment)?))
                }
                None => (rest.to_string(), None),
            };
            VersionExpression::Url { url, integrity }
        }
        Some(rest) => match parse_exact(rest) {
            Ok(exact) => exact,
            Err(_) => match VersionReq::parse(rest) {
                Ok(req) => VersionExpression::Range(req),
                Err(_) => VersionExpression::Tag(rest.to_string()),
            },
        },
    };
    Ok(SpecRequest {
        name: name.to_string(),
        expression,
        locator: SpecLocator::Env,
    })
}

/// The `devEngines.packageManager` constraint. Its version is kept raw:
/// it may be a range, and it only ever asserts, never selects.
#[derive(Debug, Clone)]
pub struct DevEnginesSpec {
    pub name: String,
    pub version: Option<String>,
    pub on_fail: OnFail,
    pub manifest: PathBuf,
}

impl DevEnginesSpec {
    /// The constraint as a range, with any integrity suffix stripped.
    pub fn version_req(&self) -> Option<VersionReq> {
        let raw = self.version.as_deref()?;
        let raw = raw.split_once('+').map(|(v, _)| v).unwrap_or(raw);
        VersionReq::parse(raw).ok()
    }

    /// The constraint as an exact version, required when `devEngines` is
    /// the only source of truth.
    pub fn exact(&self) -> Result<VersionExpression> {
        let raw = self
            .version
            .as_deref()
            .ok_or_else(|| CorepackError::SpecSyntax {
                raw: String::new(),
            })?;
        parse_exact(raw)
    }

    pub fn integrity(&self) -> Option<Integrity> {
        let raw = self.version.as_deref()?;
        let (_, suffix) = raw.split_once('+')?;
        Integrity::from_suffix(suffix).ok()
    }
}

/// Interprets the `devEngines.packageManager` JSON value. Objects become
/// constraints; arrays, strings, and numbers draw one warning and are
/// ignored, as is an object without a string `name`.
pub fn parse_dev_engines(value: &Value, manifest: &Path) -> Option<DevEnginesSpec> {
    let map = match value {
        Value::Object(map) => map,
        Value::Array(_) => {
            warn_user("Ignoring \"devEngines.packageManager\": arrays are not supported");
            return None;
        }
        _ => {
            warn_user("Ignoring \"devEngines.packageManager\": expected an object");
            return None;
        }
    };
    let Some(name) = map.get("name").and_then(Value::as_str) else {
        warn_user("Ignoring \"devEngines.packageManager\": missing \"name\"");
        return None;
    };
    let version = match map.get("version") {
        None | Some(Value::Null) => None,
        Some(Value::String(version)) => Some(version.clone()),
        Some(_) => {
            warn_user("Ignoring \"devEngines.packageManager\": expected an object");
            return None;
        }
    };
    Some(DevEnginesSpec {
        name: name.to_string(),
        version,
        on_fail: OnFail::parse(map.get("onFail").and_then(Value::as_str)),
        manifest: manifest.to_path_buf(),
    })
}
