use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use semver::Version;
use serde::Deserialize;

use crate::config::{self, ToolDefinition};
use crate::env::Env;
use crate::errors::CorepackError;
use crate::integrity::RegistrySignature;
use crate::spec::VersionExpression;

/// The slice of a registry metadata document the shim consumes:
/// `dist-tags` plus each version's `dist` block.
#[derive(Debug, Deserialize)]
pub struct RegistryDocument {
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct VersionMetadata {
    pub dist: DistInfo,
}

#[derive(Debug, Deserialize)]
pub struct DistInfo {
    pub tarball: Option<String>,
    pub integrity: Option<String>,
    #[serde(default)]
    pub signatures: Vec<RegistrySignature>,
}

/// A concrete version selected from the registry, ready to install.
#[derive(Debug)]
pub struct ResolvedRelease {
    pub version: Version,
    pub tarball: String,
    /// SRI integrity string as published by the registry.
    pub integrity: Option<String>,
    pub signatures: Vec<RegistrySignature>,
}

/// Fails fast when `COREPACK_ENABLE_NETWORK=0`. Every network entry
/// point goes through this.
pub fn ensure_network(env: &Env) -> Result<()> {
    if env.enable_network {
        Ok(())
    } else {
        Err(CorepackError::NetworkDisabled.into())
    }
}

pub fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("corepack/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build the HTTP client")
}

/// Injects bearer or basic auth from the environment, in that order of
/// preference.
pub fn apply_auth(
    request: reqwest::blocking::RequestBuilder,
    env: &Env,
) -> reqwest::blocking::RequestBuilder {
    if let Some(token) = &env.npm_token {
        request.bearer_auth(token)
    } else if let (Some(user), Some(password)) = (&env.npm_user, &env.npm_password) {
        request.basic_auth(user, Some(password.as_str()))
    } else {
        request
    }
}

pub fn fetch_document(env: &Env, package: &str) -> Result<RegistryDocument> {
    ensure_network(env)?;
    let url = format!("{}/{}", env.registry, package);
    let response = apply_auth(http_client()?.get(&url), env)
        .send()
        .with_context(|| format!("failed to fetch {}", url))?;
    if !response.status().is_success() {
        bail!("failed to fetch {}: HTTP {}", url, response.status());
    }
    response
        .json()
        .with_context(|| format!("failed to parse the metadata document at {}", url))
}

/// Picks the version a version expression names: exact lookup, highest
/// version satisfying a range, or a `dist-tags` entry.
pub fn select_version<'a>(
    doc: &'a RegistryDocument,
    package: &str,
    expression: &VersionExpression,
) -> Result<(Version, &'a VersionMetadata)> {
    let not_found = |request: String| CorepackError::NoMatchingVersion {
        package: package.to_string(),
        request,
    };
    match expression {
        VersionExpression::Exact { version, .. } => {
            let meta = doc
                .versions
                .get(&version.to_string())
                .ok_or_else(|| not_found(version.to_string()))?;
            Ok((version.clone(), meta))
        }
        VersionExpression::Range(req) => doc
            .versions
            .iter()
            .filter_map(|(raw, meta)| Version::parse(raw).ok().map(|v| (v, meta)))
            .filter(|(version, _)| req.matches(version))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .ok_or_else(|| not_found(req.to_string()).into()),
        VersionExpression::Tag(tag) => {
            let raw = doc
                .dist_tags
                .get(tag)
                .ok_or_else(|| not_found(tag.clone()))?;
            let meta = doc
                .versions
                .get(raw)
                .ok_or_else(|| not_found(raw.clone()))?;
            let version = Version::parse(raw)
                .with_context(|| format!("registry returned a malformed version '{}'", raw))?;
            Ok((version, meta))
        }
        VersionExpression::Url { .. } => {
            bail!("URL specs are not resolved against the registry")
        }
    }
}

/// Fetches the tool's metadata document and selects a release. The
/// tarball falls back to the tool's URL template when the document does
/// not carry one.
pub fn resolve(
    env: &Env,
    def: &'static ToolDefinition,
    expression: &VersionExpression,
) -> Result<ResolvedRelease> {
    let doc = fetch_document(env, def.registry_package)?;
    let (version, meta) = select_version(&doc, def.registry_package, expression)?;
    let tarball = match &meta.dist.tarball {
        Some(tarball) => tarball.clone(),
        None => config::tarball_url(def, &env.registry, &version.to_string()),
    };
    Ok(ResolvedRelease {
        version,
        tarball,
        integrity: meta.dist.integrity.clone(),
        signatures: meta.dist.signatures.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::VersionReq;

    fn fixture() -> RegistryDocument {
        serde_json::from_str(
            r#"{
                "dist-tags": {"latest": "2.2.2", "next": "3.0.0-rc.1"},
                "versions": {
                    "1.22.4": {"dist": {
                        "tarball": "https://registry.npmjs.org/yarn/-/yarn-1.22.4.tgz",
                        "integrity": "sha512-aGRjYWZlYmFiZQ=="
                    }},
                    "2.1.0": {"dist": {
                        "tarball": "https://registry.npmjs.org/yarn/-/yarn-2.1.0.tgz"
                    }},
                    "2.2.2": {"dist": {
                        "tarball": "https://registry.npmjs.org/yarn/-/yarn-2.2.2.tgz",
                        "integrity": "sha512-ZGVhZGJlZWY=",
                        "signatures": [{"keyid": "SHA256:abc", "sig": "AAAA"}]
                    }},
                    "3.0.0-rc.1": {"dist": {}}
                }
            }"#,
        )
        .unwrap()
    }

    fn exact(version: &str) -> VersionExpression {
        VersionExpression::Exact {
            version: Version::parse(version).unwrap(),
            integrity: None,
        }
    }

    #[test]
    fn exact_lookup() {
        let doc = fixture();
        let (version, meta) = select_version(&doc, "yarn", &exact("1.22.4")).unwrap();
        assert_eq!(version.to_string(), "1.22.4");
        assert!(meta.dist.integrity.is_some());

        let err = select_version(&doc, "yarn", &exact("9.9.9")).unwrap_err();
        assert!(err.to_string().contains("No version of yarn"));
    }

    #[test]
    fn range_selects_the_highest_match() {
        let doc = fixture();
        let range = VersionExpression::Range(VersionReq::parse("^2.0.0").unwrap());
        let (version, _) = select_version(&doc, "yarn", &range).unwrap();
        assert_eq!(version.to_string(), "2.2.2");
    }

    #[test]
    fn tag_follows_dist_tags() {
        let doc = fixture();
        let (version, _) =
            select_version(&doc, "yarn", &VersionExpression::Tag("latest".into())).unwrap();
        assert_eq!(version.to_string(), "2.2.2");
        let (version, _) =
            select_version(&doc, "yarn", &VersionExpression::Tag("next".into())).unwrap();
        assert_eq!(version.to_string(), "3.0.0-rc.1");
        assert!(
            select_version(&doc, "yarn", &VersionExpression::Tag("nope".into())).is_err()
        );
    }

    #[test]
    fn signatures_travel_with_the_version() {
        let doc = fixture();
        let (_, meta) = select_version(&doc, "yarn", &exact("2.2.2")).unwrap();
        assert_eq!(meta.dist.signatures.len(), 1);
        assert_eq!(meta.dist.signatures[0].keyid, "SHA256:abc");
    }

    #[test]
    fn disabled_network_fails_fast() {
        let mut merged = std::collections::HashMap::new();
        merged.insert("COREPACK_HOME".to_string(), "/tmp/corepack-home".to_string());
        merged.insert("COREPACK_ENABLE_NETWORK".to_string(), "0".to_string());
        let env = Env::from_maps(&merged, &merged).unwrap();
        let err = fetch_document(&env, "yarn").unwrap_err();
        assert!(err
            .to_string()
            .contains("Network access disabled by the environment"));
    }
}
