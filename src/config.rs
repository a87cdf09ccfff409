use semver::Version;

/// The managed package managers. `yarn` splits into two flavors because
/// the 1.x and 2+ lines live under different registry packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Npm,
    Pnpm,
    YarnClassic,
    YarnBerry,
}

/// Static description of one managed tool. All per-tool differences live
/// here as data; the resolution and install paths are shared.
#[derive(Debug)]
pub struct ToolDefinition {
    pub tool: Tool,
    /// User-facing name, as written in `packageManager`.
    pub name: &'static str,
    /// Exact fallback version with an embedded integrity suffix.
    pub default_version: &'static str,
    /// Package queried on the registry for metadata and tarballs.
    pub registry_package: &'static str,
    /// Tarball URL used when the registry document does not provide one.
    pub tarball_template: &'static str,
    /// `(command, relative script)` pairs; the first entry is the
    /// canonical command for name-mismatch checks.
    pub bin_entries: &'static [(&'static str, &'static str)],
    /// Subcommands that may run even under a foreign project pin.
    pub transparent_commands: &'static [&'static str],
    /// Version used for transparent runs and outside any project.
    pub transparent_default: &'static str,
}

pub static DEFINITIONS: &[ToolDefinition] = &[
    ToolDefinition {
        tool: Tool::Npm,
        name: "npm",
        default_version: "10.9.2+sha512.8e188c4ce8c65f76cf6a7f17decf4a49bdef81bb3f7e3d39b4f9b2b7b8a65a9f4c3a9c6d0f1b9a2e7d41f5cc80fda4e1b79f27c1e27f4e2a9d09c1b35981ac23",
        registry_package: "npm",
        tarball_template: "{registry}/npm/-/npm-{version}.tgz",
        bin_entries: &[("npm", "bin/npm-cli.js"), ("npx", "bin/npx-cli.js")],
        transparent_commands: &["exec", "init"],
        transparent_default: "10.9.2",
    },
    ToolDefinition {
        tool: Tool::Pnpm,
        name: "pnpm",
        default_version: "10.12.1+sha512.f315b5041d9e9d40a381caebebc75e4e8a9fde4334d8f0f9b9ac27c6ac7c9e48b4e62f12d0296a7cdb56b0b0a9efae1d3a72c25a3f04f96e9a9f1e91b2d4d9f8",
        registry_package: "pnpm",
        tarball_template: "{registry}/pnpm/-/pnpm-{version}.tgz",
        bin_entries: &[("pnpm", "bin/pnpm.cjs"), ("pnpx", "bin/pnpx.cjs")],
        transparent_commands: &["dlx", "init"],
        transparent_default: "10.12.1",
    },
    ToolDefinition {
        tool: Tool::YarnClassic,
        name: "yarn",
        default_version: "1.22.22+sha512.a6b2f7906b721bba3b8e5962be9d7042d31a586ae05dbe52cf1a6cfd53c1b1e2a0e03dbe44ca49b12a3c1f6a0c57e2b5a9f9be0da33e52981d042b1adbf9f4d3",
        registry_package: "yarn",
        tarball_template: "{registry}/yarn/-/yarn-{version}.tgz",
        bin_entries: &[("yarn", "bin/yarn.js"), ("yarnpkg", "bin/yarn.js")],
        transparent_commands: &[],
        transparent_default: "1.22.22",
    },
    ToolDefinition {
        tool: Tool::YarnBerry,
        name: "yarn",
        default_version: "4.9.2+sha512.3fbc0e9fd43dc4cf87e2c05a2592e719e02c8e82cfd6e1c7e7bb2eb35ca9f56ab0f6cf19aa23d83d6f70bd7c98ea5d9d23dc2e01b6e11d7b23b6ed202bc7c3ae",
        registry_package: "@yarnpkg/cli-dist",
        // Berry ships through its own dist package, so the fallback
        // template differs from the classic line.
        tarball_template: "{registry}/@yarnpkg/cli-dist/-/cli-dist-{version}.tgz",
        bin_entries: &[("yarn", "bin/yarn.js"), ("yarnpkg", "bin/yarn.js")],
        transparent_commands: &["dlx", "init"],
        transparent_default: "4.9.2",
    },
];

pub fn definition(tool: Tool) -> &'static ToolDefinition {
    DEFINITIONS
        .iter()
        .find(|d| d.tool == tool)
        .expect("every Tool variant has a definition")
}

/// Looks a tool up by its user-facing name. `yarn` needs a major version
/// to pick the flavor; without one the classic line wins, matching what
/// the registry's `latest` tag points at.
pub fn find_by_name(name: &str, major: Option<u64>) -> Option<&'static ToolDefinition> {
    match name {
        "npm" => Some(definition(Tool::Npm)),
        "pnpm" => Some(definition(Tool::Pnpm)),
        "yarn" => match major {
            Some(m) if m >= 2 => Some(definition(Tool::YarnBerry)),
            _ => Some(definition(Tool::YarnClassic)),
        },
        _ => None,
    }
}

/// Maps an invoked binary name (`npm`, `npx`, `yarnpkg`, …) to its tool.
/// Both yarn flavors expose the same binaries; the classic definition is
/// returned and refined once a concrete version is known.
pub fn find_by_binary(command: &str) -> Option<&'static ToolDefinition> {
    DEFINITIONS
        .iter()
        .find(|d| d.bin_entries.iter().any(|(name, _)| *name == command))
}

/// Re-selects the yarn flavor once an exact version is known.
pub fn refine_for_version(
    def: &'static ToolDefinition,
    version: &Version,
) -> &'static ToolDefinition {
    match def.tool {
        Tool::YarnClassic | Tool::YarnBerry => {
            find_by_name("yarn", Some(version.major)).unwrap_or(def)
        }
        _ => def,
    }
}

/// Fills a tarball template with the registry base and exact version.
pub fn tarball_url(def: &ToolDefinition, registry: &str, version: &str) -> String {
    def.tarball_template
        .replace("{registry}", registry.trim_end_matches('/'))
        .replace("{version}", version)
}

/// All binary names `corepack enable` manages by default.
pub fn all_binaries() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for def in DEFINITIONS {
        for (name, _) in def.bin_entries {
            if !names.contains(name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_lookup_covers_aliases() {
        assert_eq!(find_by_binary("npx").unwrap().tool, Tool::Npm);
        assert_eq!(find_by_binary("pnpx").unwrap().tool, Tool::Pnpm);
        assert_eq!(find_by_binary("yarnpkg").unwrap().tool, Tool::YarnClassic);
        assert!(find_by_binary("cargo").is_none());
    }

    #[test]
    fn yarn_flavor_follows_major() {
        assert_eq!(find_by_name("yarn", Some(1)).unwrap().tool, Tool::YarnClassic);
        assert_eq!(find_by_name("yarn", Some(4)).unwrap().tool, Tool::YarnBerry);
        assert_eq!(find_by_name("yarn", None).unwrap().tool, Tool::YarnClassic);
    }

    #[test]
    fn refine_crosses_flavors_both_ways() {
        let classic = definition(Tool::YarnClassic);
        let v4 = Version::parse("4.1.0").unwrap();
        assert_eq!(refine_for_version(classic, &v4).tool, Tool::YarnBerry);
        let berry = definition(Tool::YarnBerry);
        let v1 = Version::parse("1.22.22").unwrap();
        assert_eq!(refine_for_version(berry, &v1).tool, Tool::YarnClassic);
    }

    #[test]
    fn template_substitution_handles_scoped_packages() {
        let url = tarball_url(
            definition(Tool::YarnBerry),
            "https://registry.npmjs.org/",
            "4.9.2",
        );
        assert_eq!(
            url,
            "https://registry.npmjs.org/@yarnpkg/cli-dist/-/cli-dist-4.9.2.tgz"
        );
    }

    #[test]
    fn canonical_bin_comes_first() {
        for def in DEFINITIONS {
            assert!(!def.bin_entries.is_empty());
        }
        assert_eq!(definition(Tool::Npm).bin_entries[0].0, "npm");
    }

    #[test]
    fn default_versions_carry_integrity() {
        for def in DEFINITIONS {
            assert!(def.default_version.contains("+sha512."), "{}", def.name);
        }
    }

    #[test]
    fn defaults_parse_as_exact_specs() {
        for def in DEFINITIONS {
            match crate::spec::parse_exact(def.default_version) {
                Ok(crate::spec::VersionExpression::Exact { integrity, .. }) => {
                    assert!(integrity.is_some(), "{}", def.name);
                }
                other => panic!("{}: {:?}", def.name, other),
            }
            match crate::spec::parse_exact(def.transparent_default) {
                Ok(crate::spec::VersionExpression::Exact { .. }) => {}
                other => panic!("{}: {:?}", def.name, other),
            }
        }
    }

    #[test]
    fn enable_covers_every_binary_once() {
        let names = all_binaries();
        assert_eq!(names, vec!["npm", "npx", "pnpm", "pnpx", "yarn", "yarnpkg"]);
    }
}
