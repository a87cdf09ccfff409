use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use semver::{Version, VersionReq};
use verbosio::{set_verbosity, verbose};

use corepack::cache::Cache;
use corepack::env::Env;
use corepack::errors::warn_user;
use corepack::integrity::Integrity;
use corepack::project::{self, Project};
use corepack::registry;
use corepack::resolver::{self, Resolution};
use corepack::spec::{self, SpecLocator, SpecRequest, VersionExpression};
use corepack::{dispatch, installer, integrity, shims};

use crate::cli::{CacheCommand, Cli, CorepackCommand};

/// Everything a command needs: resolved flags, the cache, and the
/// controlling project, if any. Environment load completes before any
/// resolution step.
struct RunContext {
    env: Env,
    cache: Cache,
    project: Option<Project>,
    cwd: std::path::PathBuf,
}

fn load_context() -> Result<RunContext> {
    let cwd = std::env::current_dir().context("failed to determine the working directory")?;
    let project = project::find_project(&cwd);
    let env = Env::load(project.as_ref().map(|p| p.root.as_path()))?;
    let cache = Cache::new(env.home.clone());
    Ok(RunContext {
        env,
        cache,
        project,
        cwd,
    })
}

/// Executes the parsed command line and returns the process exit code.
pub fn execute(cli: Cli) -> Result<i32> {
    if cli.verbose {
        set_verbosity!();
    }
    match cli.command {
        CorepackCommand::Install { global, specs } => {
            if global {
                execute_install_global(specs)?;
            } else {
                execute_install_local(specs)?;
            }
            Ok(0)
        }
        CorepackCommand::Pack { output, specs } => {
            execute_pack(output, specs)?;
            Ok(0)
        }
        CorepackCommand::Use { spec } => {
            execute_use(&spec)?;
            Ok(0)
        }
        CorepackCommand::Up => {
            execute_up()?;
            Ok(0)
        }
        CorepackCommand::Enable {
            install_directory,
            tools,
        } => {
            shims::enable(install_directory, &tools)?;
            Ok(0)
        }
        CorepackCommand::Disable {
            install_directory,
            tools,
        } => {
            shims::disable(install_directory, &tools)?;
            Ok(0)
        }
        CorepackCommand::Cache { command } => match command {
            CacheCommand::Clean => {
                let ctx = load_context()?;
                ctx.cache.clean()?;
                println!("Cache cleared");
                Ok(0)
            }
        },
        CorepackCommand::Tool(argv) => {
            let (first, args) = argv
                .split_first()
                .ok_or_else(|| anyhow!("missing a tool name"))?;
            let (command, inline) = if first.contains('@') {
                let request = spec::parse_cli_spec(first)?;
                (request.name.clone(), Some(request))
            } else {
                (first.clone(), None)
            };
            run_shim(&command, inline, args.to_vec())
        }
    }
}

/// Shim mode: resolve, install if needed, dispatch, and remember the
/// outcome. The child's exit status is propagated verbatim.
pub fn run_shim(command: &str, inline: Option<SpecRequest>, args: Vec<String>) -> Result<i32> {
    let ctx = load_context()?;
    let resolution = resolver::resolve(
        &ctx.env,
        &ctx.cache,
        ctx.project.as_ref(),
        command,
        inline,
        &args,
    )?;
    auto_pin(&ctx, &resolution);
    let entry = installer::ensure_installed(&ctx.env, &ctx.cache, &resolution)?;
    let code = dispatch::dispatch(&entry, resolution.def, command, &args)?;
    if code == 0 {
        ctx.cache
            .update_last_known_good(&resolution.name, &resolution.version);
    }
    Ok(code)
}

/// Writes the resolved pin back into an un-pinned project when
/// `COREPACK_ENABLE_AUTO_PIN` asks for it. Failure to write is a
/// warning, not an error.
fn auto_pin(ctx: &RunContext, resolution: &Resolution) {
    if !ctx.env.enable_auto_pin {
        return;
    }
    if let Some(project) = &ctx.project {
        if project.package_manager.is_some() {
            return;
        }
    }
    let manifest_path = match &ctx.project {
        Some(project) => project.manifest_path.clone(),
        None => match project::find_nearest_manifest(&ctx.cwd) {
            Some(path) => path,
            None => return,
        },
    };
    if Version::parse(&resolution.version).is_err() {
        return;
    }
    if let Err(err) = project::write_package_manager(&manifest_path, &resolution.spec_string()) {
        warn_user(&format!(
            "failed to update {}: {:#}",
            manifest_path.display(),
            err
        ));
    }
}

/// `install` without `--global`: cache the given specs, or the project's
/// pinned tool when no specs are given.
fn execute_install_local(specs: Vec<String>) -> Result<()> {
    let ctx = load_context()?;
    if specs.is_empty() {
        let project = ctx
            .project
            .as_ref()
            .ok_or_else(|| anyhow!("no project manifest found"))?;
        let resolution = resolver::resolve_project(&ctx.env, project)?;
        install_one(&ctx, &resolution)?;
        return Ok(());
    }
    for raw in &specs {
        let request = spec::parse_cli_spec(raw)?;
        let resolution = resolver::resolve_request(&ctx.env, request)?;
        install_one(&ctx, &resolution)?;
    }
    Ok(())
}

/// `install --global`: cache the specs and update the global pins.
/// Accepts archives produced by `pack` in place of a spec.
fn execute_install_global(specs: Vec<String>) -> Result<()> {
    if specs.is_empty() {
        bail!("expected at least one spec or archive");
    }
    let ctx = load_context()?;
    for raw in &specs {
        let as_path = PathBuf::from(raw);
        if raw.ends_with(".tgz") && as_path.is_file() {
            for (name, version) in installer::install_from_archive(&ctx.cache, &as_path)? {
                println!("Adding {}@{} to the cache...", name, version);
                ctx.cache.update_last_known_good(&name, &version);
            }
            continue;
        }
        let request = spec::parse_cli_spec(raw)?;
        let resolution = resolver::resolve_request(&ctx.env, request)?;
        install_one(&ctx, &resolution)?;
        ctx.cache
            .update_last_known_good(&resolution.name, &resolution.version);
    }
    Ok(())
}

fn install_one(ctx: &RunContext, resolution: &Resolution) -> Result<()> {
    println!(
        "Adding {}@{} to the cache...",
        resolution.name, resolution.version
    );
    installer::ensure_installed(&ctx.env, &ctx.cache, resolution)?;
    Ok(())
}

/// `use <spec>`: resolve, pin the manifest, and pre-install when the
/// network allows it.
fn execute_use(raw: &str) -> Result<()> {
    let ctx = load_context()?;
    let request = spec::parse_cli_spec(raw)?;
    let mut resolution = resolver::resolve_request(&ctx.env, request)?;
    enrich_integrity(&ctx.env, &mut resolution)?;

    let manifest_path = match &ctx.project {
        Some(project) => project.manifest_path.clone(),
        None => project::find_nearest_manifest(&ctx.cwd)
            .unwrap_or_else(|| ctx.cwd.join(project::MANIFEST_NAME)),
    };
    project::write_package_manager(&manifest_path, &resolution.spec_string())?;
    println!("Project pinned to {}", resolution.spec_string());

    if ctx.env.enable_network || ctx.cache.find_entry(&resolution.name, &resolution.version).is_some()
    {
        installer::ensure_installed(&ctx.env, &ctx.cache, &resolution)?;
    } else {
        warn_user("Network access disabled, the pinned version was not installed");
    }
    Ok(())
}

/// Fills in registry integrity for an exact resolution that has no
/// pinned digest, so the written pin fixes the artifact bytes.
fn enrich_integrity(env: &Env, resolution: &mut Resolution) -> Result<()> {
    if resolution.integrity.is_some() || !env.enable_network {
        return Ok(());
    }
    let Some(def) = resolution.def else {
        return Ok(());
    };
    let Ok(version) = Version::parse(&resolution.version) else {
        return Ok(());
    };
    let release = registry::resolve(
        env,
        def,
        &VersionExpression::Exact {
            version,
            integrity: None,
        },
    )?;
    if let Some(sri) = &release.integrity {
        integrity::verify_signatures(
            &env.integrity_keys,
            def.registry_package,
            &resolution.version,
            sri,
            &release.signatures,
        )?;
        resolution.integrity = Some(Integrity::from_sri(sri)?);
    }
    resolution.source = Some(release.tarball);
    Ok(())
}

/// `up`: move the project pin to the newest release in its major line.
fn execute_up() -> Result<()> {
    let ctx = load_context()?;
    let project = ctx
        .project
        .as_ref()
        .ok_or_else(|| anyhow!("no project manifest found"))?;
    let raw = project
        .package_manager
        .as_ref()
        .ok_or_else(|| anyhow!("the project has no packageManager pin"))?;
    let request = spec::parse_package_manager(raw, &project.manifest_path)?;
    let VersionExpression::Exact { version, .. } = &request.expression else {
        bail!("the project pin is not an exact version");
    };
    let range = VersionReq::parse(&format!("^{}", version))
        .context("failed to derive an upgrade range from the pin")?;
    let upgraded = SpecRequest {
        name: request.name.clone(),
        expression: VersionExpression::Range(range),
        locator: SpecLocator::Env,
    };
    let mut resolution = resolver::resolve_request(&ctx.env, upgraded)?;
    enrich_integrity(&ctx.env, &mut resolution)?;
    installer::ensure_installed(&ctx.env, &ctx.cache, &resolution)?;
    project::write_package_manager(&project.manifest_path, &resolution.spec_string())?;
    println!("Project pinned to {}", resolution.spec_string());
    Ok(())
}

/// `pack`: install the specs (or the project pin), then bundle their
/// cache entries into one archive.
fn execute_pack(output: PathBuf, specs: Vec<String>) -> Result<()> {
    let ctx = load_context()?;
    let mut resolutions = Vec::new();
    if specs.is_empty() {
        let project = ctx
            .project
            .as_ref()
            .ok_or_else(|| anyhow!("no project manifest found"))?;
        resolutions.push(resolver::resolve_project(&ctx.env, project)?);
    } else {
        for raw in &specs {
            let request = spec::parse_cli_spec(raw)?;
            resolutions.push(resolver::resolve_request(&ctx.env, request)?);
        }
    }
    let mut entries = Vec::new();
    for resolution in &resolutions {
        verbose!(1, "Bundling {}@{}", resolution.name, resolution.version);
        entries.push(installer::ensure_installed(&ctx.env, &ctx.cache, resolution)?);
    }
    let shim = std::env::current_exe().ok();
    installer::pack_entries(&entries, shim.as_deref(), &output)?;
    println!("Packed {} tool(s) into {}", entries.len(), output.display());
    Ok(())
}
