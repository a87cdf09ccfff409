use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

fn corepack(home: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("corepack").unwrap();
    cmd.current_dir(cwd)
        .env("COREPACK_HOME", home)
        .env("COREPACK_ENABLE_NETWORK", "0");
    cmd
}

#[test]
fn use_pins_the_manifest_offline() {
    let dir = tempdir().unwrap();
    let home = dir.path().join("home");
    fs::write(dir.path().join("package.json"), "{\n  \"name\": \"app\"\n}\n").unwrap();

    corepack(&home, dir.path())
        .args(["use", "pnpm@9.0.0"])
        .assert()
        .success()
        .stdout(predicates::str::contains("pnpm@9.0.0"));

    let manifest = fs::read_to_string(dir.path().join("package.json")).unwrap();
    assert!(manifest.contains("\"packageManager\": \"pnpm@9.0.0\""));
    assert!(manifest.contains("\"name\": \"app\""));
}

#[cfg(test)]
mod cli_integration_tests {
    use super::*;

    #[test]
    fn mismatched_tool_name_is_fatal() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::write(
            dir.path().join("package.json"),
            r#"{"packageManager": "yarn@1.22.4"}"#,
        )
        .unwrap();

        corepack(&home, dir.path())
            .args(["npm", "--version"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicates::str::contains(
                "This project is configured to use yarn",
            ));
    }

    #[test]
    fn empty_cache_with_network_disabled_fails() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");

        corepack(&home, dir.path())
            .args(["yarn", "--version"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicates::str::contains(
                "Network access disabled by the environment",
            ));
    }

    #[test]
    fn dev_engines_disagreement_is_reported() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::write(
            dir.path().join("package.json"),
            r#"{
                "devEngines": {"packageManager": {"name": "pnpm", "version": "10.x"}},
                "packageManager": "pnpm@6.6.2"
            }"#,
        )
        .unwrap();

        corepack(&home, dir.path())
            .args(["pnpm", "--version"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicates::str::contains(
                "does not match the value defined in \"devEngines.packageManager\"",
            ));
    }

    #[test]
    fn dev_engines_on_fail_warn_downgrades_to_a_warning() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::write(
            dir.path().join("package.json"),
            r#"{
                "devEngines": {"packageManager": {"name": "pnpm", "version": "10.x", "onFail": "warn"}},
                "packageManager": "pnpm@6.6.2"
            }"#,
        )
        .unwrap();

        // The mismatch itself only warns; the run then stops at the
        // disabled network because nothing is cached.
        corepack(&home, dir.path())
            .args(["pnpm", "--version"])
            .assert()
            .failure()
            .stderr(predicates::str::contains("! "))
            .stderr(predicates::str::contains(
                "Network access disabled by the environment",
            ));
    }

    #[test]
    fn env_file_flags_apply_without_overriding_process_env() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::write(
            dir.path().join("package.json"),
            r#"{"packageManager": "yarn@1.22.4"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(".corepack.env"), "COREPACK_ENABLE_NETWORK=0\n").unwrap();

        // Network is disabled by the project's env file alone.
        let mut cmd = Command::cargo_bin("corepack").unwrap();
        cmd.current_dir(dir.path())
            .env("COREPACK_HOME", &home)
            .args(["yarn", "--version"])
            .assert()
            .failure()
            .stderr(predicates::str::contains(
                "Network access disabled by the environment",
            ));
    }

    #[test]
    fn enable_and_disable_manage_entry_points() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        let bin = dir.path().join("bin");

        corepack(&home, dir.path())
            .args(["enable", "--install-directory"])
            .arg(&bin)
            .args(["yarn"])
            .assert()
            .success();
        let shim = bin.join(if cfg!(windows) { "yarn.cmd" } else { "yarn" });
        assert!(shim.symlink_metadata().is_ok());

        // The entry point routes back through the shim: with an empty
        // cache and no network, the managed yarn cannot be materialized.
        #[cfg(unix)]
        {
            let mut cmd = Command::new(&shim);
            cmd.current_dir(dir.path())
                .env("COREPACK_HOME", &home)
                .env("COREPACK_ENABLE_NETWORK", "0")
                .arg("--version")
                .assert()
                .failure()
                .stderr(predicates::str::contains(
                    "Network access disabled by the environment",
                ));
        }

        corepack(&home, dir.path())
            .args(["disable", "--install-directory"])
            .arg(&bin)
            .args(["yarn"])
            .assert()
            .success();
        assert!(shim.symlink_metadata().is_err());
    }

    #[test]
    fn packed_archives_install_globally() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");

        // Seed a ready cache entry by hand, bundle it, then restore it
        // into a fresh cache through the CLI.
        let seed_home = dir.path().join("seed");
        let cache = corepack::cache::Cache::new(&seed_home);
        let staging = dir.path().join("staging");
        fs::create_dir_all(staging.join("bin")).unwrap();
        fs::write(staging.join("bin/yarn.js"), "// 2.2.2\n").unwrap();
        let entry = cache.commit(&staging, "yarn", "2.2.2").unwrap();
        let archive = dir.path().join("corepack.tgz");
        corepack::installer::pack_entries(&[entry], None, &archive).unwrap();

        corepack(&home, dir.path())
            .args(["install", "-g"])
            .arg(&archive)
            .assert()
            .success()
            .stdout(predicates::str::contains("yarn@2.2.2"));

        assert!(home.join("yarn/2.2.2/.ready").exists());
        assert!(home.join("yarn/2.2.2/bin/yarn.js").exists());
        let pins = fs::read_to_string(home.join("lastKnownGood.json")).unwrap();
        assert!(pins.contains("\"yarn\": \"2.2.2\""));
    }

    #[test]
    fn cache_clean_empties_the_home() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir_all(home.join("yarn/1.22.4")).unwrap();
        fs::write(home.join("yarn/1.22.4/junk"), "x").unwrap();

        corepack(&home, dir.path())
            .args(["cache", "clean"])
            .assert()
            .success();

        assert!(home.exists());
        assert_eq!(fs::read_dir(&home).unwrap().count(), 0);
    }

    #[test]
    fn vendored_manifests_are_ignored_by_the_cli() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        fs::write(
            dir.path().join("package.json"),
            r#"{"packageManager": "yarn@1.22.4"}"#,
        )
        .unwrap();
        let vendored = dir.path().join("node_modules/dep");
        fs::create_dir_all(&vendored).unwrap();
        fs::write(
            vendored.join("package.json"),
            r#"{"packageManager": "npm@6.14.2"}"#,
        )
        .unwrap();

        // Resolution from inside the vendored folder still follows the
        // outer project: invoking npm there must hit the mismatch.
        corepack(&home, &vendored)
            .args(["npm", "--version"])
            .assert()
            .failure()
            .stderr(predicates::str::contains(
                "This project is configured to use yarn",
            ));
    }
}
