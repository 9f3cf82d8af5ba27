//! Shared test utilities for integration tests.
//!
//! Each test gets its own data directory and system config directory, so
//! tests never touch the user's real store and can run in parallel.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

/// Isolated directories for one test.
pub struct TestEnv {
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create an environment without initializing the store.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().expect("Failed to create data dir"),
            config_dir: TempDir::new().expect("Failed to create config dir"),
        }
    }

    /// Create an environment and run `fluxo system init` in it.
    pub fn init() -> Self {
        let env = Self::new();
        env.fluxo().args(["system", "init"]).assert().success();
        env
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn config_path(&self) -> &Path {
        self.config_dir.path()
    }

    /// A `fluxo` command bound to this environment's directories.
    pub fn fluxo(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_fluxo"));
        cmd.env("FLUXO_DATA_DIR", self.data_dir.path());
        cmd.env("FLUXO_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("FLUXO_LOG");
        cmd
    }

    /// Run a command that must succeed and parse its JSON output.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.fluxo().args(args).output().expect("Failed to run fluxo");
        assert!(
            output.status.success(),
            "fluxo {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("Output is not JSON")
    }

    /// Register a process and return the new movement's ID.
    pub fn add_process(&self, number: &str, entry_date: &str, sector: &str) -> String {
        let value = self.json(&[
            "process",
            "add",
            "--number",
            number,
            "--entry-date",
            entry_date,
            "--sector",
            sector,
        ]);
        value["record"]["id"]
            .as_str()
            .expect("record has an id")
            .to_string()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
