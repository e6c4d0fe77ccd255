//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use watchrelay::{Meta, RelayConfig, VersionedResource, WatchRelay};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(flatten)]
    pub meta: Meta,
    pub uuid: String,
}

impl VersionedResource for Task {
    fn resource_version(&self) -> u64 {
        self.meta.resource_version
    }
    fn set_resource_version(&mut self, version: u64) {
        self.meta.resource_version = version;
    }
    fn resource_key(&self) -> String {
        self.uuid.clone()
    }
}

pub fn task(uuid: &str) -> Task {
    Task {
        meta: Meta::default(),
        uuid: uuid.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: Meta,
    pub name: String,
}

impl VersionedResource for User {
    fn resource_version(&self) -> u64 {
        self.meta.resource_version
    }
    fn set_resource_version(&mut self, version: u64) {
        self.meta.resource_version = version;
    }
    fn resource_key(&self) -> String {
        self.name.clone()
    }
}

pub fn user(name: &str) -> User {
    User {
        meta: Meta::default(),
        name: name.to_string(),
    }
}

/// Short intervals so the suites run in milliseconds, not poll seconds.
pub fn fast_config() -> RelayConfig {
    RelayConfig::new()
        .with_poll_interval(Duration::from_millis(20))
        .with_gap_fill_delay(Duration::from_millis(60))
}

pub fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

pub fn open_relay(dir: &TempDir) -> WatchRelay {
    open_relay_with(dir, fast_config())
}

pub fn open_relay_with(dir: &TempDir, config: RelayConfig) -> WatchRelay {
    let conn = rusqlite::Connection::open(db_path(dir)).unwrap();
    WatchRelay::with_config(conn, config).unwrap()
}

/// A second connection onto the relay's database, for asserting on raw
/// table state from the outside.
pub fn inspect_conn(dir: &TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(db_path(dir)).unwrap()
}

fn db_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("relay.db")
}
