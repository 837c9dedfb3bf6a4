//! Shared helpers for the workspace test suites.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Install the env-filtered fmt subscriber once per process; later calls are
/// no-ops so every test can invoke this first.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A name unique within this process run, for in-proc addresses and
/// similar shared namespaces.
pub fn unique_name(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// A fresh Unix socket path under the system temp dir. Any leftover file
/// from a crashed run is removed.
pub fn temp_sock_path(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("uvrpc-{}.sock", unique_name(tag)));
    let _ = std::fs::remove_file(&path);
    path
}
