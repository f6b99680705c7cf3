/*!
 * Shared test helpers
 * Unique per-test namespaces plus a long-lived decoy child whose pid can
 * stand in as a live second instance within one test process
 */

use procwarden::{Pid, RegistryConfig};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU32, Ordering};

static SEQ: AtomicU32 = AtomicU32::new(0);

/// Namespace unique to this test invocation, so parallel tests (and stale
/// objects from earlier runs) never collide.
pub fn unique_namespace(tag: &str) -> String {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("pwtest-{tag}-{}-{seq}", std::process::id())
}

pub fn config(namespace: &str) -> RegistryConfig {
    RegistryConfig::with_namespace(namespace)
}

pub fn config_as(namespace: &str, instance: Pid) -> RegistryConfig {
    RegistryConfig {
        namespace: namespace.to_owned(),
        instance_id: Some(instance),
    }
}

/// A sleeping child whose pid impersonates a second live instance. Liveness
/// probes against it succeed until the guard drops.
pub struct Decoy {
    child: Child,
}

impl Decoy {
    pub fn spawn() -> Self {
        let child = Command::new("sleep")
            .arg("300")
            .spawn()
            .expect("spawn decoy sleep");
        Self { child }
    }

    pub fn pid(&self) -> Pid {
        self.child.id() as Pid
    }
}

impl Drop for Decoy {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
