//! Front end for a long-lived process serving many ADD/DEL requests.
//!
//! Every request runs start to finish on its own freshly spawned OS thread.
//! Namespace switches are per thread, so the work must never be handed to a
//! pooled executor thread that could be reused mid-operation. All requests
//! share one [`KeyLock`].

use std::panic;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{info_span, warn};
use uuid::Uuid;

use crate::config::{KeyLockConfig, NetConf};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::ipam::Ipam;
use crate::keylock::KeyLock;
use crate::plugin::{DelOutcome, EniPlugin};
use crate::types::{CmdArgs, Result as CniResult};

#[derive(Clone)]
pub struct Coordinator {
    lock: Arc<KeyLock>,
    ipam: Arc<dyn Ipam>,
    driver: Arc<dyn Driver>,
}

impl Coordinator {
    pub fn new(lock_config: KeyLockConfig, ipam: Arc<dyn Ipam>, driver: Arc<dyn Driver>) -> Self {
        Self::with_lock(Arc::new(KeyLock::with_config(lock_config)), ipam, driver)
    }

    pub fn with_lock(lock: Arc<KeyLock>, ipam: Arc<dyn Ipam>, driver: Arc<dyn Driver>) -> Self {
        Self { lock, ipam, driver }
    }

    pub fn lock(&self) -> &Arc<KeyLock> {
        &self.lock
    }

    fn plugin(&self, config: NetConf, args: CmdArgs) -> EniPlugin {
        EniPlugin::new(config, args, self.ipam.clone(), self.driver.clone()).with_lock(self.lock.clone())
    }

    pub async fn attach(&self, config: NetConf, args: CmdArgs) -> Result<CniResult> {
        let plugin = self.plugin(config, args);
        run_dedicated("add", move || plugin.add_network()).await
    }

    pub async fn detach(&self, config: NetConf, args: CmdArgs) -> Result<DelOutcome> {
        let plugin = self.plugin(config, args);
        run_dedicated("del", move || plugin.del_network()).await
    }
}

/// Run `f` on a new thread and await its result. A panic in `f` (a broken
/// lock pairing, for one) is re-raised in the caller.
async fn run_dedicated<T, F>(kind: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let op = Uuid::new_v4();
    let (tx, rx) = oneshot::channel();

    let handle = thread::Builder::new()
        .name(format!("eni-{}", kind))
        .spawn(move || {
            let span = info_span!("eni_op", %op, kind);
            let _enter = span.enter();
            let _ = tx.send(f());
        })
        .map_err(|e| Error::Worker(format!("failed to spawn {} worker: {}", kind, e)))?;

    match rx.await {
        Ok(result) => result,
        Err(_) => {
            let joined = tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| Error::Worker(e.to_string()))?;
            match joined {
                Err(payload) => panic::resume_unwind(payload),
                Ok(()) => {
                    warn!(%op, kind, "worker exited without a result");
                    Err(Error::Worker(format!("{} worker exited without a result", kind)))
                }
            }
        }
    }
}
