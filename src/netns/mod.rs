//! Scoped network namespace handles.
//!
//! `setns(2)` applies to the calling thread only. Everything run through
//! [`NetNs::run`] must stay on that thread until it returns.

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;
use std::os::unix::io::RawFd;
use tracing::{debug, error};

/// Namespace of the calling thread, not the process leader
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

#[derive(Debug, thiserror::Error)]
pub enum NetnsError {
    #[error("network namespace {0} does not exist")]
    NotFound(String),

    #[error("failed to open network namespace {path}: {source}")]
    Open { path: String, source: Errno },

    #[error("failed to enter network namespace {path}: {source}")]
    Enter { path: String, source: Errno },
}

/// Open handle to a network namespace; the descriptor is closed on drop
#[derive(Debug)]
pub struct NetNs {
    fd: RawFd,
    path: String,
}

impl NetNs {
    pub fn open(path: &str) -> Result<Self, NetnsError> {
        let fd = open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()).map_err(|e| {
            if e == Errno::ENOENT {
                NetnsError::NotFound(path.to_string())
            } else {
                NetnsError::Open {
                    path: path.to_string(),
                    source: e,
                }
            }
        })?;
        Ok(Self {
            fd,
            path: path.to_string(),
        })
    }

    /// Handle to the namespace the calling thread is in right now
    pub fn current() -> Result<Self, NetnsError> {
        Self::open(THREAD_NETNS)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn enter(&self) -> Result<(), NetnsError> {
        setns(self.fd, CloneFlags::CLONE_NEWNET).map_err(|e| NetnsError::Enter {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Run `f` inside this namespace and switch the thread back afterwards,
    /// whether `f` succeeded or not
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<NetnsError>,
    {
        let original = NetNs::current()?;
        self.enter()?;
        debug!(netns = %self.path, "entered network namespace");

        let result = f();

        if let Err(e) = original.enter() {
            // The thread is now stuck in the pod namespace.
            error!(error = %e, "failed to restore original network namespace");
            return Err(e.into());
        }
        result
    }
}

impl Drop for NetNs {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}
