//! Cooperative stop handling.
//!
//! The first interrupt only raises a flag that the orchestrator polls between
//! items. The second one kills the active child process and exits at once.

use std::io;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::CategoryError;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Default)]
struct Inner {
    requests: AtomicUsize,
    child: Mutex<Option<Child>>,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requests.load(Ordering::SeqCst) > 0
    }

    /// Registers one stop request and returns how many have been made so far.
    pub fn request(&self) -> usize {
        self.inner.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Installs the SIGINT/SIGTERM handler for this token.
    pub fn install_handler(&self) -> Result<(), CategoryError> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.request() == 1 {
                warn!("graceful stop requested; finishing current download (interrupt again to force quit)");
                return;
            }
            warn!("force quit");
            token.kill_child();
            std::process::exit(FORCED_EXIT_CODE);
        })
        .map_err(|err| CategoryError::InvalidArgument(format!("signal handler: {err}")))
    }

    /// Spawns `cmd` and waits for it, keeping the child reachable for a
    /// forced quit.
    pub fn run_child(&self, cmd: &mut Command) -> io::Result<ExitStatus> {
        let child = cmd.spawn()?;
        self.lock_child().replace(child);
        loop {
            let mut slot = self.lock_child();
            let Some(child) = slot.as_mut() else {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "child was killed"));
            };
            if let Some(status) = child.try_wait()? {
                slot.take();
                return Ok(status);
            }
            drop(slot);
            thread::sleep(CHILD_POLL_INTERVAL);
        }
    }

    fn kill_child(&self) {
        if let Some(mut child) = self.lock_child().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.inner
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        assert_eq!(clone.request(), 1);
        assert!(token.is_cancelled());
        assert_eq!(token.request(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn run_child_reports_exit_status() {
        let token = CancelToken::new();
        let ok = token.run_child(Command::new("true").arg("x")).unwrap();
        assert!(ok.success());
        let failed = token.run_child(&mut Command::new("false")).unwrap();
        assert!(!failed.success());
    }
}
