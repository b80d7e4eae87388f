//! Cooperative cancellation on SIGINT/SIGTERM.
//!
//! The signal handler only flips an atomic flag. The pipeline polls
//! [`InterruptGuard::is_interrupted`] between stages; the first poll that
//! observes the flag removes the registered build directory, later polls
//! just report the interrupt. A running external command is never
//! preempted by this layer.
//!
//! The guard is an explicit value threaded through the runner rather than
//! process-wide state. Clones share the same state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::warn;

use crate::artifact::filesystem::remove_tree;

#[derive(Debug, Clone, Default)]
pub struct InterruptGuard {
    flag: Arc<AtomicBool>,
    state: Arc<Mutex<CleanupState>>,
}

#[derive(Debug, Default)]
struct CleanupState {
    dir: Option<PathBuf>,
    handled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM to this guard. Only one handler can be
    /// installed per process.
    pub fn install(&self) -> Result<()> {
        let flag = Arc::clone(&self.flag);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to set signal handler")
    }

    /// Mark the build as interrupted, as the signal handler would.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Directory to remove if the build is interrupted. Replaces any
    /// previously registered directory.
    pub fn register(&self, dir: &Path) {
        let mut state = self.lock();
        state.dir = Some(dir.to_path_buf());
    }

    /// Whether a signal has arrived. The first call that sees it performs
    /// the cleanup; it runs at most once until [`clear`](Self::clear).
    pub fn is_interrupted(&self) -> bool {
        if !self.flag.load(Ordering::SeqCst) {
            return false;
        }

        let mut state = self.lock();
        if !state.handled {
            state.handled = true;
            warn!("Build interrupted by signal, cleaning up...");
            if let Some(dir) = state.dir.take() {
                if let Err(e) = remove_tree(&dir) {
                    warn!("{:#}", e);
                }
            }
        }
        true
    }

    /// Forget the registered directory and any pending interrupt. Called
    /// after the runner's own cleanup so a late signal cannot trigger a
    /// second removal.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.dir = None;
        state.handled = false;
        self.flag.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CleanupState> {
        // A poisoned lock still holds consistent state: every writer
        // completes its update before any code that could panic.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn build_dir(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join("build");
        fs::create_dir_all(dir.join("base/etc")).unwrap();
        fs::write(dir.join("base/etc/hostname"), "limeos").unwrap();
        dir
    }

    #[test]
    fn quiet_until_triggered() {
        let temp = TempDir::new().unwrap();
        let dir = build_dir(&temp);
        let guard = InterruptGuard::new();
        guard.register(&dir);

        assert!(!guard.is_interrupted());
        assert!(dir.exists());
    }

    #[test]
    fn first_poll_cleans_up_once() {
        let temp = TempDir::new().unwrap();
        let dir = build_dir(&temp);
        let guard = InterruptGuard::new();
        guard.register(&dir);
        guard.trigger();

        assert!(guard.is_interrupted());
        assert!(!dir.exists());

        // Recreate the directory: a second poll must not remove it again.
        fs::create_dir_all(&dir).unwrap();
        assert!(guard.is_interrupted());
        assert!(dir.exists());
    }

    #[test]
    fn clear_requires_fresh_interrupt() {
        let temp = TempDir::new().unwrap();
        let dir = build_dir(&temp);
        let guard = InterruptGuard::new();
        guard.register(&dir);
        guard.trigger();
        assert!(guard.is_interrupted());

        guard.clear();
        assert!(!guard.is_interrupted());

        fs::create_dir_all(&dir).unwrap();
        guard.register(&dir);
        assert!(!guard.is_interrupted());
        assert!(dir.exists());

        guard.trigger();
        assert!(guard.is_interrupted());
        assert!(!dir.exists());
    }

    #[test]
    fn clear_drops_registered_dir() {
        let temp = TempDir::new().unwrap();
        let dir = build_dir(&temp);
        let guard = InterruptGuard::new();
        guard.register(&dir);
        guard.clear();

        guard.trigger();
        assert!(guard.is_interrupted());
        assert!(dir.exists());
    }

    #[test]
    fn clones_share_state() {
        let guard = InterruptGuard::new();
        let handle = guard.clone();
        handle.trigger();
        assert!(guard.is_interrupted());
    }

    #[test]
    fn interrupt_without_registered_dir() {
        let guard = InterruptGuard::new();
        guard.trigger();
        assert!(guard.is_interrupted());
    }
}
