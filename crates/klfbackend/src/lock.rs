//! The process-wide render lock and the ghostscript version cache it guards.
//!
//! Only one render runs at a time per process, so work directories and the version cache are
//! never touched concurrently.

use crate::gs::{GsVersion, query_gs_version};
use crate::process::ProcessRunner;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

#[derive(Debug, Default)]
struct SharedState {
    gs_versions: FxHashMap<PathBuf, GsVersion>,
}

fn shared() -> &'static Mutex<SharedState> {
    static STATE: OnceLock<Mutex<SharedState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(SharedState::default()))
}

fn lock_shared() -> MutexGuard<'static, SharedState> {
    match shared().lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            // The state is a pure cache; whatever a panicking render left behind is still valid.
            tracing::warn!(
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned render lock"
            );
            poisoned.into_inner()
        }
    }
}

/// Access to shared state while holding the render lock.
pub struct RenderSession<'a> {
    state: MutexGuard<'a, SharedState>,
}

impl RenderSession<'_> {
    /// Returns the memoized version for `gs_exec`, querying `gs --version` on first use.
    ///
    /// Failed queries are not memoized.
    pub fn gs_version(&mut self, runner: &dyn ProcessRunner, gs_exec: &Path) -> Option<GsVersion> {
        if let Some(version) = self.state.gs_versions.get(gs_exec) {
            return Some(*version);
        }
        let version = query_gs_version(runner, gs_exec)?;
        tracing::debug!(
            program = %gs_exec.display(),
            version = %version,
            "detected ghostscript version"
        );
        self.state
            .gs_versions
            .insert(gs_exec.to_path_buf(), version);
        Some(version)
    }
}

/// Runs `f` while holding the process-wide render lock.
///
/// The lock is released on every exit path, including panics inside `f`.
pub fn with_exclusive_render<R>(f: impl FnOnce(&mut RenderSession<'_>) -> R) -> R {
    let mut session = RenderSession {
        state: lock_shared(),
    };
    f(&mut session)
}

/// Memoized ghostscript version lookup for callers outside a render.
pub fn gs_version_with(runner: &dyn ProcessRunner, gs_exec: &Path) -> Option<GsVersion> {
    with_exclusive_render(|session| session.gs_version(runner, gs_exec))
}
