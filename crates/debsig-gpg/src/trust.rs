//! Process-scoped gpg trust store.
//!
//! gpg insists on a writable home for its trustdb and random seed even when
//! every keyring is passed explicitly. Each process gets one private home,
//! created on first use under a randomised name and removed when the last
//! [`TrustStoreSession`] handle is dropped, whichever path drops it.
//!
//! ```text
//! $TMPDIR/debsig-verify.XXXXXX/   # GNUPGHOME for every spawned gpg
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{GpgError, GpgResult};

/// Environment variable gpg reads its home directory from.
pub const GNUPGHOME: &str = "GNUPGHOME";

/// Name prefix of the private home directory.
const TEMPDIR_PREFIX: &str = "debsig-verify.";

/// The live session, if any. Weak so the registry never keeps it alive.
static ACTIVE: Mutex<Weak<SessionInner>> = Mutex::new(Weak::new());

/// Handle to the process trust-store directory.
///
/// Cloning is cheap; all clones share one directory.
#[derive(Debug, Clone)]
pub struct TrustStoreSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// `None` once released explicitly.
    dir: Option<TempDir>,

    path: PathBuf,

    /// `GNUPGHOME` as it was before the session took over.
    previous_home: Option<OsString>,
}

impl TrustStoreSession {
    /// Get the process session, creating it under the system temp dir.
    pub fn acquire() -> GpgResult<Self> {
        Self::acquire_in(std::env::temp_dir())
    }

    /// Get the process session, creating it under `parent` if none is live.
    ///
    /// While a session is live `parent` is ignored and the existing
    /// directory is returned.
    pub fn acquire_in(parent: impl AsRef<Path>) -> GpgResult<Self> {
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(inner) = active.upgrade() {
            return Ok(Self { inner });
        }

        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(TEMPDIR_PREFIX)
            .tempdir_in(parent)
            .map_err(|source| GpgError::TrustStore {
                template: parent
                    .join(format!("{}XXXXXX", TEMPDIR_PREFIX))
                    .display()
                    .to_string(),
                source,
            })?;
        let path = dir.path().to_path_buf();

        let previous_home = std::env::var_os(GNUPGHOME);
        std::env::set_var(GNUPGHOME, &path);
        if std::env::var_os(GNUPGHOME).as_deref() != Some(path.as_os_str()) {
            match &previous_home {
                Some(previous) => std::env::set_var(GNUPGHOME, previous),
                None => std::env::remove_var(GNUPGHOME),
            }
            // `dir` drops here and removes the directory again.
            return Err(GpgError::Environment {
                name: GNUPGHOME.to_string(),
                value: path.display().to_string(),
            });
        }

        debug!(path = %path.display(), "created gpg trust store");

        let inner = Arc::new(SessionInner {
            dir: Some(dir),
            path,
            previous_home,
        });
        *active = Arc::downgrade(&inner);
        Ok(Self { inner })
    }

    /// Whether a session is live in this process.
    pub fn is_active() -> bool {
        ACTIVE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }

    /// The directory exported as `GNUPGHOME`.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Drop this handle; if it was the last one, remove the directory and
    /// report removal errors instead of only logging them.
    pub fn release(self) -> GpgResult<()> {
        let Ok(mut inner) = Arc::try_unwrap(self.inner) else {
            return Ok(());
        };
        let Some(dir) = inner.dir.take() else {
            return Ok(());
        };
        let path = inner.path.clone();
        // Restores GNUPGHOME via Drop before the directory goes away.
        drop(inner);
        dir.close()
            .map_err(|source| GpgError::Cleanup { path, source })
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer session may already own GNUPGHOME.
        if active.strong_count() == 0 {
            match self.previous_home.take() {
                Some(previous) => std::env::set_var(GNUPGHOME, previous),
                None => std::env::remove_var(GNUPGHOME),
            }
        }
        drop(active);

        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "cannot remove gpg trust store");
            } else {
                debug!(path = %self.path.display(), "removed gpg trust store");
            }
        }
    }
}
