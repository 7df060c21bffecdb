//! Keyring file lookup.
//!
//! Keyrings live per origin:
//!
//! ```text
//! {root}/usr/share/debsig/keyrings/{origin}/{file}
//! ```
//!
//! A missing file is not an error; callers report "no keyring" and move on.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::types::TrustOrigin;

/// Default keyrings directory below the root.
pub const DEFAULT_KEYRINGS_DIR: &str = "/usr/share/debsig/keyrings";

/// Resolves an origin's keyring file to an existing path.
pub trait KeyringLocator {
    fn keyring_path(&self, origin: &TrustOrigin, file: &str) -> Option<PathBuf>;
}

impl<F> KeyringLocator for F
where
    F: Fn(&TrustOrigin, &str) -> Option<PathBuf>,
{
    fn keyring_path(&self, origin: &TrustOrigin, file: &str) -> Option<PathBuf> {
        self(origin, file)
    }
}

/// Directory-backed keyring layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringDir {
    root: PathBuf,
    keyrings_dir: PathBuf,
}

impl Default for KeyringDir {
    fn default() -> Self {
        Self::new("/", DEFAULT_KEYRINGS_DIR)
    }
}

impl KeyringDir {
    /// Layout rooted at `root` (e.g. an alternate install root).
    pub fn new(root: impl Into<PathBuf>, keyrings_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keyrings_dir: keyrings_dir.into(),
        }
    }

    /// Default keyrings directory under another root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DEFAULT_KEYRINGS_DIR)
    }

    /// The path a keyring would have, whether or not it exists.
    pub fn candidate(&self, origin: &TrustOrigin, file: &str) -> Option<PathBuf> {
        if !is_single_component(&origin.id) || !is_single_component(file) {
            warn!(origin = %origin.id, file, "refusing keyring path outside keyrings directory");
            return None;
        }
        // Keyrings dir is absolute within the root, like `root + dir`.
        let relative = self
            .keyrings_dir
            .strip_prefix("/")
            .unwrap_or(&self.keyrings_dir);
        Some(self.root.join(relative).join(&origin.id).join(file))
    }
}

impl KeyringLocator for KeyringDir {
    fn keyring_path(&self, origin: &TrustOrigin, file: &str) -> Option<PathBuf> {
        let path = self.candidate(origin, file)?;
        if path.is_file() {
            Some(path)
        } else {
            debug!(keyring = %path.display(), "keyring not found");
            None
        }
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_layout() {
        let dir = KeyringDir::with_root("/srv/chroot");
        let origin = TrustOrigin::new("4A8F1B2C3D4E5F60");
        assert_eq!(
            dir.candidate(&origin, "debsig.gpg").unwrap(),
            PathBuf::from("/srv/chroot/usr/share/debsig/keyrings/4A8F1B2C3D4E5F60/debsig.gpg")
        );
        assert_eq!(
            KeyringDir::default().candidate(&origin, "debsig.gpg").unwrap(),
            PathBuf::from("/usr/share/debsig/keyrings/4A8F1B2C3D4E5F60/debsig.gpg")
        );
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = KeyringDir::default();
        assert!(dir.candidate(&TrustOrigin::new(".."), "debsig.gpg").is_none());
        assert!(dir
            .candidate(&TrustOrigin::new("origin"), "../../etc/shadow")
            .is_none());
        assert!(dir.candidate(&TrustOrigin::new("a/b"), "debsig.gpg").is_none());
        assert!(dir.candidate(&TrustOrigin::new(""), "debsig.gpg").is_none());
    }

    #[test]
    fn test_existing_keyring_found() {
        let root = TempDir::new().unwrap();
        let keyring_dir = root.path().join("keyrings/origin");
        std::fs::create_dir_all(&keyring_dir).unwrap();
        std::fs::write(keyring_dir.join("debsig.gpg"), b"keyring").unwrap();

        let dir = KeyringDir::new(root.path(), "/keyrings");
        let origin = TrustOrigin::new("origin");
        assert_eq!(
            dir.keyring_path(&origin, "debsig.gpg").unwrap(),
            keyring_dir.join("debsig.gpg")
        );
        assert!(dir.keyring_path(&origin, "missing.gpg").is_none());
    }

    #[test]
    fn test_closure_locator() {
        let locator = |origin: &TrustOrigin, file: &str| {
            (origin.id == "o").then(|| PathBuf::from(format!("/k/{}", file)))
        };
        assert_eq!(
            locator.keyring_path(&TrustOrigin::new("o"), "f.gpg"),
            Some(PathBuf::from("/k/f.gpg"))
        );
        assert!(locator.keyring_path(&TrustOrigin::new("x"), "f.gpg").is_none());
    }
}
