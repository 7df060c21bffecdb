//! Expected identity resolution.
//!
//! Maps the signer identity a policy declares (usually a user id) to the
//! identifier gpg will report for signatures made by that certificate:
//!
//! 1. No declared identity → [`KeyLookup::NoIdentity`]
//! 2. No keyring file → [`KeyLookup::NoKeyring`], gpg is not run
//! 3. User id found in the keyring → [`KeyLookup::Mapped`]
//! 4. Otherwise the declared identity verbatim → [`KeyLookup::Unmapped`]

use std::ops::ControlFlow;

use tracing::debug;

use crate::colon::KeyListingScanner;
use crate::command::{GpgCommand, Stdout};
use crate::error::{GpgError, GpgResult};
use crate::keyring::KeyringLocator;
use crate::protocol::ProtocolVariant;
use crate::trust::TrustStoreSession;
use crate::types::{ExpectedMatch, KeyLookup, SignerId, TrustOrigin};

const STEP: &str = "list-keys";

/// Resolves declared identities against origin keyrings.
///
/// Holds no state between calls; every lookup lists the keyring afresh.
#[derive(Debug)]
pub struct IdentityResolver<'g, L: ?Sized> {
    command: &'g GpgCommand,
    session: &'g TrustStoreSession,
    variant: ProtocolVariant,
    locator: &'g L,
}

impl<'g, L: KeyringLocator + ?Sized> IdentityResolver<'g, L> {
    pub fn new(
        command: &'g GpgCommand,
        session: &'g TrustStoreSession,
        variant: ProtocolVariant,
        locator: &'g L,
    ) -> Self {
        Self {
            command,
            session,
            variant,
            locator,
        }
    }

    /// Resolve `expected` within `origin`.
    ///
    /// A listing that exits abnormally is an error, not a miss.
    pub fn resolve(&self, origin: &TrustOrigin, expected: &ExpectedMatch) -> GpgResult<KeyLookup> {
        let Some(id) = expected.id.as_deref() else {
            return Ok(KeyLookup::NoIdentity);
        };

        let Some(keyring) = self.locator.keyring_path(origin, &expected.file) else {
            debug!(origin = %origin.id, file = %expected.file, "could not find keyring");
            return Ok(KeyLookup::NoKeyring);
        };

        let invocation = self.command.invocation(STEP).arg("--quiet").arg("--with-colons");
        let invocation = match self.variant {
            ProtocolVariant::Fingerprint => invocation.arg("--show-keys").arg(&keyring),
            ProtocolVariant::Legacy => invocation
                .arg("--keyring")
                .arg(&keyring)
                .arg("--list-keys"),
        };
        let mut channel = invocation.stdout(Stdout::Pipe).spawn(self.session)?;

        let mut scanner = KeyListingScanner::new(id, self.variant);
        channel.read_lines(|line| scanner.feed(line))?;
        let outcome = channel.finish()?;
        if !outcome.success() {
            return Err(GpgError::AbnormalExit {
                step: STEP,
                program: self.command.program().to_string(),
                outcome,
            });
        }

        Ok(match scanner.finish() {
            Some(mapped) => {
                debug!(
                    origin = %origin.id,
                    keyring = %keyring.display(),
                    "mapped {} -> {}",
                    id,
                    mapped
                );
                KeyLookup::Mapped(mapped)
            }
            None => {
                debug!(
                    origin = %origin.id,
                    keyring = %keyring.display(),
                    "no match, falling back to {}",
                    id
                );
                KeyLookup::Unmapped(SignerId::verbatim(id))
            }
        })
    }
}

// Subprocess behaviour is covered in tests/gpg_backend.rs with a fake gpg.
#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn no_keyrings(_: &TrustOrigin, _: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    #[serial]
    fn test_no_identity_and_no_keyring_skip_gpg() {
        let base = TempDir::new().unwrap();
        let session = TrustStoreSession::acquire_in(base.path()).unwrap();
        // Spawning this would fail loudly.
        let command = GpgCommand::new("/nonexistent/gpg", false);
        let resolver = IdentityResolver::new(
            &command,
            &session,
            ProtocolVariant::Fingerprint,
            &no_keyrings,
        );
        let origin = TrustOrigin::new("origin");

        let lookup = resolver
            .resolve(&origin, &ExpectedMatch::new("debsig.gpg"))
            .unwrap();
        assert_eq!(lookup, KeyLookup::NoIdentity);

        let lookup = resolver
            .resolve(&origin, &ExpectedMatch::new("debsig.gpg").with_id("Someone"))
            .unwrap();
        assert_eq!(lookup, KeyLookup::NoKeyring);
    }

    #[test]
    #[serial]
    fn test_spawn_failure_is_fatal() {
        let base = TempDir::new().unwrap();
        let session = TrustStoreSession::acquire_in(base.path()).unwrap();
        let command = GpgCommand::new("/nonexistent/gpg", false);
        let keyring = base.path().join("debsig.gpg");
        std::fs::write(&keyring, b"").unwrap();
        let locator = move |_: &TrustOrigin, _: &str| Some(keyring.clone());
        let resolver =
            IdentityResolver::new(&command, &session, ProtocolVariant::Fingerprint, &locator);

        let err = resolver
            .resolve(
                &TrustOrigin::new("origin"),
                &ExpectedMatch::new("debsig.gpg").with_id("Someone"),
            )
            .unwrap_err();
        assert!(matches!(err, GpgError::Spawn { step: "list-keys", .. }));
    }
}
