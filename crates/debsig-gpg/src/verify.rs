//! Detached signature verification.
//!
//! The only place a cryptographic verdict is produced. gpg's exit status is
//! the verdict: a normal zero exit verifies, anything else (non-zero exit,
//! signal, timeout kill) does not.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::command::{GpgCommand, Stdin, Stdout};
use crate::error::GpgResult;
use crate::keyring::KeyringLocator;
use crate::trust::TrustStoreSession;
use crate::types::{ExpectedMatch, TrustOrigin, VerificationOutcome};

const STEP: &str = "verify";

/// Runs `gpg --verify` against one origin keyring.
#[derive(Debug)]
pub struct VerificationInvoker<'g, L: ?Sized> {
    command: &'g GpgCommand,
    session: &'g TrustStoreSession,
    locator: &'g L,
    timeout: Option<Duration>,
}

impl<'g, L: KeyringLocator + ?Sized> VerificationInvoker<'g, L> {
    pub fn new(command: &'g GpgCommand, session: &'g TrustStoreSession, locator: &'g L) -> Self {
        Self {
            command,
            session,
            locator,
            timeout: None,
        }
    }

    /// Kill gpg and fail verification after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verify the detached signature `sig` over `data` with the keyring of
    /// `expected`.
    ///
    /// Only infrastructure failures (gpg cannot be started or waited for)
    /// are errors.
    pub fn verify(
        &self,
        origin: &TrustOrigin,
        expected: &ExpectedMatch,
        data: &Path,
        sig: &Path,
    ) -> GpgResult<VerificationOutcome> {
        let Some(keyring) = self.locator.keyring_path(origin, &expected.file) else {
            debug!(origin = %origin.id, file = %expected.file, "could not find keyring");
            return Ok(VerificationOutcome::failed(format!(
                "could not find {} keyring",
                expected.file
            )));
        };

        let stdout = if self.command.verbose() {
            Stdout::Inherit
        } else {
            Stdout::Null
        };
        let channel = self
            .command
            .invocation(STEP)
            .arg("--keyring")
            .arg(&keyring)
            .arg("--verify")
            .arg(sig)
            .arg(data)
            .stdin(Stdin::Null)
            .stdout(stdout)
            .spawn(self.session)?;

        let outcome = channel.finish_within(self.timeout)?;
        if outcome.success() {
            debug!(origin = %origin.id, keyring = %keyring.display(), "signature verified");
            Ok(VerificationOutcome::verified())
        } else {
            debug!(
                origin = %origin.id,
                keyring = %keyring.display(),
                %outcome,
                "gpg exited abnormally or with non-zero exit status"
            );
            Ok(VerificationOutcome::failed(format!(
                "{} {}",
                self.command.program(),
                outcome
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_missing_keyring_is_not_attempted() {
        let base = TempDir::new().unwrap();
        let session = TrustStoreSession::acquire_in(base.path()).unwrap();
        let command = GpgCommand::new("/nonexistent/gpg", false);
        let locator = |_: &TrustOrigin, _: &str| -> Option<PathBuf> { None };
        let invoker = VerificationInvoker::new(&command, &session, &locator);

        let outcome = invoker
            .verify(
                &TrustOrigin::new("origin"),
                &ExpectedMatch::new("debsig.gpg"),
                Path::new("data"),
                Path::new("data.sig"),
            )
            .unwrap();
        assert!(!outcome.verified);
        assert_eq!(
            outcome.diagnostic.as_deref(),
            Some("could not find debsig.gpg keyring")
        );
    }
}
