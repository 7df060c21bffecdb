//! OpenPGP backend seam and its GnuPG implementation.

use std::cell::OnceCell;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::command::GpgCommand;
use crate::error::GpgResult;
use crate::keyring::{KeyringDir, KeyringLocator};
use crate::packets::PacketLister;
use crate::protocol::ProtocolVariant;
use crate::resolver::IdentityResolver;
use crate::trust::TrustStoreSession;
use crate::types::{
    ExpectedMatch, GpgConfig, KeyLookup, SignerId, TrustOrigin, VerificationOutcome,
};
use crate::verify::VerificationInvoker;

/// What a package signature verifier needs from an OpenPGP implementation.
pub trait OpenPgpBackend {
    /// Executable driven by this backend.
    fn program(&self) -> &str;

    /// Canonical identifier for the identity `expected` declares.
    fn key_id(&self, origin: &TrustOrigin, expected: &ExpectedMatch) -> GpgResult<KeyLookup>;

    /// Signer named by the first `len` bytes of `signature`, `None` when
    /// unresolvable.
    fn sig_key_id(
        &self,
        signature: &mut (dyn Read + Send),
        len: u64,
    ) -> GpgResult<Option<SignerId>>;

    /// Cryptographic verdict for the detached signature `sig` over `data`.
    fn sig_verify(
        &self,
        origin: &TrustOrigin,
        expected: &ExpectedMatch,
        data: &Path,
        sig: &Path,
    ) -> GpgResult<VerificationOutcome>;
}

/// GnuPG backend.
///
/// The trust-store session is acquired on the first operation that runs
/// gpg and released when the backend (and every other session handle) is
/// dropped. The listing protocol is fixed by configuration or probed once.
#[derive(Debug)]
pub struct Gpg<L = KeyringDir> {
    config: GpgConfig,
    command: GpgCommand,
    locator: L,
    temp_root: Option<PathBuf>,
    session: OnceCell<TrustStoreSession>,
    variant: OnceCell<ProtocolVariant>,
}

impl Gpg<KeyringDir> {
    /// Backend over the default keyrings directory.
    pub fn new(config: GpgConfig) -> Self {
        Self::with_locator(config, KeyringDir::default())
    }

    /// Backend configured from `DEBSIG_GNUPG_*` variables.
    pub fn from_env() -> Self {
        Self::new(GpgConfig::from_env())
    }
}

impl<L: KeyringLocator> Gpg<L> {
    pub fn with_locator(config: GpgConfig, locator: L) -> Self {
        let command = GpgCommand::from_config(&config);
        Self {
            config,
            command,
            locator,
            temp_root: None,
            session: OnceCell::new(),
            variant: OnceCell::new(),
        }
    }

    /// Create the trust store under `dir` instead of the system temp dir.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn config(&self) -> &GpgConfig {
        &self.config
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    /// The process trust-store session, acquired on first call.
    pub fn session(&self) -> GpgResult<&TrustStoreSession> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }
        let session = match &self.temp_root {
            Some(dir) => TrustStoreSession::acquire_in(dir)?,
            None => TrustStoreSession::acquire()?,
        };
        Ok(self.session.get_or_init(|| session))
    }

    /// Listing protocol in use.
    pub fn protocol(&self) -> GpgResult<ProtocolVariant> {
        if let Some(variant) = self.variant.get() {
            return Ok(*variant);
        }
        let variant = match self.config.protocol {
            Some(variant) => variant,
            None => ProtocolVariant::probe(&self.command, self.session()?)?,
        };
        Ok(*self.variant.get_or_init(|| variant))
    }

    pub fn resolver(&self) -> GpgResult<IdentityResolver<'_, L>> {
        Ok(IdentityResolver::new(
            &self.command,
            self.session()?,
            self.protocol()?,
            &self.locator,
        ))
    }

    pub fn packet_lister(&self) -> GpgResult<PacketLister<'_>> {
        Ok(PacketLister::new(&self.command, self.session()?, self.protocol()?))
    }

    pub fn invoker(&self) -> GpgResult<VerificationInvoker<'_, L>> {
        Ok(
            VerificationInvoker::new(&self.command, self.session()?, &self.locator)
                .with_timeout(self.config.verify_timeout()),
        )
    }
}

impl<L: KeyringLocator> OpenPgpBackend for Gpg<L> {
    fn program(&self) -> &str {
        self.command.program()
    }

    fn key_id(&self, origin: &TrustOrigin, expected: &ExpectedMatch) -> GpgResult<KeyLookup> {
        // Decide the misses before anything is spawned, protocol probe included.
        if expected.id.is_none() {
            return Ok(KeyLookup::NoIdentity);
        }
        if self.locator.keyring_path(origin, &expected.file).is_none() {
            debug!(origin = %origin.id, file = %expected.file, "could not find keyring");
            return Ok(KeyLookup::NoKeyring);
        }
        self.resolver()?.resolve(origin, expected)
    }

    fn sig_key_id(
        &self,
        signature: &mut (dyn Read + Send),
        len: u64,
    ) -> GpgResult<Option<SignerId>> {
        if len == 0 {
            debug!("empty signature, no signer");
            return Ok(None);
        }
        self.packet_lister()?.signer_id(signature, len)
    }

    fn sig_verify(
        &self,
        origin: &TrustOrigin,
        expected: &ExpectedMatch,
        data: &Path,
        sig: &Path,
    ) -> GpgResult<VerificationOutcome> {
        self.invoker()?.verify(origin, expected, data, sig)
    }
}
