//! Value types shared by the backend components.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolVariant;

/// Default executable name for the external verifier.
pub const DEFAULT_GPG_PROGRAM: &str = "gpg";

/// A trust domain (vendor or distribution) declared by policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustOrigin {
    /// Origin identifier, also the keyring subdirectory name.
    pub id: String,

    /// Human-readable origin name.
    #[serde(default)]
    pub name: Option<String>,
}

impl TrustOrigin {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Expected signer for one signature type of an origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMatch {
    /// Keyring file name inside the origin's keyring directory.
    pub file: String,

    /// Expected signer identity (user id, key id or fingerprint).
    #[serde(default)]
    pub id: Option<String>,
}

impl ExpectedMatch {
    /// Match against `file` with no declared identity.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            id: None,
        }
    }

    /// Declare the expected signer identity.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A signer identifier: short key id, fingerprint, or a declared identity
/// used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerId(String);

impl SignerId {
    /// Identifier taken from gpg output; hexadecimal ids are uppercased.
    pub fn from_hex(id: &str) -> Self {
        Self(id.to_ascii_uppercase())
    }

    /// Identifier kept exactly as declared.
    pub fn verbatim(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a full v4 fingerprint.
    pub fn is_fingerprint(&self) -> bool {
        self.0.len() == crate::packets::FINGERPRINT_LEN
            && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for SignerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SignerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Result of mapping a declared identity through an origin keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// A keyring certificate carries the declared user id.
    Mapped(SignerId),

    /// Nothing matched; the declared identity is used verbatim.
    Unmapped(SignerId),

    /// The origin has no such keyring file. No subprocess was run.
    NoKeyring,

    /// The match declares no identity to look up.
    NoIdentity,
}

impl KeyLookup {
    /// The identifier to compare against the signature, if any.
    pub fn signer_id(&self) -> Option<&SignerId> {
        match self {
            Self::Mapped(id) | Self::Unmapped(id) => Some(id),
            Self::NoKeyring | Self::NoIdentity => None,
        }
    }

    pub fn into_signer_id(self) -> Option<SignerId> {
        match self {
            Self::Mapped(id) | Self::Unmapped(id) => Some(id),
            Self::NoKeyring | Self::NoIdentity => None,
        }
    }
}

/// Verdict of one detached-signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Whether gpg accepted the signature.
    pub verified: bool,

    /// Why verification failed or was not attempted.
    pub diagnostic: Option<String>,
}

impl VerificationOutcome {
    pub fn verified() -> Self {
        Self {
            verified: true,
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            verified: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgConfig {
    /// gpg executable name or path.
    #[serde(default = "default_program")]
    pub program: String,

    /// Let gpg write to stderr, and to stdout when verifying.
    #[serde(default)]
    pub verbose: bool,

    /// Listing protocol to assume. Probed from `gpg --version` when unset.
    #[serde(default)]
    pub protocol: Option<ProtocolVariant>,

    /// Upper bound for a single `--verify` run, in seconds.
    #[serde(default)]
    pub verify_timeout_secs: Option<u64>,
}

fn default_program() -> String {
    DEFAULT_GPG_PROGRAM.to_string()
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            verbose: false,
            protocol: None,
            verify_timeout_secs: None,
        }
    }
}

impl GpgConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `DEBSIG_GNUPG_PROGRAM` | gpg executable (default: `gpg`) |
    /// | `DEBSIG_GNUPG_VERBOSE` | Show gpg diagnostics (`1` or `true`) |
    /// | `DEBSIG_GNUPG_PROTOCOL` | `legacy` or `fingerprint`, skips version probing |
    /// | `DEBSIG_GNUPG_TIMEOUT` | Verification timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            program: std::env::var("DEBSIG_GNUPG_PROGRAM")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_program),
            verbose: std::env::var("DEBSIG_GNUPG_VERBOSE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            protocol: std::env::var("DEBSIG_GNUPG_PROTOCOL").ok().and_then(|v| {
                let parsed = v.parse().ok();
                if parsed.is_none() {
                    tracing::warn!(value = %v, "ignoring unknown DEBSIG_GNUPG_PROTOCOL");
                }
                parsed
            }),
            verify_timeout_secs: std::env::var("DEBSIG_GNUPG_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0),
        }
    }

    /// Set the gpg executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Enable or disable gpg diagnostics.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Pin the listing protocol.
    pub fn with_protocol(mut self, protocol: ProtocolVariant) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Bound the verification run.
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn verify_timeout(&self) -> Option<Duration> {
        self.verify_timeout_secs.map(Duration::from_secs)
    }
}
