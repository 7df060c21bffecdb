//! GnuPG backend for package signature verification.
//!
//! All cryptography is delegated to an external `gpg`; this crate owns the
//! parts around it that are easy to get wrong:
//!
//! - A private, per-process `GNUPGHOME` that is always removed again
//! - Hardened gpg invocations with correctly plumbed pipes
//! - Parsing `--with-colons` key listings and `--list-packets` dumps
//! - Mapping a policy's expected signer to the identifier gpg reports
//! - Reducing `gpg --verify` to a yes/no verdict
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use debsig_gpg::{ExpectedMatch, Gpg, GpgConfig, OpenPgpBackend, TrustOrigin};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gpg = Gpg::new(GpgConfig::from_env());
//! let origin = TrustOrigin::new("4A8F1B2C3D4E5F60");
//! let expected =
//!     ExpectedMatch::new("debsig.gpg").with_id("Example Archive <sign@example.org>");
//!
//! let claimed = gpg.key_id(&origin, &expected)?;
//! let mut sig = std::fs::File::open("_gpgorigin")?;
//! let len = sig.metadata()?.len();
//! let actual = gpg.sig_key_id(&mut sig, len)?;
//!
//! if claimed.signer_id().is_some() && claimed.signer_id() == actual.as_ref() {
//!     let sig_path = Path::new("_gpgorigin");
//!     let outcome = gpg.sig_verify(&origin, &expected, Path::new("data"), sig_path)?;
//!     println!("verified: {}", outcome.verified);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `DEBSIG_GNUPG_PROGRAM` | gpg executable (default: `gpg`) |
//! | `DEBSIG_GNUPG_VERBOSE` | Pass gpg diagnostics through |
//! | `DEBSIG_GNUPG_PROTOCOL` | `legacy` or `fingerprint`; probed when unset |
//! | `DEBSIG_GNUPG_TIMEOUT` | Seconds before a `--verify` run is killed |
//!
//! `GNUPGHOME` is written, not read: it points spawned gpg processes at the
//! session directory.

pub mod backend;
pub mod colon;
pub mod command;
pub mod error;
pub mod keyring;
pub mod packets;
pub mod protocol;
pub mod resolver;
pub mod trust;
pub mod types;
pub mod verify;

// Re-export main types
pub use backend::{Gpg, OpenPgpBackend};
pub use colon::{colon_field, ColonField, ColonRecord, KeyListingScanner, RecordKind};
pub use command::{ExitOutcome, GpgCommand, BASELINE_ARGS};
pub use error::{GpgError, GpgResult};
pub use keyring::{KeyringDir, KeyringLocator, DEFAULT_KEYRINGS_DIR};
pub use packets::{PacketListScanner, PacketLister, FINGERPRINT_LEN};
pub use protocol::ProtocolVariant;
pub use resolver::IdentityResolver;
pub use trust::{TrustStoreSession, GNUPGHOME};
pub use types::{
    ExpectedMatch, GpgConfig, KeyLookup, SignerId, TrustOrigin, VerificationOutcome,
    DEFAULT_GPG_PROGRAM,
};
pub use verify::VerificationInvoker;
