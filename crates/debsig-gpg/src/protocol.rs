//! Listing protocol variants.
//!
//! Old gpg releases only name the signer by its 64-bit key id: the colon
//! listing has no `fpr` record between `pub` and `uid`, and packet dumps carry
//! no issuer fingerprint subpacket. From GnuPG 2.1 on both are present and the
//! fingerprint is the authoritative identifier.

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{GpgCommand, Stdout};
use crate::error::{GpgError, GpgResult};
use crate::trust::TrustStoreSession;

/// First release emitting `fpr` records and issuer fingerprint subpackets.
const FINGERPRINT_SINCE: (u32, u32) = (2, 1);

/// Which identifier the gpg output protocol treats as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// Key id from the `pub` record, `keyid` from the signature packet.
    Legacy,

    /// Fingerprint from the `fpr` record, `issuer fpr` from the signature
    /// packet, key id only as a fallback.
    Fingerprint,
}

impl ProtocolVariant {
    /// Select the variant from `gpg --version` output.
    ///
    /// Only the first line is inspected; its last token is the version.
    pub fn from_version_output(output: &str) -> Option<Self> {
        let first = output.lines().next()?;
        let version = first.split_whitespace().last()?;
        let mut parts = version.split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = parts
            .next()
            .map(|m| m.trim_end_matches(|c: char| !c.is_ascii_digit()))
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);

        if (major, minor) >= FINGERPRINT_SINCE {
            Some(Self::Fingerprint)
        } else {
            Some(Self::Legacy)
        }
    }

    /// Whether the colon listing carries `fpr` records.
    pub fn has_fingerprint_records(self) -> bool {
        matches!(self, Self::Fingerprint)
    }

    /// Run `gpg --version` and select the variant.
    pub fn probe(command: &GpgCommand, session: &TrustStoreSession) -> GpgResult<Self> {
        let mut channel = command
            .invocation("probe")
            .arg("--version")
            .stdout(Stdout::Pipe)
            .spawn(session)?;

        let mut output = String::new();
        channel.read_lines(|line| {
            output.push_str(line);
            output.push('\n');
            ControlFlow::Continue(())
        })?;
        let outcome = channel.finish()?;
        if !outcome.success() {
            return Err(GpgError::AbnormalExit {
                step: "probe",
                program: command.program().to_string(),
                outcome,
            });
        }

        let variant =
            Self::from_version_output(&output).ok_or_else(|| GpgError::Discovery {
                program: command.program().to_string(),
                message: format!(
                    "unrecognised version line '{}'",
                    output.lines().next().unwrap_or_default()
                ),
            })?;
        debug!(program = %command.program(), ?variant, "selected listing protocol");
        Ok(variant)
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Fingerprint => write!(f, "fingerprint"),
        }
    }
}

impl FromStr for ProtocolVariant {
    type Err = GpgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "keyid" => Ok(Self::Legacy),
            "fingerprint" | "fpr" => Ok(Self::Fingerprint),
            other => Err(GpgError::Config {
                message: format!("unknown listing protocol '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_version_output_modern() {
        let out = "gpg (GnuPG) 2.2.40\nlibgcrypt 1.10.1\nCopyright (C) 2022 g10 Code GmbH\n";
        assert_eq!(
            ProtocolVariant::from_version_output(out),
            Some(ProtocolVariant::Fingerprint)
        );

        let out = "gpg (GnuPG/MacGPG2) 2.1.0-beta3\n";
        assert_eq!(
            ProtocolVariant::from_version_output(out),
            Some(ProtocolVariant::Fingerprint)
        );
    }

    #[test]
    fn test_from_version_output_legacy() {
        assert_eq!(
            ProtocolVariant::from_version_output("gpg (GnuPG) 1.4.23\n"),
            Some(ProtocolVariant::Legacy)
        );
        assert_eq!(
            ProtocolVariant::from_version_output("gpg (GnuPG) 2.0.31\n"),
            Some(ProtocolVariant::Legacy)
        );
    }

    #[test]
    fn test_from_version_output_garbage() {
        assert_eq!(ProtocolVariant::from_version_output(""), None);
        assert_eq!(ProtocolVariant::from_version_output("gpg (GnuPG) unknown"), None);
    }

    #[test]
    fn test_parse_display() {
        assert_eq!(
            "Fingerprint".parse::<ProtocolVariant>().unwrap(),
            ProtocolVariant::Fingerprint
        );
        assert_eq!("keyid".parse::<ProtocolVariant>().unwrap(), ProtocolVariant::Legacy);
        assert!("pgp2".parse::<ProtocolVariant>().is_err());
        assert_eq!(ProtocolVariant::Legacy.to_string(), "legacy");
    }
}
