//! `--list-packets` dump parser.
//!
//! The dump is meant for humans, so only three tokens are trusted:
//!
//! ```text
//! # off=0 ctb=89 tag=2 hlen=3 plen=307
//! :signature packet: algo 1, keyid 0123456789ABCDEF
//!         version 4, created 1500000000, md5len 0, sigclass 0x00
//!         hashed subpkt 33 len 21 (issuer fpr v4 ABCD...1234)
//! ```

use std::io::Read;
use std::ops::ControlFlow;

use tracing::debug;

use crate::command::{GpgCommand, Stdin, Stdout};
use crate::error::GpgResult;
use crate::protocol::ProtocolVariant;
use crate::trust::TrustStoreSession;
use crate::types::SignerId;

/// Hex digits in a v4 fingerprint.
pub const FINGERPRINT_LEN: usize = 40;

const COMMENT_MARKER: char = '#';
const PACKET_MARKER: char = ':';
const SIGNATURE_PACKET: &str = ":signature packet:";
const KEYID_MARKER: &str = "keyid ";
const ISSUER_FPR_MARKER: &str = "issuer fpr v";

const STEP: &str = "list-packets";

/// Asks gpg who made a signature.
#[derive(Debug)]
pub struct PacketLister<'g> {
    command: &'g GpgCommand,
    session: &'g TrustStoreSession,
    variant: ProtocolVariant,
}

impl<'g> PacketLister<'g> {
    pub fn new(
        command: &'g GpgCommand,
        session: &'g TrustStoreSession,
        variant: ProtocolVariant,
    ) -> Self {
        Self {
            command,
            session,
            variant,
        }
    }

    /// Pipe `len` bytes of `signature` through `gpg --list-packets` and
    /// return the signer, or `None` when the dump names none.
    ///
    /// gpg's exit status is only traced: without the public key it exits
    /// non-zero while still dumping the packets.
    pub fn signer_id<R>(&self, signature: R, len: u64) -> GpgResult<Option<SignerId>>
    where
        R: Read + Send,
    {
        let mut channel = self
            .command
            .invocation(STEP)
            .args(["--list-packets", "-q", "-"])
            .stdin(Stdin::Pipe)
            .stdout(Stdout::Pipe)
            .spawn(self.session)?;

        let mut scanner = PacketListScanner::new(self.variant);
        channel.feed_and_read_lines(signature, len, |line| scanner.feed(line))?;
        let outcome = channel.finish()?;

        let signer = scanner.finish();
        match &signer {
            Some(id) => debug!(%outcome, "got signer {}", id),
            None => debug!(%outcome, "no signer in signature packets"),
        }
        Ok(signer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketState {
    SeekingSignaturePacket,
    InSignaturePacket,
    Done,
}

/// State machine extracting the signer of the first signature packet.
#[derive(Debug)]
pub struct PacketListScanner {
    variant: ProtocolVariant,
    state: PacketState,
    key_id: Option<String>,
    fingerprint: Option<String>,
}

impl PacketListScanner {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            variant,
            state: PacketState::SeekingSignaturePacket,
            key_id: None,
            fingerprint: None,
        }
    }

    /// Consume one line; breaks once nothing better can be found.
    pub fn feed(&mut self, line: &str) -> ControlFlow<()> {
        if line.starts_with(COMMENT_MARKER) {
            return self.flow();
        }

        match self.state {
            PacketState::SeekingSignaturePacket => {
                if line.starts_with(SIGNATURE_PACKET) {
                    self.key_id = parse_key_id(line);
                    self.state = match self.variant {
                        ProtocolVariant::Legacy if self.key_id.is_some() => PacketState::Done,
                        _ => PacketState::InSignaturePacket,
                    };
                }
            }
            PacketState::InSignaturePacket => {
                if line.starts_with(PACKET_MARKER) {
                    // Next packet: the signature packet is over.
                    self.state = PacketState::Done;
                } else if let Some(fpr) = parse_issuer_fingerprint(line) {
                    self.fingerprint = Some(fpr);
                    self.state = PacketState::Done;
                }
            }
            PacketState::Done => {}
        }

        self.flow()
    }

    fn flow(&self) -> ControlFlow<()> {
        if self.state == PacketState::Done {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Issuer fingerprint if seen, else the packet key id, else `None`
    /// (unresolvable).
    pub fn finish(self) -> Option<SignerId> {
        self.fingerprint
            .or(self.key_id)
            .map(|id| SignerId::from_hex(&id))
    }
}

/// Token following `keyid ` on a signature packet header.
fn parse_key_id(line: &str) -> Option<String> {
    let start = line.find(KEYID_MARKER)? + KEYID_MARKER.len();
    let token = line[start..].split_whitespace().next()?;
    Some(token.to_string())
}

/// Fingerprint after `issuer fpr v<digits><whitespace>`, cut to
/// [`FINGERPRINT_LEN`] hex digits.
fn parse_issuer_fingerprint(line: &str) -> Option<String> {
    let start = line.find(ISSUER_FPR_MARKER)? + ISSUER_FPR_MARKER.len();
    let rest = &line[start..];

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &rest[digits..];
    let value = rest.trim_start();
    if value.len() == rest.len() {
        // Version must be followed by whitespace.
        return None;
    }

    let hex = value.bytes().take_while(u8::is_ascii_hexdigit).count();
    if hex < FINGERPRINT_LEN {
        return None;
    }
    Some(value[..FINGERPRINT_LEN].to_string())
}
