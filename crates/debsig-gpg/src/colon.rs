//! `--with-colons` key listing parser.
//!
//! Records are addressed by named field; the numeric positions follow the
//! column layout in GnuPG's `doc/DETAILS`:
//!
//! ```text
//! pub:-:4096:1:0123456789ABCDEF:1500000000:::-:::scESC::::::23::0:
//! fpr:::::::::ABCDEF...0123456789ABCDEF:
//! uid:-::::1500000000::HASH::Example Archive <sign@example.org>::::::::::0:
//! ```

use std::ops::ControlFlow;

use crate::protocol::ProtocolVariant;
use crate::types::SignerId;

/// Record kinds the scanner acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `pub`: primary key of a certificate.
    Certificate,
    /// `fpr`: fingerprint of the preceding key.
    Fingerprint,
    /// `uid`: user id of the current certificate.
    UserId,
    Other,
}

/// Named colon-listing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColonField {
    /// Field 1.
    RecordType,
    /// Field 5 of `pub`/`sub`.
    KeyId,
    /// Field 10 of `fpr`.
    Fingerprint,
    /// Field 10 of `uid`.
    UserId,
}

impl ColonField {
    /// 1-based column.
    pub fn index(self) -> usize {
        match self {
            Self::RecordType => 1,
            Self::KeyId => 5,
            Self::Fingerprint | Self::UserId => 10,
        }
    }
}

/// Extract the 1-based `index`th colon-terminated field.
///
/// A field only exists if a `:` follows it, so the unterminated tail of a
/// line and anything past the last delimiter are absent.
pub fn colon_field(line: &str, index: usize) -> Option<&str> {
    if index == 0 || index > line.matches(':').count() {
        return None;
    }
    line.split(':').nth(index - 1)
}

/// One line of a colon listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColonRecord<'a> {
    pub kind: RecordKind,
    line: &'a str,
}

impl<'a> ColonRecord<'a> {
    pub fn parse(line: &'a str) -> Self {
        let kind = match colon_field(line, ColonField::RecordType.index()) {
            Some("pub") => RecordKind::Certificate,
            Some("fpr") => RecordKind::Fingerprint,
            Some("uid") => RecordKind::UserId,
            _ => RecordKind::Other,
        };
        Self { kind, line }
    }

    pub fn field(&self, field: ColonField) -> Option<&'a str> {
        colon_field(self.line, field.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingState {
    SeekingCertificate,
    CertificateFound,
    FingerprintFound,
    Matched,
}

/// State machine mapping an expected user id to its certificate's
/// identifier.
#[derive(Debug)]
pub struct KeyListingScanner<'e> {
    expected: &'e str,
    variant: ProtocolVariant,
    state: ListingState,
    key_id: Option<String>,
    fingerprint: Option<String>,
}

impl<'e> KeyListingScanner<'e> {
    pub fn new(expected: &'e str, variant: ProtocolVariant) -> Self {
        Self {
            expected,
            variant,
            state: ListingState::SeekingCertificate,
            key_id: None,
            fingerprint: None,
        }
    }

    /// Consume one line; breaks once the expected user id matched.
    pub fn feed(&mut self, line: &str) -> ControlFlow<()> {
        if self.state == ListingState::Matched {
            return ControlFlow::Break(());
        }

        let record = ColonRecord::parse(line);
        match (self.state, record.kind) {
            (_, RecordKind::Certificate) => {
                self.key_id = record.field(ColonField::KeyId).map(str::to_owned);
                self.fingerprint = None;
                self.state = ListingState::CertificateFound;
            }
            (ListingState::CertificateFound, RecordKind::Fingerprint)
                if self.variant.has_fingerprint_records() =>
            {
                self.fingerprint = record.field(ColonField::Fingerprint).map(str::to_owned);
                self.state = ListingState::FingerprintFound;
            }
            (ListingState::CertificateFound, RecordKind::UserId)
                if !self.variant.has_fingerprint_records() =>
            {
                if self.user_id_matches(&record) && self.key_id.is_some() {
                    self.state = ListingState::Matched;
                }
            }
            (ListingState::FingerprintFound, RecordKind::UserId) => {
                if self.user_id_matches(&record) && self.fingerprint.is_some() {
                    self.state = ListingState::Matched;
                }
            }
            _ => {}
        }

        if self.state == ListingState::Matched {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn user_id_matches(&self, record: &ColonRecord<'_>) -> bool {
        record.field(ColonField::UserId) == Some(self.expected)
    }

    /// The matched certificate's identifier, if the expected user id was
    /// found.
    pub fn finish(self) -> Option<SignerId> {
        if self.state != ListingState::Matched {
            return None;
        }
        let id = match self.variant {
            ProtocolVariant::Fingerprint => self.fingerprint,
            ProtocolVariant::Legacy => self.key_id,
        }?;
        Some(SignerId::from_hex(&id))
    }
}
