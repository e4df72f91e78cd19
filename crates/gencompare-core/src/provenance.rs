//! Provenance marker written into every history commit.
//!
//! A history commit message looks like:
//!
//! ```text
//! main:(upstream@1a2b3c4d5e) Fix the widget parser (see upstream#42)
//!
//! Gencompare-Provenance: v1 1a2b3c4d5e6f...
//! ```
//!
//! The header is for humans; the trailer is the contract. Catch-up mode reads
//! the trailer back to learn which source revision was recorded last.
//!
//! Messages written before the trailer existed only carry the header. They
//! are accepted as version 0 when the caller supplies the cross-reference
//! prefix that was used to write them.

use regex::Regex;

use crate::domain::error::ProvenanceError;
use crate::domain::revision::{Revision, RevisionId};

/// Trailer key carrying the versioned marker.
pub const TRAILER_KEY: &str = "Gencompare-Provenance";

/// Marker version written by this crate.
pub const MARKER_VERSION: &str = "v1";

/// Rewrite `#` cross-references so they do not link inside the history
/// store's hosting service: `#42` becomes `<prefix>#42`.
pub fn escape_cross_references(message: &str, prefix: &str) -> String {
    message.replace('#', &format!("{prefix}#"))
}

/// The versioned trailer line naming `id`. Also used as the catch-up
/// checkpoint.
pub fn marker_line(id: &RevisionId) -> String {
    format!("{TRAILER_KEY}: {MARKER_VERSION} {id}")
}

/// Compose the history commit message for `revision`.
pub fn compose_message(revision: &Revision, prefix: &str) -> String {
    let original = escape_cross_references(revision.message.trim(), prefix);
    format!(
        "{}:({}@{}) {}\n\n{}",
        revision.display_name,
        prefix,
        revision.short_id,
        original,
        marker_line(&revision.id)
    )
}

/// Recover the source revision id from a history commit message.
///
/// Reads the last `Gencompare-Provenance:` trailer in the message.
pub fn parse_provenance_marker(message: &str) -> Result<RevisionId, ProvenanceError> {
    let trailer = message
        .lines()
        .rev()
        .filter_map(|line| line.trim().strip_prefix(TRAILER_KEY))
        .find_map(|rest| rest.strip_prefix(':'))
        .ok_or(ProvenanceError::MissingMarker)?;

    let mut parts = trailer.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if version != MARKER_VERSION {
        return Err(ProvenanceError::UnsupportedVersion {
            version: version.to_string(),
        });
    }
    let id = parts.next().unwrap_or_default();
    RevisionId::try_from(id.to_string())
}

/// Like [`parse_provenance_marker`], falling back to the version 0 header
/// `(<prefix>@<id>)` when no trailer is present.
pub fn parse_provenance_marker_with_legacy(
    message: &str,
    legacy_prefix: Option<&str>,
) -> Result<RevisionId, ProvenanceError> {
    match parse_provenance_marker(message) {
        Err(ProvenanceError::MissingMarker) => match legacy_prefix {
            Some(prefix) => parse_legacy_header(message, prefix),
            None => Err(ProvenanceError::MissingMarker),
        },
        other => other,
    }
}

fn parse_legacy_header(message: &str, prefix: &str) -> Result<RevisionId, ProvenanceError> {
    let pattern = format!(r"\({}@([^)\s]*)\)", regex::escape(prefix));
    // The pattern is built from an escaped literal, so compilation cannot fail
    // on user input; treat a failure as "no marker" all the same.
    let re = Regex::new(&pattern).map_err(|_| ProvenanceError::MissingMarker)?;
    let id = re
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ProvenanceError::MissingMarker)?;
    RevisionId::try_from(id)
}
