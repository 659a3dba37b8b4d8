//! Forwarded client certificate (XFCC) header parsing.
//!
//! The terminating proxy has already validated the client certificate and
//! describes it in a header of the form
//!
//! ```text
//! By=spiffe://example.org/gw;Hash=ab12…;Subject="CN=api,O=Acme";URI=spiffe://example.org/api
//! ```
//!
//! Pairs are separated by `;`, certificates in a proxy chain by `,`. Values
//! may be double-quoted, in which case `;` and `,` inside the quotes do not
//! split and `\"` is an escaped quote.
//!
//! Only the first `URI` pair in textual order is used; later ones (from
//! further hops in a chain) are ignored rather than treated as an error.

use axum::http::{HeaderMap, HeaderName};

use super::identity::SpiffeId;
use crate::error::IdentityError;

/// Default header name injected by the proxy.
pub const XFCC_HEADER: &str = "x-forwarded-client-cert";

/// Key of the pair carrying the SAN URI of the client certificate.
const URI_KEY: &str = "URI";

/// Extract the caller's SPIFFE ID from a raw XFCC header value.
///
/// # Errors
///
/// Exactly one of:
/// - [`IdentityError::MissingHeader`] for an empty (or blank) value
/// - [`IdentityError::NoIdentitySegment`] when no `URI=` pair exists
/// - [`IdentityError::MalformedUri`] / [`IdentityError::InvalidIdentityFormat`]
///   when the first `URI=` value is not a valid SPIFFE ID
pub fn extract_identity(header: &str) -> Result<SpiffeId, IdentityError> {
    if header.trim().is_empty() {
        return Err(IdentityError::MissingHeader);
    }

    let uri = pairs(header)
        .find_map(|(key, value)| (key == URI_KEY).then_some(value))
        .ok_or(IdentityError::NoIdentitySegment)?;

    SpiffeId::parse(&uri)
}

/// Extract the caller's SPIFFE ID from request headers.
///
/// An absent header is [`IdentityError::MissingHeader`]. Bytes that are not
/// valid UTF-8 are decoded lossily and then fail SPIFFE validation.
pub fn extract_from_headers(
    headers: &HeaderMap,
    name: &HeaderName,
) -> Result<SpiffeId, IdentityError> {
    let Some(value) = headers.get(name) else {
        return Err(IdentityError::MissingHeader);
    };
    extract_identity(&String::from_utf8_lossy(value.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

/// Iterate `(key, unquoted value)` pairs in header order.
///
/// Segments without `=` are skipped.
fn pairs(header: &str) -> impl Iterator<Item = (&str, String)> {
    split_unquoted(header).into_iter().filter_map(|segment| {
        let (key, value) = segment.split_once('=')?;
        Some((key.trim(), unquote(value.trim())))
    })
}

/// Split on `;` and `,` that are not inside a double-quoted value.
fn split_unquoted(header: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, ch) in header.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' | ',' if !in_quotes => {
                segments.push(&header[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&header[start..]);

    segments
}

/// Strip surrounding double quotes and resolve `\` escapes inside them.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_owned();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
