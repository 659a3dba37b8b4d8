//! SPIFFE identity value types.
//!
//! A [`SpiffeId`] is either fully valid or never constructed: parsing checks
//! the scheme, the trust domain and every path segment before returning.
//!
//! Well-formedness is delegated to the `url` crate; the SPIFFE rules are then
//! checked against the raw text so that the canonical form is exactly the
//! input (no dot-segment or percent normalisation sneaks in).

use std::fmt;

use url::Url;

use crate::error::IdentityError;

/// URI scheme reserved for SPIFFE IDs.
pub const SPIFFE_SCHEME: &str = "spiffe";

const SCHEME_PREFIX: &str = "spiffe://";

// ─────────────────────────────────────────────────────────────────────────────
// Trust domain
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace under which an identity was issued (e.g. `example.org`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Trust domain name without scheme.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SPIFFE ID
// ─────────────────────────────────────────────────────────────────────────────

/// A validated, trust-domain-qualified workload identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    /// Always starts with `/`, never ends with one.
    path: String,
}

impl SpiffeId {
    /// Parse and validate a SPIFFE ID.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::MalformedUri`] if `raw` is not a URI at all.
    /// - [`IdentityError::InvalidIdentityFormat`] if it is a URI but breaks a
    ///   SPIFFE rule (wrong scheme, empty trust domain, empty path, …).
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let url = Url::parse(raw).map_err(|e| IdentityError::MalformedUri {
            uri: raw.to_owned(),
            reason: e.to_string(),
        })?;

        let invalid = |reason: &'static str| IdentityError::InvalidIdentityFormat {
            uri: raw.to_owned(),
            reason,
        };

        if url.scheme() != SPIFFE_SCHEME {
            return Err(invalid("scheme must be spiffe"));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("userinfo is not allowed"));
        }
        if url.port().is_some() {
            return Err(invalid("port is not allowed"));
        }
        if url.query().is_some() {
            return Err(invalid("query is not allowed"));
        }
        if url.fragment().is_some() {
            return Err(invalid("fragment is not allowed"));
        }

        // The scheme check above is case-insensitive in `url`; the raw text
        // must use the lowercase form.
        let rest = match raw.strip_prefix(SCHEME_PREFIX) {
            Some(rest) => rest,
            None if raw.starts_with("spiffe:") => return Err(invalid("trust domain is empty")),
            None => return Err(invalid("scheme must be spiffe")),
        };
        let (domain, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let trust_domain = parse_trust_domain(domain).map_err(invalid)?;
        validate_path(path).map_err(invalid)?;

        Ok(Self {
            trust_domain,
            path: path.to_owned(),
        })
    }

    /// Issuing trust domain.
    #[must_use]
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Workload path within the trust domain, including the leading `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME_PREFIX}{}{}", self.trust_domain, self.path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_trust_domain(domain: &str) -> Result<TrustDomain, &'static str> {
    if domain.is_empty() {
        return Err("trust domain is empty");
    }
    let valid = domain.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_')
    });
    if !valid {
        return Err("trust domain has invalid characters");
    }
    Ok(TrustDomain(domain.to_owned()))
}

fn validate_path(path: &str) -> Result<(), &'static str> {
    let Some(body) = path.strip_prefix('/') else {
        return Err("path is empty");
    };
    if body.is_empty() {
        return Err("path is empty");
    }
    for segment in body.split('/') {
        match segment {
            "" => return Err("path has an empty segment"),
            "." | ".." => return Err("path has a dot segment"),
            _ => {}
        }
        let valid = segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
        if !valid {
            return Err("path has invalid characters");
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
