//! Caller identity from proxy-terminated mutual TLS.
//!
//! TLS is terminated by a reverse proxy in front of the gateway. The proxy
//! validates the client certificate and forwards a summary of it in the
//! `X-Forwarded-Client-Cert` header. This module turns that header into a
//! [`SpiffeId`]; it does not look at certificates itself.
//!
//! # Flow
//!
//! ```text
//! client ──mTLS──▶ proxy ──HTTP + XFCC──▶ gateway
//!                                           → extract_identity(header)
//!                                           → SpiffeId { trust_domain, path }
//! ```
//!
//! # Modules
//!
//! - [`identity`] - `SpiffeId` / `TrustDomain` validation
//! - [`xfcc`] - header tokenizer and identity extraction

pub mod identity;
pub mod xfcc;

pub use identity::{SpiffeId, TrustDomain};
pub use xfcc::{XFCC_HEADER, extract_from_headers, extract_identity};
