//! The TLS-PSK server itself is an external collaborator (§1 Out of
//! scope). This module owns only the narrow seam the admission gate needs:
//! "what identity did this connection authenticate as". A real deployment
//! implements [`PskIdentityResolver`] against whatever TLS-PSK terminator
//! it runs; [`HeaderPskIdentityResolver`] is a local-dev stand-in only —
//! it is not a substitute for actual TLS-PSK authentication.

use axum::http::HeaderMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PskIdentity(pub String);

pub trait PskIdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<PskIdentity>;
}

/// Reads the identity off a plain header instead of a TLS-PSK handshake.
/// Useful for running the admission gate in development or in tests
/// without a real TLS-PSK terminator in front of it.
pub struct HeaderPskIdentityResolver {
    header_name: &'static str,
}

impl HeaderPskIdentityResolver {
    pub fn new(header_name: &'static str) -> Self {
        Self { header_name }
    }
}

impl Default for HeaderPskIdentityResolver {
    fn default() -> Self {
        Self::new("x-thali-psk-identity")
    }
}

impl PskIdentityResolver for HeaderPskIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<PskIdentity> {
        headers
            .get(self.header_name)
            .and_then(|v| v.to_str().ok())
            .map(|s| PskIdentity(s.to_string()))
    }
}
