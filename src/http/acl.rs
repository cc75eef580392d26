//! The two-stage gate from §6: PSK identity decides a role, the role plus
//! method/path decide admission. The teacher has no HTTP layer to ground
//! this on; the shape (a `from_fn_with_state` layer wrapping every route)
//! follows the `tower`/`axum` stack already in the dependency table and
//! the handler layout in `other_examples`' axum backend.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;

use super::psk::PskIdentityResolver;
use crate::notification::sender::{PskTables, BEACON_PSK_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Beacon,
    Replication,
    Public,
}

pub struct AdmissionState {
    pub resolver: Arc<dyn PskIdentityResolver>,
    pub tables_rx: watch::Receiver<Arc<PskTables>>,
    pub base_db_path: String,
    pub local_seq_point_prefix: String,
}

/// Request-scoped extension recording which role the admission gate
/// assigned, so handlers (or the document store) can read it back without
/// re-resolving the PSK identity.
#[derive(Debug, Clone)]
pub struct AuthenticatedRole {
    pub role: Role,
    pub identity_hash_hex: Option<String>,
}

pub async fn admission_gate(
    State(state): State<Arc<AdmissionState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(identity) = state.resolver.resolve(req.headers()) else {
        return (StatusCode::UNAUTHORIZED, "missing PSK identity").into_response();
    };

    let tables = state.tables_rx.borrow().clone();

    let (role, identity_hash_hex) = if identity.0 == BEACON_PSK_ID {
        (Role::Beacon, None)
    } else if let Some(public_key) = tables.id_to_public_key.get(&identity.0) {
        (Role::Replication, Some(public_key.hash().to_hex()))
    } else if tables.id_to_secret.contains_key(&identity.0) {
        // Recognized secret with no recorded public key (shouldn't happen
        // outside the fixed beacon identity, handled above).
        (Role::Replication, None)
    } else {
        (Role::Public, None)
    };

    if !acl_allows(
        role,
        req.method(),
        req.uri().path(),
        &state.base_db_path,
        &state.local_seq_point_prefix,
        identity_hash_hex.as_deref(),
    ) {
        return (StatusCode::FORBIDDEN, "not permitted for this role").into_response();
    }

    req.extensions_mut().insert(AuthenticatedRole { role, identity_hash_hex });
    next.run(req).await
}

/// §6's role/method/path table, collapsed into one predicate. `base_db_path`
/// and `local_seq_point_prefix` come from [`crate::config::Config`] rather
/// than being hardcoded, per the §9 "global mutability of tunables" fix.
fn acl_allows(
    role: Role,
    method: &Method,
    path: &str,
    base_db_path: &str,
    local_seq_point_prefix: &str,
    identity_hash_hex: Option<&str>,
) -> bool {
    match role {
        Role::Beacon => method == Method::GET && path == "/NotificationBeacons",
        Role::Public => false,
        Role::Replication => {
            if path == base_db_path {
                return *method == Method::GET;
            }
            if path == format!("{base_db_path}/_all_docs") {
                return one_of(method, &[Method::GET, Method::HEAD, Method::POST]);
            }
            if path == format!("{base_db_path}/_bulk_get") || path == format!("{base_db_path}/_revs_diff") {
                return *method == Method::POST;
            }
            if path == format!("{base_db_path}/_changes") {
                return one_of(method, &[Method::GET, Method::POST]);
            }
            let local_prefix = format!("{base_db_path}/_local/");
            if let Some(id) = path.strip_prefix(local_prefix.as_str()) {
                if !one_of(method, &[Method::GET, Method::PUT, Method::DELETE]) {
                    return false;
                }
                if let Some(seq_owner) = id.strip_prefix(local_seq_point_prefix) {
                    // A peer may only read/write its own local checkpoint
                    // document: `_local/<prefix>{id}` must name its own
                    // identity hash.
                    return identity_hash_hex == Some(seq_owner);
                }
                return true;
            }
            if let Some(rest) = path.strip_prefix(&format!("{base_db_path}/")) {
                if !rest.is_empty() && !rest.starts_with('_') {
                    return *method == Method::GET;
                }
            }
            false
        }
    }
}

fn one_of(method: &Method, options: &[Method]) -> bool {
    options.iter().any(|m| m == method)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "/db";
    const PREFIX: &str = "localseq:";

    #[test]
    fn beacon_role_may_only_fetch_notification_beacons() {
        assert!(acl_allows(Role::Beacon, &Method::GET, "/NotificationBeacons", BASE, PREFIX, None));
        assert!(!acl_allows(Role::Beacon, &Method::GET, "/db", BASE, PREFIX, None));
        assert!(!acl_allows(Role::Beacon, &Method::POST, "/NotificationBeacons", BASE, PREFIX, None));
    }

    #[test]
    fn public_role_is_denied_everything() {
        assert!(!acl_allows(Role::Public, &Method::GET, "/db", BASE, PREFIX, None));
        assert!(!acl_allows(Role::Public, &Method::GET, "/NotificationBeacons", BASE, PREFIX, None));
    }

    #[test]
    fn replication_role_may_read_and_sync_the_database() {
        assert!(acl_allows(Role::Replication, &Method::GET, "/db", BASE, PREFIX, None));
        assert!(acl_allows(Role::Replication, &Method::POST, "/db/_bulk_get", BASE, PREFIX, None));
        assert!(acl_allows(Role::Replication, &Method::POST, "/db/_changes", BASE, PREFIX, None));
        assert!(acl_allows(Role::Replication, &Method::GET, "/db/doc123", BASE, PREFIX, None));
        assert!(acl_allows(Role::Replication, &Method::GET, "/db/doc123/attachment", BASE, PREFIX, None));
        assert!(!acl_allows(Role::Replication, &Method::DELETE, "/db/doc123", BASE, PREFIX, None));
    }

    #[test]
    fn replication_role_may_only_touch_its_own_local_seq_point() {
        let path = "/db/_local/localseq:abc123";
        assert!(acl_allows(Role::Replication, &Method::PUT, path, BASE, PREFIX, Some("abc123")));
        assert!(!acl_allows(Role::Replication, &Method::PUT, path, BASE, PREFIX, Some("someone-else")));
        assert!(!acl_allows(Role::Replication, &Method::PUT, path, BASE, PREFIX, None));
    }

    #[test]
    fn plain_local_documents_are_not_seq_point_gated() {
        let path = "/db/_local/checkpoint-7";
        assert!(acl_allows(Role::Replication, &Method::GET, path, BASE, PREFIX, None));
    }
}
