//! HTTP surface (§6): the admission gate from [`acl`] wraps every route,
//! the beacon stream from [`crate::notification::sender`] is served at a
//! fixed path, and everything under `base_db_path` is handed to a
//! [`store::DocumentStore`].

pub mod acl;
pub mod psk;
pub mod store;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::notification::sender::PskTables;
use acl::AdmissionState;
use psk::PskIdentityResolver;
use store::DocumentStore;

pub const NOTIFICATION_BEACONS_PATH: &str = "/NotificationBeacons";

async fn notification_beacons(State(stream_rx): State<watch::Receiver<Arc<Vec<u8>>>>) -> Response {
    let bytes = stream_rx.borrow().as_ref().clone();
    (axum::http::StatusCode::OK, bytes).into_response()
}

async fn document_store_handler(State(store): State<Arc<dyn DocumentStore>>, req: Request<Body>) -> Response {
    store.handle(req).await
}

/// Build the full router: admission gate + fixed beacon endpoint +
/// everything under `base_db_path` forwarded to `store`.
pub fn router(
    resolver: Arc<dyn PskIdentityResolver>,
    tables_rx: watch::Receiver<Arc<PskTables>>,
    base_db_path: &str,
    local_seq_point_prefix: &str,
    beacon_stream_rx: watch::Receiver<Arc<Vec<u8>>>,
    store: Arc<dyn DocumentStore>,
) -> Router {
    let admission_state = Arc::new(AdmissionState {
        resolver,
        tables_rx,
        base_db_path: base_db_path.to_string(),
        local_seq_point_prefix: local_seq_point_prefix.to_string(),
    });

    let db_router = Router::new()
        .route("/", any(document_store_handler))
        .route("/{*rest}", any(document_store_handler))
        .with_state(store);

    Router::new()
        .route(NOTIFICATION_BEACONS_PATH, get(notification_beacons))
        .with_state(beacon_stream_rx)
        .nest(base_db_path, db_router)
        .layer(from_fn_with_state(admission_state, acl::admission_gate))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{CipherSuite, EcdhKeyPair};
    use crate::http::psk::HeaderPskIdentityResolver;
    use crate::notification::sender::NotificationSender;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn unauthenticated_request_is_rejected() {
        let local = Arc::new(EcdhKeyPair::generate());
        let (_sender, stream_rx, tables_rx) = NotificationSender::new(local, CipherSuite::Ctr);
        let app = router(
            Arc::new(HeaderPskIdentityResolver::default()),
            tables_rx,
            "/db",
            "localseq:",
            stream_rx,
            Arc::new(store::PlaceholderDocumentStore),
        );

        let req = Request::builder().uri("/db").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn beacon_identity_may_fetch_notification_beacons_but_not_the_database() {
        let local = Arc::new(EcdhKeyPair::generate());
        let (_sender, stream_rx, tables_rx) = NotificationSender::new(local, CipherSuite::Ctr);
        let app = router(
            Arc::new(HeaderPskIdentityResolver::default()),
            tables_rx,
            "/db",
            "localseq:",
            stream_rx,
            Arc::new(store::PlaceholderDocumentStore),
        );

        let req = Request::builder()
            .uri("/NotificationBeacons")
            .header("x-thali-psk-identity", "beacons")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/db")
            .header("x-thali-psk-identity", "beacons")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn recognized_replication_identity_reaches_the_document_store() {
        let local = Arc::new(EcdhKeyPair::generate());
        let (mut sender, stream_rx, tables_rx) = NotificationSender::new(local, CipherSuite::Ctr);
        let recipient = EcdhKeyPair::generate();
        sender
            .set_beacon_keys(vec![recipient.public().clone()], std::time::Duration::from_secs(3600))
            .unwrap();
        let psk_id = recipient.public().hash().to_base64();

        let app = router(
            Arc::new(HeaderPskIdentityResolver::default()),
            tables_rx,
            "/db",
            "localseq:",
            stream_rx,
            Arc::new(store::PlaceholderDocumentStore),
        );

        let req = Request::builder()
            .uri("/db")
            .header("x-thali-psk-identity", psk_id)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
