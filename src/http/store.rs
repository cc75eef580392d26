//! Document-store boundary (§4.4/§6 ADDED): the replication endpoints
//! (`/db`, `/db/_all_docs`, `/db/_changes`, ...) are served by whatever
//! storage engine a deployment plugs in. This crate owns admission and
//! replication-protocol plumbing up to that boundary, not a database.

use std::future::Future;
use std::pin::Pin;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type BoxedResponse = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Implemented by whatever storage engine backs `base_db_path`. Boxed
/// futures rather than `async fn` in a trait so this stays object-safe:
/// the router holds a single `Arc<dyn DocumentStore>` behind every
/// replication route.
pub trait DocumentStore: Send + Sync {
    fn handle(&self, req: Request<Body>) -> BoxedResponse;
}

/// In-memory placeholder: answers every replication request with
/// `501 Not Implemented`. Exists so the router and admission gate can be
/// exercised end to end without a real storage engine wired in.
pub struct PlaceholderDocumentStore;

impl DocumentStore for PlaceholderDocumentStore {
    fn handle(&self, _req: Request<Body>) -> BoxedResponse {
        Box::pin(async move {
            (StatusCode::NOT_IMPLEMENTED, "no document store configured").into_response()
        })
    }
}
