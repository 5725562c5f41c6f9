use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::host::{AttendanceStore, EmployeeDirectory};
use crate::sync::fetcher::TransactionSource;
use crate::sync::orchestrator::SyncEngine;

pub async fn serve<S, H>(
    engine: Arc<SyncEngine<S, H>>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> hyper::Result<()>
where
    S: TransactionSource + 'static,
    H: EmployeeDirectory + AttendanceStore + 'static,
{
    let make_service = make_service_fn(move |_conn| {
        let engine = engine.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let engine = engine.clone();
                async move {
                    debug!(method = %request.method(), path = request.uri().path(), "Diagnostics request");
                    Ok::<_, Infallible>(route(&engine, request.method(), request.uri().path()).await)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!(addr = %server.local_addr(), "Diagnostics server listening");

    server
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
}

pub(crate) async fn route<S, H>(engine: &SyncEngine<S, H>, method: &Method, path: &str) -> Response<Body>
where
    S: TransactionSource,
    H: EmployeeDirectory + AttendanceStore,
{
    match (method, path.trim_end_matches('/')) {
        (&Method::GET, "/status") => match engine.get_sync_status().await {
            Ok(status) => json_response(StatusCode::OK, &status),
            Err(error) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": error.to_string() }),
            ),
        },
        (&Method::POST, "/sync") => json_response(StatusCode::OK, &engine.manual_sync().await),
        (&Method::GET, "/test-connection") => {
            json_response(StatusCode::OK, &engine.test_connection().await)
        }
        (&Method::POST, "/register-token") => match engine.register_api_token().await {
            Ok(_) => json_response(
                StatusCode::OK,
                &json!({ "success": true, "message": "API token registered successfully" }),
            ),
            Err(error) => json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "success": false, "message": error.to_string() }),
            ),
        },
        _ => json_response(StatusCode::NOT_FOUND, &json!({ "error": "not found" })),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": error.to_string() }).to_string().into_bytes(),
        ),
    };
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
