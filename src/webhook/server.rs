//! HTTP listener for the `handle` mode.
//!
//! Each inbound request is rebuilt into an [`InboundRequest`] (query token,
//! proxy headers, peer address) and passed through the validator before its
//! update payload is forwarded. Unauthentic requests get the same empty 200
//! as authentic ones; the drop is silent by design.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::KernelError;
use crate::telegram::UpdateSink;
use crate::validate::{InboundRequest, Origin, RequestValidator};

#[derive(Clone)]
pub struct HandleState {
    pub validator: Arc<RequestValidator>,
    pub sink: Arc<dyn UpdateSink>,
}

/// Serve webhook requests until the cancellation token fires.
pub async fn serve(
    port: u16,
    state: HandleState,
    cancel: CancellationToken,
) -> Result<(), KernelError> {
    let app = Router::new()
        .route("/", post(receive_update))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening for webhook updates");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;

    Ok(())
}

async fn receive_update(
    State(state): State<HandleState>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let request = InboundRequest {
        origin: Origin::Network,
        token: query.get("s").cloned(),
        client_ip: header_ip(&headers, "client-ip"),
        forwarded_for: header_ip(&headers, "x-forwarded-for"),
        remote_addr: Some(peer.ip()),
    };

    super::handle_request(&state.validator, &state.sink, &request, &body).await;
    StatusCode::OK
}

/// First comma-separated entry of a header, parsed as an address.
fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}
