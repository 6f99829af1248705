// Dashboard HTTP API server
//
// Action endpoints take a JSON body carrying the connection profile plus the
// operation's arguments and answer with an `ActionResponse`. The monitor
// endpoint streams subject traffic as server-sent events.

use crate::actions::{ActionResponse, Actions};
use crate::dashboard::event_stream::to_sse_event;
use crate::dashboard::DashboardConfig;
use crate::monitor::{MonitorBridge, MonitorRequest};
use crate::profile::ConnectionProfile;
use crate::registry::ConnectionRegistry;
use crate::types::{ConsumerConfig, KvConfig, StreamConfig};
use crate::ErrorKind;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Dashboard server state
#[derive(Clone)]
struct DashboardState {
    actions: Actions,
    bridge: Arc<MonitorBridge>,
}

/// Dashboard HTTP server
pub struct DashboardServer {
    config: DashboardConfig,
    state: DashboardState,
}

impl DashboardServer {
    pub fn new(
        config: DashboardConfig,
        registry: Arc<ConnectionRegistry>,
        bridge: Arc<MonitorBridge>,
    ) -> Self {
        Self {
            config,
            state: DashboardState {
                actions: Actions::new(registry),
                bridge,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/monitor", get(monitor_handler))
            .route("/api/connections/test", post(test_connection_handler))
            .route("/api/connections/info", post(server_info_handler))
            .route("/api/connections/:id", delete(close_connection_handler))
            .route("/api/streams/list", post(list_streams_handler))
            .route("/api/streams/create", post(create_stream_handler))
            .route("/api/streams/delete", post(delete_stream_handler))
            .route("/api/streams/info", post(stream_info_handler))
            .route("/api/consumers/list", post(list_consumers_handler))
            .route("/api/consumers/create", post(create_consumer_handler))
            .route("/api/consumers/delete", post(delete_consumer_handler))
            .route("/api/kv/list", post(list_buckets_handler))
            .route("/api/kv/create", post(create_bucket_handler))
            .route("/api/kv/delete", post(delete_bucket_handler))
            .route("/api/kv/keys", post(bucket_keys_handler))
            .route("/api/kv/get", post(get_entry_handler))
            .route("/api/kv/put", post(put_entry_handler))
            .route("/api/messages/publish", post(publish_handler))
            .route("/api/messages/request", post(request_handler))
            .route("/api/messages/stream-publish", post(stream_publish_handler))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr();
        info!(target: "dashboard", addr = %addr, "Starting Dashboard server");
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        info!(
            target: "dashboard",
            url = %format!("http://{}", listener.local_addr()?),
            "Dashboard server ready"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None => StatusCode::OK,
        Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::Connection) | Some(ErrorKind::Transport) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::Serialization) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(response: ActionResponse<T>) -> Response {
    (status_for(response.error_kind()), Json(response)).into_response()
}

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.actions.registry().len(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorQuery {
    connection_id: Option<String>,
    subject: Option<String>,
    /// Comma separated server URLs
    servers: Option<String>,
}

/// SSE endpoint relaying one subject
async fn monitor_handler(
    State(state): State<DashboardState>,
    Query(query): Query<MonitorQuery>,
) -> Response {
    let Some(connection_id) = query.connection_id.filter(|id| !id.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing connectionId").into_response();
    };

    let request = MonitorRequest::new(
        connection_id,
        query.subject,
        query.servers.as_deref().map(MonitorRequest::parse_servers),
    );
    info!(
        target: "dashboard",
        connection_id = %request.connection_id,
        subject = %request.subject,
        "New monitor client connected"
    );

    // Dropping the response body drops the session, which ends the relay
    let session = state.bridge.open(request);
    let stream = session.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

#[derive(Debug, Deserialize)]
struct ConnectionBody {
    connection: ConnectionProfile,
}

#[derive(Debug, Deserialize)]
struct StreamNameBody {
    connection: ConnectionProfile,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StreamCreateBody {
    connection: ConnectionProfile,
    config: StreamConfig,
}

#[derive(Debug, Deserialize)]
struct ConsumerListBody {
    connection: ConnectionProfile,
    stream: String,
}

#[derive(Debug, Deserialize)]
struct ConsumerCreateBody {
    connection: ConnectionProfile,
    stream: String,
    config: ConsumerConfig,
}

#[derive(Debug, Deserialize)]
struct ConsumerDeleteBody {
    connection: ConnectionProfile,
    stream: String,
    consumer: String,
}

#[derive(Debug, Deserialize)]
struct BucketBody {
    connection: ConnectionProfile,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct BucketCreateBody {
    connection: ConnectionProfile,
    config: KvConfig,
}

#[derive(Debug, Deserialize)]
struct EntryBody {
    connection: ConnectionProfile,
    bucket: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct EntryPutBody {
    connection: ConnectionProfile,
    bucket: String,
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PublishBody {
    connection: ConnectionProfile,
    subject: String,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    connection: ConnectionProfile,
    subject: String,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamPublishBody {
    connection: ConnectionProfile,
    subject: String,
    #[serde(default)]
    payload: String,
}

async fn test_connection_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConnectionBody>,
) -> Response {
    respond(state.actions.test_connection(&body.connection).await)
}

async fn server_info_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConnectionBody>,
) -> Response {
    respond(state.actions.server_info(&body.connection).await)
}

async fn close_connection_handler(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> Response {
    respond(state.actions.close_connection(&id).await)
}

async fn list_streams_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConnectionBody>,
) -> Response {
    respond(state.actions.list_streams(&body.connection).await)
}

async fn create_stream_handler(
    State(state): State<DashboardState>,
    Json(body): Json<StreamCreateBody>,
) -> Response {
    respond(state.actions.create_stream(&body.connection, body.config).await)
}

async fn delete_stream_handler(
    State(state): State<DashboardState>,
    Json(body): Json<StreamNameBody>,
) -> Response {
    respond(state.actions.delete_stream(&body.connection, &body.name).await)
}

async fn stream_info_handler(
    State(state): State<DashboardState>,
    Json(body): Json<StreamNameBody>,
) -> Response {
    respond(state.actions.stream_info(&body.connection, &body.name).await)
}

async fn list_consumers_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConsumerListBody>,
) -> Response {
    respond(state.actions.list_consumers(&body.connection, &body.stream).await)
}

async fn create_consumer_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConsumerCreateBody>,
) -> Response {
    respond(
        state
            .actions
            .create_consumer(&body.connection, &body.stream, body.config)
            .await,
    )
}

async fn delete_consumer_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConsumerDeleteBody>,
) -> Response {
    respond(
        state
            .actions
            .delete_consumer(&body.connection, &body.stream, &body.consumer)
            .await,
    )
}

async fn list_buckets_handler(
    State(state): State<DashboardState>,
    Json(body): Json<ConnectionBody>,
) -> Response {
    respond(state.actions.list_buckets(&body.connection).await)
}

async fn create_bucket_handler(
    State(state): State<DashboardState>,
    Json(body): Json<BucketCreateBody>,
) -> Response {
    respond(state.actions.create_bucket(&body.connection, body.config).await)
}

async fn delete_bucket_handler(
    State(state): State<DashboardState>,
    Json(body): Json<BucketBody>,
) -> Response {
    respond(state.actions.delete_bucket(&body.connection, &body.bucket).await)
}

async fn bucket_keys_handler(
    State(state): State<DashboardState>,
    Json(body): Json<BucketBody>,
) -> Response {
    respond(state.actions.bucket_keys(&body.connection, &body.bucket).await)
}

async fn get_entry_handler(
    State(state): State<DashboardState>,
    Json(body): Json<EntryBody>,
) -> Response {
    respond(
        state
            .actions
            .get_entry(&body.connection, &body.bucket, &body.key)
            .await,
    )
}

async fn put_entry_handler(
    State(state): State<DashboardState>,
    Json(body): Json<EntryPutBody>,
) -> Response {
    respond(
        state
            .actions
            .put_entry(&body.connection, &body.bucket, &body.key, &body.value)
            .await,
    )
}

async fn publish_handler(
    State(state): State<DashboardState>,
    Json(body): Json<PublishBody>,
) -> Response {
    respond(
        state
            .actions
            .publish(&body.connection, &body.subject, &body.payload, body.headers)
            .await,
    )
}

async fn request_handler(
    State(state): State<DashboardState>,
    Json(body): Json<RequestBody>,
) -> Response {
    respond(
        state
            .actions
            .request(&body.connection, &body.subject, &body.payload, body.timeout_ms)
            .await,
    )
}

async fn stream_publish_handler(
    State(state): State<DashboardState>,
    Json(body): Json<StreamPublishBody>,
) -> Response {
    respond(
        state
            .actions
            .publish_to_stream(&body.connection, &body.subject, &body.payload)
            .await,
    )
}
