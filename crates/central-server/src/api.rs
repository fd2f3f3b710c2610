use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::{delete, get, post},
};
use domain::changeset::{
    ChangesetCommandSpec, ChangesetFilter, ChangesetOptions, ChangesetStatus,
};
use domain::command::{CommandFilter, CommandStatus, CommandTarget, Expect};
use domain::error::CoreError;
use domain::ids::{DeviceId, GroupId, SiteId, TenantId};
use domain::topology::Link;
use futures::Stream;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::{sync::Arc, time::Duration};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0.kind() {
            "not_found" => StatusCode::NOT_FOUND,
            "state" | "protocol" => StatusCode::BAD_REQUEST,
            "resource" => StatusCode::TOO_MANY_REQUESTS,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "cancelled" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string(), "kind": self.0.kind()}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/stats", get(device_stats))
        .route("/api/devices/{tenant}/{site}/{device_id}", get(get_device))
        .route(
            "/api/topology/{tenant}/{site}",
            get(get_topology).put(put_topology),
        )
        .route(
            "/api/topology/{tenant}/{site}/devices/{device_id}",
            post(update_topology_device).delete(delete_topology_device),
        )
        .route(
            "/api/topology/{tenant}/{site}/links",
            post(add_link).delete(remove_link),
        )
        .route("/api/commands", get(list_commands).post(send_command))
        .route("/api/commands/{id}", get(get_command))
        .route("/api/commands/{id}/cancel", post(cancel_command))
        .route("/api/changesets", get(list_changesets).post(create_changeset))
        .route("/api/changesets/{id}", get(get_changeset).delete(delete_changeset))
        .route("/api/changesets/{id}/commands", post(add_changeset_command))
        .route(
            "/api/changesets/{id}/rollback-commands",
            post(add_changeset_rollback_command),
        )
        .route("/api/changesets/{id}/execute", post(execute_changeset))
        .route("/api/changesets/{id}/rollback", post(rollback_changeset))
        .route("/api/events", get(sse_handler))
        .layer(cors)
        .with_state(state)
}

fn tenant_site(tenant: &str, site: &str) -> Result<(TenantId, SiteId), ApiError> {
    Ok((TenantId::new(tenant)?, SiteId::new(site)?))
}

#[derive(Deserialize, Default)]
struct DeviceListQuery {
    tenant: Option<String>,
    site: Option<String>,
    online: Option<bool>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DeviceListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = domain::device::DeviceFilter {
        tenant: q.tenant.map(TenantId::new).transpose()?,
        site: q.site.map(SiteId::new).transpose()?,
        online: q.online,
    };
    let page = state.devices.list(filter, q.limit.unwrap_or(100), q.offset.unwrap_or(0)).await;
    Ok(Json(json!({"items": page.items, "total": page.total})))
}

async fn device_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices.stats().await)
}

async fn get_device(
    Path((tenant, site, device_id)): Path<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    let device_id = DeviceId::new(device_id)?;
    match state.devices.get(&tenant, &site, &device_id).await {
        Some(device) => Ok(Json(device)),
        None => Err(CoreError::not_found(format!("device {device_id} not found")).into()),
    }
}

async fn get_topology(
    Path((tenant, site)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    match state.topology.get_topology(&tenant, &site).await? {
        Some(topology) => Ok(Json(topology)),
        None => Err(CoreError::not_found(format!("no topology for {tenant}/{site}")).into()),
    }
}

async fn put_topology(
    Path((tenant, site)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(topology): Json<domain::topology::Topology>,
) -> ApiResult<impl IntoResponse> {
    let _ = tenant_site(&tenant, &site)?;
    state.topology.put_topology(&topology).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_topology_device(
    Path((tenant, site, _device_id)): Path<(String, String, String)>,
    State(state): State<Arc<AppState>>,
    Json(device): Json<domain::device::Device>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    state.topology.update_device(&tenant, &site, &device).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_topology_device(
    Path((tenant, site, device_id)): Path<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    let device_id = DeviceId::new(device_id)?;
    state.topology.delete_device(&tenant, &site, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_link(
    Path((tenant, site)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(link): Json<Link>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    state.topology.add_link(&tenant, &site, link).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RemoveLinkRequest {
    from: String,
    to: String,
}

async fn remove_link(
    Path((tenant, site)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveLinkRequest>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&tenant, &site)?;
    let from = DeviceId::new(req.from)?;
    let to = DeviceId::new(req.to)?;
    state.topology.remove_link(&tenant, &site, &from, &to).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SendCommandRequest {
    tenant: String,
    site: String,
    device_id: Option<String>,
    group_id: Option<String>,
    operation: String,
    #[serde(default)]
    args: Map<String, Value>,
    timeout_ms: Option<u64>,
    #[serde(default = "default_expect")]
    expect: String,
}

fn default_expect() -> String {
    "result".to_string()
}

fn parse_expect(raw: &str) -> Result<Expect, ApiError> {
    match raw {
        "ack" => Ok(Expect::Ack),
        "result" => Ok(Expect::Result),
        "none" => Ok(Expect::None),
        other => Err(CoreError::protocol(format!("unknown expect '{other}'")).into()),
    }
}

async fn send_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendCommandRequest>,
) -> ApiResult<impl IntoResponse> {
    let tenant = TenantId::new(req.tenant)?;
    let site = SiteId::new(req.site)?;
    let target = match (req.device_id, req.group_id) {
        (Some(device_id), None) => CommandTarget::Device(DeviceId::new(device_id)?),
        (None, Some(group_id)) => CommandTarget::Group(GroupId::new(group_id)?),
        _ => {
            return Err(CoreError::protocol(
                "exactly one of device_id or group_id must be set".to_string(),
            )
            .into());
        }
    };
    let expect = parse_expect(&req.expect)?;
    let command = state
        .commands
        .send(tenant, site, target, req.operation, req.args, req.timeout_ms, expect)
        .await?;
    Ok(Json(command))
}

async fn get_command(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    match state.commands.get(&id).await? {
        Some(command) => Ok(Json(command)),
        None => Err(CoreError::not_found(format!("command {id} not found")).into()),
    }
}

#[derive(Deserialize, Default)]
struct CommandListQuery {
    device_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_command_status(raw: &str) -> Result<CommandStatus, ApiError> {
    match raw {
        "pending" => Ok(CommandStatus::Pending),
        "sent" => Ok(CommandStatus::Sent),
        "ack" => Ok(CommandStatus::Ack),
        "completed" => Ok(CommandStatus::Completed),
        "failed" => Ok(CommandStatus::Failed),
        "timeout" => Ok(CommandStatus::Timeout),
        other => Err(CoreError::protocol(format!("unknown command status '{other}'")).into()),
    }
}

async fn list_commands(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CommandListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = CommandFilter {
        device_id: q.device_id.map(DeviceId::new).transpose()?,
        status: q.status.as_deref().map(parse_command_status).transpose()?,
    };
    let page = state.commands.list(filter, q.limit.unwrap_or(100), q.offset.unwrap_or(0)).await?;
    Ok(Json(json!({"items": page.items, "total": page.total})))
}

async fn cancel_command(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.commands.cancel(&id).await?))
}

async fn create_changeset(
    State(state): State<Arc<AppState>>,
    Json(options): Json<ChangesetOptions>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.changesets.create(options).await?))
}

#[derive(Deserialize, Default)]
struct ChangesetListQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_changeset_status(raw: &str) -> Result<ChangesetStatus, ApiError> {
    match raw {
        "draft" => Ok(ChangesetStatus::Draft),
        "executing" => Ok(ChangesetStatus::Executing),
        "completed" => Ok(ChangesetStatus::Completed),
        "failed" => Ok(ChangesetStatus::Failed),
        "rolled_back" => Ok(ChangesetStatus::RolledBack),
        "rollback_failed" => Ok(ChangesetStatus::RollbackFailed),
        other => Err(CoreError::protocol(format!("unknown changeset status '{other}'")).into()),
    }
}

async fn list_changesets(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ChangesetListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = ChangesetFilter {
        status: q.status.as_deref().map(parse_changeset_status).transpose()?,
    };
    let page = state
        .changesets
        .list(filter, q.limit.unwrap_or(100), q.offset.unwrap_or(0))
        .await?;
    Ok(Json(json!({"items": page.items, "total": page.total})))
}

async fn get_changeset(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    match state.changesets.get(&id).await? {
        Some(changeset) => Ok(Json(changeset)),
        None => Err(CoreError::not_found(format!("changeset {id} not found")).into()),
    }
}

async fn delete_changeset(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    state.changesets.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_changeset_command(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ChangesetCommandSpec>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.changesets.add_command(&id, spec).await?))
}

async fn add_changeset_rollback_command(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ChangesetCommandSpec>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.changesets.add_rollback_command(&id, spec).await?))
}

#[derive(Deserialize)]
struct ChangesetScope {
    tenant: String,
    site: String,
}

async fn execute_changeset(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(scope): Json<ChangesetScope>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&scope.tenant, &scope.site)?;
    Ok(Json(state.changesets.execute(&id, tenant, site).await?))
}

async fn rollback_changeset(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(scope): Json<ChangesetScope>,
) -> ApiResult<impl IntoResponse> {
    let (tenant, site) = tenant_site(&scope.tenant, &scope.site)?;
    Ok(Json(state.changesets.rollback(&id, tenant, site).await?))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).map(|msg| match msg {
        Ok(event) => Event::default()
            .json_data(event)
            .map_err(|_| axum::Error::new("serialization error")),
        Err(_) => Ok(Event::default().comment("keep-alive")),
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
}
