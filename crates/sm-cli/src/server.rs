use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sm_core::{Encoder, Features, SpectrumCompressor, StarId};
use tokio::sync::Mutex;

use crate::session::Session;

const DEFAULT_TOP_K: i64 = 10;
const DEFAULT_BRIGHTNESS: f64 = 0.5;

#[derive(Clone)]
pub struct SmServer {
    state: Arc<Mutex<ServerState>>,
    tool_router: ToolRouter<Self>,
}

struct ServerState {
    /// `None` once the server has shut down.
    session: Option<Session>,
}

impl SmServer {
    pub fn new(session: Session) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                session: Some(session),
            })),
            tool_router: Self::tool_router(),
        }
    }

    /// Close the session: wait for index work, checkpoint the WAL.
    pub async fn shutdown(&self) {
        let session = self.state.lock().await.session.take();
        if let Some(session) = session {
            session.close();
            tracing::info!("session closed");
        }
    }

    fn stats_json(session: &Session) -> serde_json::Value {
        let stats = session.engine().stats();
        serde_json::json!({
            "stars": stats.total,
            "indexed": stats.indexed,
            "staged": stats.staged,
            "generation": stats.generation,
            "rebuilding": stats.rebuilding,
            "compression_ratio": SpectrumCompressor::compression_ratio(),
        })
    }
}

fn closed() -> McpError {
    McpError::internal_error("server is shutting down", None)
}

fn features_from(
    values: &[f64],
    frequency: Option<f64>,
    phase: Option<f64>,
) -> Result<Features, McpError> {
    let components = <[f64; 4]>::try_from(values).map_err(|_| {
        McpError::invalid_params(
            format!("features must have exactly 4 values, got {}", values.len()),
            None,
        )
    })?;
    let mut features = Features::new(components);
    if let Some(f) = frequency {
        features = features.with_frequency(f);
    }
    if let Some(p) = phase {
        features = features.with_phase(p);
    }
    Ok(features)
}

fn json_result(value: &impl Serialize) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct RememberRequest {
    /// Four raw feature values describing the experience
    features: Vec<f64>,
    /// Importance in [0, 1]. Defaults to 0.5
    brightness: Option<f64>,
    /// Pull on related memories in [0, 1]. Defaults to 0
    gravity: Option<f64>,
    /// Optional frequency hint in [0, 1]
    frequency: Option<f64>,
    /// Optional phase hint in radians
    phase: Option<f64>,
    /// Free-form labels returned with recalled memories
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RecallRequest {
    /// Four raw feature values to recall around
    features: Vec<f64>,
    /// Minimum resonance score. Negative values act as 0
    threshold: Option<f64>,
    /// Maximum number of memories. Zero or negative returns nothing. Defaults to 10
    top_k: Option<i64>,
    /// Stop scoring after this many milliseconds and return what was found
    deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConstellationRequest {
    /// Star ids to group. All stars when omitted
    star_ids: Option<Vec<u64>>,
    /// Maximum edge length. Defaults to the configured distance
    connection_distance: Option<f64>,
}

#[tool_router]
impl SmServer {
    #[tool(
        description = "Store a memory. Encodes four feature values into a 12-byte code and places it as a star in the 4-D field. Returns the new star id."
    )]
    async fn sm_remember(
        &self,
        Parameters(req): Parameters<RememberRequest>,
    ) -> Result<CallToolResult, McpError> {
        let features = features_from(&req.features, req.frequency, req.phase)?;
        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or_else(closed)?;

        let star = session
            .remember(
                &features,
                req.brightness.unwrap_or(DEFAULT_BRIGHTNESS),
                req.gravity.unwrap_or(0.0),
                &req.tags,
            )
            .map_err(|e| McpError::internal_error(format!("{e:#}"), None))?;

        let result = serde_json::json!({
            "id": star.id,
            "coordinates": star.coordinates,
            "brightness": star.brightness,
            "gravity": star.gravity,
            "tags": star.tags,
            "created_at": sm_core::time::micros_to_iso8601(star.created_at),
        });
        Ok(json_result(&result))
    }

    #[tool(
        description = "Recall memories that resonate with four feature values. Returns the best-scoring stars with their tags, score and an approximate reconstruction of the stored pattern."
    )]
    async fn sm_recall(
        &self,
        Parameters(req): Parameters<RecallRequest>,
    ) -> Result<CallToolResult, McpError> {
        let features = features_from(&req.features, None, None)?;
        let top_k = usize::try_from(req.top_k.unwrap_or(DEFAULT_TOP_K)).unwrap_or(0);
        let deadline = req
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or_else(closed)?;
        let outcome = session.engine().recall_at(
            Encoder::encode(&features),
            req.threshold.unwrap_or(0.0),
            top_k,
            deadline,
        );
        Ok(json_result(&outcome))
    }

    #[tool(
        description = "Group stars into constellations: stars closer than the connection distance are linked, and each connected group is classified as fragment, chain or cluster and labeled with its nearest tone."
    )]
    async fn sm_constellation(
        &self,
        Parameters(req): Parameters<ConstellationRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or_else(closed)?;
        let engine = session.engine();

        let ids: Vec<StarId> = match req.star_ids {
            Some(ids) => ids.into_iter().map(StarId).collect(),
            None => engine.store().snapshot().iter().map(|s| s.id).collect(),
        };
        let distance = req
            .connection_distance
            .unwrap_or(engine.config().default_connection_distance);

        let constellations = engine
            .form_constellation(&ids, distance)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        Ok(json_result(&constellations))
    }

    #[tool(
        description = "Get memory statistics: total stars, how many are indexed or staged, index generation and the compression ratio."
    )]
    async fn sm_stats(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or_else(closed)?;

        let mut stats = Self::stats_json(session);
        if let Ok(size) = session.store().db_size() {
            stats["db_size_bytes"] = serde_json::json!(size);
        }
        Ok(json_result(&stats))
    }
}

#[tool_handler]
impl ServerHandler for SmServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Compressed associative memory. Each memory is four feature values plus \
                 brightness, gravity and tags.\n\n\
                 - sm_remember stores a memory and returns its star id.\n\
                 - sm_recall returns the memories resonating most with a feature vector. \
                   Scores fall off with distance and rise with brightness and gravity.\n\
                 - sm_constellation groups stars by proximity and names each group's tone.\n\
                 - sm_stats reports store size and index state."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
