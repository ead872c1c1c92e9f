//! RPC method dispatch.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::context::AppContext;
use crate::core::{BatchConfig, Volume, VolumeState};

use super::protocol::{Request, Response};

/// Status payload of `daemon.status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub rpc_bind: String,
    pub simulation: bool,
    pub batch_enabled: bool,
    pub processing: usize,
    pub completed: usize,
}

/// One entry of `volumes.list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeEntry {
    #[serde(flatten)]
    pub volume: Volume,
    pub state: VolumeState,
}

#[derive(Debug, Deserialize)]
struct BatchSetParams {
    enabled: bool,
    #[serde(default)]
    source_file: Option<PathBuf>,
    #[serde(default)]
    dest_filename: Option<String>,
}

pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id),
            "registry.status" => Response::success(id, self.ctx.registry.status()),
            "volumes.list" => self.volumes_list(id).await,
            "batch.get" => Response::success(id, self.ctx.registry.batch()),
            "batch.set" => self.batch_set(id, params),
            _ => Response::method_not_found(id, &request.method),
        }
    }

    fn daemon_status(&self, id: Value) -> Response {
        let status = self.ctx.registry.status();

        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                rpc_bind: self.ctx.config.rpc_bind.to_string(),
                simulation: self.ctx.config.simulation,
                batch_enabled: status.batch.enabled,
                processing: status.processing,
                completed: status.completed,
            },
        )
    }

    async fn volumes_list(&self, id: Value) -> Response {
        let enumerator = self.ctx.enumerator.clone();
        let volumes = match tokio::task::spawn_blocking(move || enumerator.enumerate()).await {
            Ok(Ok(volumes)) => volumes,
            Ok(Err(e)) => return Response::internal_error(id, e.to_string()),
            Err(e) => return Response::internal_error(id, format!("Enumeration task failed: {}", e)),
        };

        let entries: Vec<VolumeEntry> = volumes
            .into_iter()
            .map(|volume| VolumeEntry {
                state: self.ctx.registry.state_of(&volume.id),
                volume,
            })
            .collect();

        Response::success(id, entries)
    }

    fn batch_set(&self, id: Value, params: Value) -> Response {
        let params: BatchSetParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e.to_string()),
        };

        let config = if params.enabled {
            let Some(source) = params.source_file else {
                return Response::invalid_params(id, "source_file is required to enable batch mode");
            };
            if !source.is_file() {
                return Response::invalid_params(
                    id,
                    format!("source file not found: {}", source.display()),
                );
            }
            BatchConfig {
                enabled: true,
                source_file: Some(source),
                dest_filename: params.dest_filename,
            }
        } else {
            BatchConfig::disabled()
        };

        info!(
            enabled = config.enabled,
            source = ?config.source_file,
            "Batch mode updated over RPC"
        );
        self.ctx.registry.set_batch(config.clone());
        Response::success(id, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedEnumerator;
    use crate::config::AppConfig;
    use crate::core::ChannelSink;
    use crate::rpc::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn handler() -> (MethodHandler, crate::adapters::SimulatedController) {
        let (enumerator, controller) = SimulatedEnumerator::new();
        let (sink, _rx) = ChannelSink::new();
        let ctx = AppContext::new(AppConfig::default(), Arc::new(enumerator), Arc::new(sink));
        (MethodHandler::new(ctx), controller)
    }

    fn call(method: &str, params: Option<Value>) -> Request {
        Request::new(method, params, Value::from(1))
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (handler, _) = handler();
        let resp = handler.handle(call("volumes.eject", None)).await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_daemon_status() {
        let (handler, _) = handler();
        let resp = handler.handle(call("daemon.status", None)).await;
        let status: DaemonStatus = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
        assert!(!status.batch_enabled);
        assert_eq!(status.processing, 0);
    }

    #[tokio::test]
    async fn test_batch_set_requires_existing_source() {
        let (handler, _) = handler();

        let resp = handler
            .handle(call("batch.set", Some(json!({"enabled": true}))))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);

        let resp = handler
            .handle(call(
                "batch.set",
                Some(json!({"enabled": true, "source_file": "/nonexistent/track.wav"})),
            ))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
        assert!(!handler.ctx.registry.batch().enabled);
    }

    #[tokio::test]
    async fn test_batch_set_and_get() {
        let (handler, _) = handler();
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("track.wav");
        std::fs::write(&source, b"audio").unwrap();

        let resp = handler
            .handle(call(
                "batch.set",
                Some(json!({"enabled": true, "source_file": source, "dest_filename": "out.wav"})),
            ))
            .await;
        assert!(resp.error.is_none());

        let resp = handler.handle(call("batch.get", None)).await;
        let batch: BatchConfig = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(batch.enabled);
        assert_eq!(batch.source_file.as_deref(), Some(source.as_path()));
        assert_eq!(batch.dest_filename.as_deref(), Some("out.wav"));

        let resp = handler
            .handle(call("batch.set", Some(json!({"enabled": false}))))
            .await;
        assert!(resp.error.is_none());
        assert!(!handler.ctx.registry.batch().enabled);
    }

    #[tokio::test]
    async fn test_volumes_list_reports_state() {
        let (handler, controller) = handler();
        let dir = TempDir::new().unwrap();
        controller.insert("/dev/sdb1", dir.path());
        handler.ctx.registry.replace_known(["/dev/sdb1".to_string()]);
        handler.ctx.registry.add_if_absent_from_both("/dev/sdb1");

        let resp = handler.handle(call("volumes.list", None)).await;
        let entries: Vec<VolumeEntry> = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].volume.id, "/dev/sdb1");
        assert_eq!(entries[0].state, VolumeState::Processing);
    }
}
