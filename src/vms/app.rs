// SPDX-License-Identifier: GPL-2.0-or-later

//! Process wiring (§4.10 Health & Shutdown): builds every core component,
//! starts the periodic health/supervisor sweeps and the HTTP server, and
//! drains everything in order on a termination signal. `CancellationToken`
//! plus a `shutdown_complete` mpsc channel, with a `select!` over
//! `ctrl_c`/SIGTERM/server-exit driving the cancellation.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};

use common::{ArcLogger, LogEntry, LogLevel};
use env::{EnvConf, EnvConfigNewError};
use handler::{router, AppState};
use ingest::IngestSupervisor;
use live::LivePublisher;
use log::{log_db::LogDb, Logger};
use metastore::{MetaError, MetaStore, RecordingMode};
use retention::RetentionEngine;
use storage::Disk;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    signal,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

/// §4.10: store pings every 30 s flip `healthy`/`degraded`, and the same
/// tick drives the supervisor/live-publisher sweeps.
const HEALTH_TICK: StdDuration = StdDuration::from_secs(30);
/// §4.9: the scheduled retention run's cadence. Only required to be
/// "periodic"; an hourly cadence keeps disk-safety phase C from ever
/// being the first thing to notice a quota breach.
const RETENTION_TICK: StdDuration = StdDuration::from_secs(3600);
/// §4.10: total bound on the ordered drain; any component still running
/// past this is abandoned rather than awaited further.
const DRAIN_TIMEOUT: StdDuration = StdDuration::from_secs(30);
/// §4.10 ingest drain: "stop all ingest supervisors (graceful, 5 s each)".
const INGEST_DRAIN_GRACE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("create env config: {0}")]
    NewEnvConfig(#[from] EnvConfigNewError),

    #[error("invalid ENCRYPTION_KEY: {0}")]
    EncryptionKey(#[from] common::ParseEncryptionKeyError),

    #[error("open metadata store: {0}")]
    OpenStore(#[from] MetaError),

    #[error("listen on sigterm: {0}")]
    SigTermListener(std::io::Error),

    #[error("bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("server: {0}")]
    Server(std::io::Error),
}

/// Flipped by the 30 s store-ping tick; read by the external health
/// endpoint. `Arc<AtomicBool>` rather than a richer type since "healthy" is
/// the only externally-visible fact (§4.10) — the store error that caused a
/// flip is already on the logger feed.
#[derive(Clone)]
pub struct Health(Arc<AtomicBool>);

impl Health {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Relaxed);
    }
}

pub async fn run(config_path: &std::path::PathBuf) -> Result<(), RunError> {
    let app = App::new(config_path).await?;
    let mut shutdown_complete_rx = app.run().await?;
    shutdown_complete_rx.recv().await;
    Ok(())
}

struct App {
    token: CancellationToken,
    env: EnvConf,
    logger: ArcLogger,
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    store: MetaStore,
    ingest: Arc<IngestSupervisor>,
    live: Arc<LivePublisher>,
    retention: Arc<RetentionEngine>,
    health: Health,
    router: axum::Router,
}

impl App {
    async fn new(config_path: &std::path::PathBuf) -> Result<Self, RunError> {
        let token = CancellationToken::new();
        let env = EnvConf::new(config_path)?;
        let encryption_key = env.encryption_key()?;

        let logger_concrete = Arc::new(Logger::new());
        let logger: ArcLogger = logger_concrete.clone();
        let log_db = Arc::new(LogDb::new(env.config_dir().join("logs")));
        spawn_log_persistence(logger_concrete.clone(), Arc::clone(&log_db), token.clone());

        let store = MetaStore::open(&env.config_dir().join("vms.db"))?;
        let disk = Arc::new(Disk::new(env.recordings_dir().to_path_buf(), env.max_disk_usage()));

        let ingest = IngestSupervisor::new(store.clone(), env.recordings_dir().to_path_buf(), encryption_key.clone(), Arc::clone(&logger));
        let live = LivePublisher::new(store.clone(), env.live_dir().to_path_buf(), encryption_key.clone(), Arc::clone(&logger));
        let retention = RetentionEngine::new(store.clone(), env.recordings_dir().to_path_buf(), Arc::clone(&disk), Arc::clone(&logger));

        let health = Health::new();

        let state = AppState {
            store: store.clone(),
            ingest: Arc::clone(&ingest),
            live: Arc::clone(&live),
            retention: Arc::clone(&retention),
            disk: Arc::clone(&disk),
            recordings_dir: env.recordings_dir().to_path_buf(),
            export_dir: env.export_dir().to_path_buf(),
            encryption_key,
            logger: Arc::clone(&logger),
        };
        let health_router = axum::Router::new()
            .route("/healthz", axum::routing::get(healthz))
            .with_state(health.clone());
        let router = router(state).merge(health_router);

        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        Ok(Self {
            token,
            env,
            logger,
            shutdown_complete_tx,
            shutdown_complete_rx,
            store,
            ingest,
            live,
            retention,
            health,
            router,
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logger.log(LogEntry::new(level, "app", None, message.into()));
    }

    async fn run(mut self) -> Result<mpsc::Receiver<()>, RunError> {
        self.log(LogLevel::Info, format!("serving vms on port {}", self.env.port()));

        spawn_health_sweep(
            self.store.clone(),
            Arc::clone(&self.ingest),
            Arc::clone(&self.live),
            self.health.clone(),
            Arc::clone(&self.logger),
            self.token.clone(),
        );
        spawn_retention_schedule(Arc::clone(&self.retention), Arc::clone(&self.logger), self.token.clone());

        let (server_exited_tx, server_exited_rx) = oneshot::channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.env.port());
        tokio::spawn(start_server(self.token.child_token(), server_exited_tx, addr, self.router));

        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(RunError::SigTermListener)?;
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => eprintln!("\nreceived interrupt, stopping.."),
                        Err(e) => eprintln!("\ninterrupt error: {e}"),
                    }
                }
                _ = sigterm.recv() => eprintln!("\nreceived terminate, stopping.."),
                res = server_exited_rx => {
                    if let Err(e) = res {
                        eprintln!("server error: {e}");
                    }
                }
            }
            token.cancel();
        });

        let token = self.token.clone();
        let shutdown_complete_tx = self.shutdown_complete_tx.clone();
        let ingest = Arc::clone(&self.ingest);
        let live = Arc::clone(&self.live);
        let store = self.store.clone();
        let logger = Arc::clone(&self.logger);
        tokio::spawn(async move {
            token.cancelled().await;
            drain(ingest, live, store, logger).await;
            drop(shutdown_complete_tx);
        });

        Ok(self.shutdown_complete_rx)
    }
}

/// §4.10 ordered drain: (1) new requests already stopped, since the server
/// task's `with_graceful_shutdown` fires on the same cancellation this task
/// waits on; (2) live publishers; (3) ingest supervisors, 5 s grace each;
/// (4) the retention scheduler, which just stops being polled once this
/// task's own token is cancelled; (5) the store connection is dropped with
/// the last `MetaStore` clone. The whole sequence is bounded by
/// `DRAIN_TIMEOUT`; anything still running past it is abandoned, not
/// force-killed process-wide, since the process itself exits right after.
async fn drain(ingest: Arc<IngestSupervisor>, live: Arc<LivePublisher>, store: MetaStore, logger: ArcLogger) {
    let sequence = async {
        for id in active_camera_ids(&store).await {
            live.stop_live(&id).await.ok();
        }
        for id in active_camera_ids(&store).await {
            if ingest.recording_status(&id).await == metastore::RecordingState::Recording {
                tokio::time::timeout(INGEST_DRAIN_GRACE, ingest.stop_recording(&id)).await.ok();
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, sequence).await.is_err() {
        logger.log(LogEntry::new(LogLevel::Warning, "app", None, "drain exceeded 30s, shutting down anyway".to_owned()));
    }
}

async fn active_camera_ids(store: &MetaStore) -> Vec<common::CameraId> {
    store
        .camera_list(None)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.id)
        .collect()
}

fn spawn_log_persistence(logger: Arc<Logger>, log_db: Arc<LogDb>, token: CancellationToken) {
    let mut rx = logger.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                entry = rx.recv() => {
                    let Ok(entry) = entry else { continue };
                    log_db
                        .append(entry.at, entry.level, &entry.source, entry.camera_id.as_ref(), &entry.message)
                        .await
                        .ok();
                }
            }
        }
    });
}

fn spawn_health_sweep(store: MetaStore, ingest: Arc<IngestSupervisor>, live: Arc<LivePublisher>, health: Health, logger: ArcLogger, token: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEALTH_TICK);
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = tick.tick() => {}
            }

            let healthy = store.ping().await.is_ok();
            health.set(healthy);
            if !healthy {
                logger.log(LogEntry::new(LogLevel::Error, "app", None, "store ping failed, health degraded".to_owned()));
            }

            ingest.sweep_hung().await;
            live.sweep_idle().await;

            match store.camera_list(Some(true)).await {
                Ok(cameras) => {
                    for cam in cameras {
                        if cam.recording_mode == RecordingMode::Continuous {
                            ingest.start_recording(&cam.id).await.ok();
                        }
                    }
                }
                Err(e) => logger.log(LogEntry::new(LogLevel::Error, "app", None, format!("health sweep: list cameras: {e}"))),
            }
        }
    });
}

fn spawn_retention_schedule(retention: Arc<RetentionEngine>, logger: ArcLogger, token: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(RETENTION_TICK);
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = tick.tick() => {}
            }
            match retention.run_cleanup().await {
                Ok(report) => logger.log(LogEntry::new(
                    LogLevel::Info,
                    "app",
                    None,
                    format!(
                        "scheduled cleanup: expired={} quota={} disk_safety={} orphans_imported={}",
                        report.expired_deleted, report.quota_deleted, report.disk_safety_deleted, report.orphans_imported
                    ),
                )),
                Err(retention::RetentionError::AlreadyRunning) => {}
                Err(e) => logger.log(LogEntry::new(LogLevel::Error, "app", None, format!("scheduled cleanup failed: {e}"))),
            }
        }
    });
}

async fn healthz(axum::extract::State(health): axum::extract::State<Health>) -> axum::response::Response {
    use axum::response::IntoResponse;
    if health.is_healthy() {
        (axum::http::StatusCode::OK, "healthy").into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded").into_response()
    }
}

async fn start_server(token: CancellationToken, on_exit: oneshot::Sender<Result<(), RunError>>, addr: SocketAddr, router: axum::Router) {
    let listener = match TcpListener::bind(addr).await {
        Ok(v) => v,
        Err(e) => {
            on_exit.send(Err(RunError::Bind(addr, e))).ok();
            return;
        }
    };
    let graceful = axum::serve(listener, router).with_graceful_shutdown(async move { token.cancelled().await });
    on_exit.send(graceful.await.map_err(RunError::Server)).ok();
}
