use crate::cli::ServeArgs;
use crate::infra::{AppState, DigestRenderer, LoggingDispatcher, RetryingDispatcher};
use crate::routes::with_signing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use lease_sign::config::{AppConfig, ConfigError};
use lease_sign::error::AppError;
use lease_sign::signing::{run_sweep, InMemoryAgreementStore, SigningEngine};
use lease_sign::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(secs) = args.sweep_interval_secs.take() {
        if secs == 0 {
            return Err(ConfigError::InvalidSweepInterval.into());
        }
        config.scheduler.sweep_interval_secs = secs;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryAgreementStore::new());
    let renderer = Arc::new(DigestRenderer);
    let notifier = Arc::new(RetryingDispatcher::new(Arc::new(LoggingDispatcher)));
    let engine = Arc::new(SigningEngine::new(store, renderer, notifier));

    let sweeper = engine.clone();
    let sweep_interval = config.scheduler.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = run_sweep(&sweeper.coordinator, Utc::now());
            for failure in &report.failures {
                warn!(agreement = %failure.agreement_id.0, "sweep skipped agreement: {}", failure.error);
            }
        }
    });

    let app = with_signing_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lease signing engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
