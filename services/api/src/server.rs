use crate::cli::ServeArgs;
use crate::infra::{open_store, save_store, AppState};
use crate::routes::with_platform_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use gridflow::api::ApiContext;
use gridflow::config::AppConfig;
use gridflow::error::AppError;
use gridflow::pipeline::PipelineConfig;
use gridflow::scheduler::{self, Scheduler};
use gridflow::tasks::{Heartbeat, TaskContext, TaskQueue, Worker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub(crate) async fn run(mut config: AppConfig, mut args: ServeArgs) -> Result<(), AppError> {
    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    let store = Arc::new(open_store(&config)?);
    let (queue, receiver) = TaskQueue::channel();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background = Vec::new();

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let mut context = ApiContext::new(store.clone(), queue.clone());
    if args.no_worker {
        info!("task worker disabled; queued tasks will not run");
    } else {
        let heartbeat = Heartbeat::new();
        let task_context = Arc::new(TaskContext::new(
            store.clone(),
            queue.clone(),
            config.worker.clone(),
            config.scheduler.clone(),
            PipelineConfig::default(),
        ));
        let worker = Worker::new(task_context, heartbeat.clone());
        background.push(tokio::spawn(worker.run(receiver, shutdown_tx.subscribe())));
        context = context.with_heartbeat(heartbeat);
    }

    if args.no_scheduler || !config.scheduler.enabled {
        info!("scheduler disabled");
    } else {
        let table = Scheduler::new(&config.scheduler, Utc::now())?;
        background.push(tokio::spawn(scheduler::run(
            table,
            store.clone(),
            queue.clone(),
            config.scheduler.tick,
            shutdown_tx.subscribe(),
        )));
    }

    let app = with_platform_routes(Arc::new(context))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "gridflow ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    readiness_flag.store(false, Ordering::Release);
    let _ = shutdown_tx.send(());
    for handle in background {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "background task ended abnormally");
        }
    }

    save_store(&config, &store)
}
