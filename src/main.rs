use std::{process, sync::Arc};

use offline_cache::{
    application::{error::AppError, fetch::Origin, worker::CacheWorker},
    cache::{CacheStorage, CacheStore, MemoryStorage},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        origin::HttpOrigin,
        telemetry,
    },
};
use tokio::time::timeout;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::Classify(args) => run_classify(&settings, &args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let worker_config = settings.worker_config()?;
    let origin: Arc<dyn Origin> = Arc::new(HttpOrigin::new(settings.origin.timeout)?);
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    let worker = Arc::new(CacheWorker::new(
        worker_config,
        &settings.cache,
        Arc::clone(&settings.classifier),
        storage,
        Arc::clone(&origin),
    ));

    let report = worker.start().await;
    info!(
        target = "offline_cache::serve",
        cached = report.cached,
        total = report.total,
        state = worker.state().as_str(),
        "worker started"
    );

    let result = serve_http(&settings, HttpState::new(Arc::clone(&worker), origin)).await;

    if timeout(settings.server.graceful_shutdown, worker.settled())
        .await
        .is_err()
    {
        warn!(
            target = "offline_cache::serve",
            pending = worker.status().await.active_revalidations,
            "shutdown deadline passed with revalidations in flight"
        );
    }

    result
}

fn run_classify(settings: &config::Settings, args: &config::ClassifyArgs) -> Result<(), AppError> {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let store = CacheStore::new(&settings.cache, storage, Arc::clone(&settings.classifier));
    let classifier = store.classifier();

    for path in &args.paths {
        let classification = classifier.classification(path);
        let tier = classification
            .priority
            .map(|priority| priority.as_str())
            .unwrap_or("-");
        let protected = if classifier.protected().is_protected(path) {
            "protected"
        } else {
            "-"
        };
        println!(
            "{path}\t{}\t{tier}\t{}\t{protected}",
            classification.strategy,
            store.partition_for(path).as_str(),
        );
    }
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let addr = settings.server.addr;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| InfraError::Bind { addr, source })?;
    info!(target = "offline_cache::serve", addr = %addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "offline_cache::serve", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
