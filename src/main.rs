use anyhow::Result;
use chrono::{Local, Timelike};
use covid_snapshot::{
    cache::store::FileStore,
    fetch::{sources::SourceUrls, HttpFetcher},
    loader::DatasetLoader,
    Config, Orchestrator, SnapshotData,
};
use std::{env, future::Future, path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use warp::{reject::Rejection, reply::Reply, Filter};

async fn covid_data(orch: Arc<Orchestrator>) -> Result<impl Reply, Rejection> {
    let reply = match orch.get().await {
        Some(snapshot) => warp::reply::json(&snapshot.data),
        None => warp::reply::json(&SnapshotData::default()),
    };
    Ok(reply)
}

async fn health_check(orch: Arc<Orchestrator>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "cache": format!("{:?}", orch.state()),
    })))
}

/// Refresh once a day at `refresh_hour` local time, checked hourly.
fn spawn_daily_refresh(orch: Arc<Orchestrator>, refresh_hour: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            if Local::now().hour() == refresh_hour {
                info!("daily refresh");
                orch.refresh().await;
            }
        }
    });
}

/// Resolves when `signal` fires. A listener that cannot be installed never
/// resolves, so it cannot trigger shutdown.
async fn wait_for<F>(signal: F, name: &str)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "cannot listen for {}", name);
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = wait_for(tokio::signal::ctrl_c(), "ctrl-c");

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, closing server");
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) config ───────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // ─── 2) init logging ─────────────────────────────────────────────
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(config.log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();
    info!(app = %config.app_name, port = config.port, "startup");
    for county in config.counties_without_fips() {
        warn!(state = %county.state, county = %county.county, "no fips code, vaccination data will be missing");
    }

    // ─── 3) orchestrator ─────────────────────────────────────────────
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let urls = SourceUrls::from_config(&config.sources)?;
    let loader = DatasetLoader::new(fetcher, urls, config.entities.clone());
    let store = Arc::new(FileStore::new(config.cache_path.clone()));
    let orch = Orchestrator::new(loader, store, config.max_age());

    // warm the cache without holding up the listener
    {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move {
            orch.get().await;
        });
    }
    spawn_daily_refresh(Arc::clone(&orch), config.refresh_hour);

    // ─── 4) routes ───────────────────────────────────────────────────
    let with_orch = {
        let orch = Arc::clone(&orch);
        warp::any().map(move || Arc::clone(&orch))
    };
    let health = warp::path("health")
        .and(warp::get())
        .and(with_orch.clone())
        .and_then(health_check);
    let data = warp::path::end()
        .and(warp::get())
        .and(with_orch)
        .and_then(covid_data);

    let routes = health
        .or(data)
        .with(warp::cors().allow_any_origin().allow_methods(vec!["GET"]))
        .with(warp::compression::gzip())
        .with(warp::trace::request());

    // ─── 5) serve ────────────────────────────────────────────────────
    let (addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], config.port), shutdown_signal());
    info!("{} listening on {}", config.app_name, addr);
    server.await;

    info!("server closed");
    Ok(())
}
