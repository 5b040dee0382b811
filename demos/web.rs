use std::{sync::Arc, time::Duration};

use metric_store::{
    buf::{BufferMetricReader, CounterBuffers, GaugeBuffers},
    config::MetricsConfig,
    exporter::{decode_copy, spawn_scheduled, HttpExporter, MetricCopyExporter, MetricExporters},
    repository::{InMemoryMetricRepository, MetricReader, PrefixMetricReader},
    service::{BufferCounterService, BufferGaugeService, CounterService, GaugeService},
    Metric,
};
use poem::{
    get, handler,
    middleware::AddData,
    post,
    web::{Data, Json, Query},
    Body, EndpointExt, Route, Server,
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct AppState {
    repository: Arc<InMemoryMetricRepository>,
    counters: BufferCounterService,
    config: MetricsConfig,
}

#[derive(Deserialize)]
struct MetricsQuery {
    prefix: Option<String>,
}

#[handler]
fn metrics(query: Query<MetricsQuery>, state: Data<&Arc<AppState>>) -> poem::Result<Json<Vec<Metric>>> {
    let metrics = match &query.prefix {
        Some(prefix) => state.repository.find_all_with_prefix(prefix),
        None => state.repository.find_all(),
    };
    Ok(Json(metrics.map_err(poem::error::InternalServerError)?))
}

#[handler]
fn aggregate(state: Data<&Arc<AppState>>) -> poem::Result<Json<Vec<Metric>>> {
    let reader = state.config.aggregate.reader(Arc::clone(&state.repository));
    let found = reader.find_all().map_err(poem::error::InternalServerError)?;
    Ok(Json(found))
}

#[handler]
fn hit(state: Data<&Arc<AppState>>) -> &'static str {
    state.counters.increment("demo.hits");
    "ok"
}

#[handler]
async fn ingest(body: Body, state: Data<&Arc<AppState>>) -> poem::Result<String> {
    let bytes = body.into_bytes().await?;
    let read = decode_copy(&mut &bytes[..], state.repository.as_ref())
        .await
        .map_err(poem::error::BadRequest)?;
    Ok(format!("{read}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => MetricsConfig::from_path(path)?,
        None => MetricsConfig::default(),
    };

    let counter_buffers = Arc::new(CounterBuffers::new());
    let gauge_buffers = Arc::new(GaugeBuffers::new());
    let gauges = BufferGaugeService::new(Arc::clone(&gauge_buffers));
    std::thread::spawn(move || {
        let mut sys = sysinfo::System::new_all();
        loop {
            std::thread::sleep(Duration::from_secs(1));
            sys.refresh_cpu_usage();
            gauges.submit("cpu", f64::from(sys.global_cpu_usage()));
        }
    });

    let repository = Arc::new(config.repository.in_memory());
    let buffers = BufferMetricReader::new(Arc::clone(&counter_buffers), gauge_buffers);
    let mut exporters = MetricExporters::new();
    exporters.push(
        "repository",
        MetricCopyExporter::new(buffers.clone(), Arc::clone(&repository))
            .with_names(config.export.name_filter())
            .with_timestamps(config.export.timestamp_filter())
            .with_counter_deltas(config.export.send_counter_deltas),
    );
    if let Some(url) = &config.export.url {
        exporters.push(
            "http",
            HttpExporter::new(buffers, url.clone(), config.export.timeout)
                .with_names(config.export.name_filter()),
        );
    }
    let (stop_export, stopped) = tokio::sync::oneshot::channel();
    let export = config
        .export
        .enabled
        .then(|| spawn_scheduled(exporters, config.export.delay, stopped));

    let state = Arc::new(AppState {
        repository,
        counters: BufferCounterService::new(counter_buffers),
        config,
    });
    let app = Route::new()
        .at("/metrics", get(metrics))
        .at("/metrics/aggregate", get(aggregate))
        .at("/hit", get(hit))
        .at("/ingest", post(ingest))
        .with(AddData::new(state));

    let listener = poem::listener::TcpListener::bind("0.0.0.0:3000");
    info!("- metrics: <http://127.0.0.1:3000/metrics?prefix=gauge>");
    info!("- counter: <http://127.0.0.1:3000/hit>");
    Server::new(listener)
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await?;

    let _ = stop_export.send(());
    if let Some(export) = export {
        export.await?;
    }
    Ok(())
}
