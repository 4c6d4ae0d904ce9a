use clap::Parser;
use datasource::{AppSettings, Application, CancellationToken, DataSourceConfig, logging};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exercise application data sources against simulated loaders", long_about = None)]
struct Args {
    /// Simulated loader latency in milliseconds
    #[arg(long, default_value_t = 250)]
    latency_ms: u64,

    /// Make the server group loader fail
    #[arg(long)]
    fail: bool,

    /// Register the load balancer source as lazy and activate it after the first refresh
    #[arg(long)]
    lazy: bool,

    /// Keep refreshing every N seconds until interrupted
    #[arg(long)]
    auto_refresh_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = logging::DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerGroup {
    name: String,
    account: String,
    region: String,
    cloud_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_tags: Option<Value>,
}

async fn load_server_groups(latency: Duration, fail: bool) -> anyhow::Result<Value> {
    tokio::time::sleep(latency).await;
    if fail {
        anyhow::bail!("server group backend unavailable");
    }
    Ok(json!([
        { "name": "web-v001", "account": "prod", "region": "us-east-1", "cloudProvider": "aws" },
        {
            "name": "web-v002",
            "account": "prod",
            "region": "us-east-1",
            "cloudProvider": "aws",
            "entityTags": { "id": "web-v002", "alerts": [{ "message": "instance count below minimum" }] }
        },
        { "name": "batch-v010", "account": "batch", "region": "us-central1", "cloudProvider": "gcp" },
    ]))
}

async fn load_balancers(app: Application, latency: Duration) -> anyhow::Result<Value> {
    tokio::time::sleep(latency / 2).await;
    let groups = app.data_source::<Vec<ServerGroup>>("serverGroups")?.data();
    let names: Vec<String> = groups.iter().map(|group| format!("{}-lb", group.name)).collect();
    Ok(json!(names))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let latency = Duration::from_millis(args.latency_ms);
    let fail = args.fail;

    let mut settings = AppSettings::default().with_fetch_timeout(latency * 10 + Duration::from_secs(1));
    if let Some(secs) = args.auto_refresh_secs {
        settings = settings.with_auto_refresh_interval(Duration::from_secs(secs));
    }

    let mut builder = Application::builder_with_settings("demo", settings);
    let server_groups = builder.data_source(
        DataSourceConfig::<Vec<ServerGroup>>::builder("serverGroups")
            .default_data(Vec::new())
            .loader_fn(move |_app| load_server_groups(latency, fail))
            .sref(".serverGroups")
            .credentials_field("account")
            .region_field("region")
            .provider_field("cloudProvider")
            .build()?,
    )?;
    let balancers = builder.data_source(
        DataSourceConfig::<Vec<String>>::builder("loadBalancers")
            .default_data(Vec::new())
            .loader_fn(move |app| load_balancers(app, latency))
            .lazy(args.lazy)
            .build()?,
    )?;
    let app = builder.build();

    let owner = CancellationToken::new();
    server_groups.on_refresh(
        Some(&owner),
        |groups| info!(count = groups.len(), "server groups refreshed"),
        Some(Box::new(|error| warn!(%error, "server groups failed to load"))),
    );

    let mut statuses = server_groups.status_stream();
    tokio::spawn(async move {
        while let Some(snapshot) = statuses.next().await {
            info!(status = %snapshot.status, loaded = snapshot.loaded, "serverGroups status");
        }
    });

    app.refresh(false).await;
    if balancers.lazy() {
        info!(status = %balancers.status(), "lazy source before activation");
        balancers.activate();
    }

    match app.ready().await {
        Ok(()) => info!("application ready"),
        Err(error) => warn!(%error, "application failed to become ready"),
    }
    if let Err(error) = balancers.ready().await {
        warn!(%error, "load balancers failed to load");
    }

    for source in app.data_sources() {
        info!(
            key = source.key(),
            label = %source.metadata().label,
            status = %source.status(),
            loaded = source.is_loaded(),
            alerts = source.alerts().len(),
            "data source"
        );
    }
    info!(credentials = ?app.default_credentials(), regions = ?app.default_regions(), "defaults");

    if args.auto_refresh_secs.is_some() {
        app.enable_auto_refresh_default();
        tokio::signal::ctrl_c().await?;
        app.disable_auto_refresh();
    }

    owner.cancel();
    app.destroy();
    Ok(())
}
