use clap::Parser;
use server_liveness::{
    api::ApiConfig,
    config::{Config, read_config_file},
    pipeline::Pipeline,
    util::{get_api_addr, get_config_path},
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); built-in defaults are used when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("server_liveness", LevelFilter::DEBUG),
        ("liveness_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match get_config_path().or(args.file) {
        Some(path) => read_config_file(&path)?,
        None => {
            warn!("no config file given, running with defaults and no servers");
            Config::default()
        }
    };

    let mut api_config = ApiConfig::from_settings(&config.api);
    if let Some(bind_addr) = get_api_addr() {
        api_config = Some(ApiConfig {
            bind_addr,
            enable_cors: config.api.enable_cors,
        });
    }

    let pipeline = Pipeline::build(config).await?;
    pipeline.start().await?;

    #[cfg(feature = "api")]
    if let Some(api_config) = api_config {
        use server_liveness::api::{ApiState, spawn_api_server};

        let state = ApiState::from_pipeline(&pipeline);
        spawn_api_server(api_config, state, pipeline.shutdown_token()).await?;
    }
    #[cfg(not(feature = "api"))]
    if api_config.is_some() {
        warn!("API bind address configured but the api feature is disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c");

    pipeline.shutdown().await
}
