use anyhow::Result;
use clap::Parser;
use collabd::{config::ServerConfig, realtime, rest, storage::Storage, AppContext};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "collabd",
    about = "collabd — collaborative workspace daemon",
    version
)]
struct Args {
    /// Realtime WebSocket server port
    #[arg(long, env = "COLLABD_PORT")]
    port: Option<u16>,

    /// REST API server port
    #[arg(long, env = "COLLABD_REST_PORT")]
    rest_port: Option<u16>,

    /// Data directory for uploads, config, and the SQLite database
    #[arg(long, env = "COLLABD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COLLABD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "COLLABD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    let log_format =
        std::env::var("COLLABD_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    let config = Arc::new(ServerConfig::new(
        args.port,
        args.rest_port,
        args.data_dir,
        args.log,
    ));
    info!(
        data_dir = %config.data_dir.display(),
        ws_port = config.port,
        rest_port = config.rest_port,
        "starting collabd v{}",
        env!("CARGO_PKG_VERSION")
    );

    let storage = Arc::new(
        Storage::new_with_slow_query(&config.data_dir, config.slow_query_ms).await?,
    );
    let ctx = Arc::new(AppContext::new(config.clone(), storage));

    let ws_addr = format!("{}:{}", config.bind_address, config.port);
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
    let rest_addr = format!("{}:{}", config.bind_address, config.rest_port);
    let rest_listener = tokio::net::TcpListener::bind(&rest_addr).await?;

    let realtime_task = tokio::spawn(realtime::run(ctx.clone(), ws_listener));
    let rest_task = tokio::spawn(rest::start_rest_server(ctx.clone(), rest_listener));

    tokio::select! {
        result = realtime_task => {
            warn!("realtime server exited");
            result??;
        }
        result = rest_task => {
            warn!("REST server exited");
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default) or `"json"` (structured JSON for
/// log aggregators).
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("collabd.log"));

        // tracing-appender needs the directory to exist before it opens the file.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
