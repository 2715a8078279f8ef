use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use reports_core::{
    config::Config,
    host::InMemoryAccounts,
    http::{router, AppState},
    service::{DataPaths, ReportService},
    settings::ReportSettings,
    store::ReportStore,
};
use tracing::info;

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "reports_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// Directory holding Reports.json, ReportSettings.txt and the database.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// SQLite database file name inside the data directory.
    #[arg(long, default_value = "Reports.sqlite")]
    db_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reports_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating {}", args.data_dir.display()))?;

    let paths = DataPaths::in_dir(&args.data_dir);
    let config = Config::load_or_create(&paths.config)?;
    let settings = ReportSettings::load_or_create(&paths.settings)?;

    let db_path = args.data_dir.join(&args.db_name);
    let store = ReportStore::open(
        &db_path,
        Duration::from_millis(settings.query_timeout_ms),
    )
    .with_context(|| format!("opening {}", db_path.display()))?;

    let accounts = Arc::new(InMemoryAccounts::new());
    let service = ReportService::new(store, accounts.clone(), config, settings, paths);
    let app = router(AppState { service, accounts });

    let addr = parse_listen(&args.listen)?;
    info!("Reports core listening on http://{addr}");
    info!("DB: {}", db_path.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        if host == "localhost" {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                    input,
                    DEFAULT_PORT
                )
            })?;
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
        }
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_accepts_common_forms() {
        assert_eq!(
            parse_listen("0.0.0.0:9000").unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("127.0.0.1").unwrap().port(), DEFAULT_PORT);
        assert_eq!(parse_listen("localhost:81").unwrap().port(), 81);
        assert_eq!(parse_listen("localhost").unwrap().port(), DEFAULT_PORT);
        assert!(parse_listen("localhost:http").is_err());
        assert!(parse_listen("example.com:80").is_err());
    }
}
