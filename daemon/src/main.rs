//! Entry point: loads configuration, bootstraps the process-wide [`App`],
//! and serves the RPC surface until the process is signalled to stop.
//!
//! Grounded on `src/bin/minidspd/main.rs`'s `Opts`/`main` shape, adapted from
//! a `lazy_static` singleton plus an endless sleep loop to an explicit async
//! bootstrap plus a signal-aware wait.

mod app;
mod collaborators;
mod config;
mod http;
mod properties;
mod zigbee_driver;

use clap::Parser;
use config::Config;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Gateway device management daemon")]
struct Opts {
    /// Path to a configuration file. Defaults to confy's platform-standard
    /// location for this application.
    #[clap(long, env = "GATEWAYD_CONFIG")]
    config_path: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let config: Config = match &opts.config_path {
        Some(path) => confy::load_path(path)?,
        None => confy::load("gatewayd", None)?,
    };

    let app = app::App::bootstrap(config.clone()).await?;
    app.read().await.apply_descriptor_sources().await;
    app::App::spawn_descriptor_sync(&app);

    log::info!("gatewayd starting up");

    let http_server = http::main(config.http_server, config.unix_socket_path);
    tokio::pin!(http_server);

    tokio::select! {
        result = &mut http_server => {
            if let Err(e) = result {
                log::error!("http surface exited with error: {e:?}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, stopping");
        }
    }

    Ok(())
}
