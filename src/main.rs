use clap::Parser;
use log::{error, info};

use tk_tracker::Server;
use tk_tracker::config::Args;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let sink = match args.open_sink() {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Failed to open location sink: {e}");
            std::process::exit(1);
        }
    };

    let server = match Server::bind(config, sink).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl-C"),
                Err(e) => {
                    // Without a signal handler, run until killed.
                    error!("cannot listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;
}
