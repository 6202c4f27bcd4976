use clap::Parser;
use log::{error, info};
use server::acceptor::Acceptor;
use server::config::{Args, ServerConfig};
use server::directory::GamesDirectory;
use server::game::run_game_loop;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Parses the command line, then runs the acceptor until it fails or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    info!("Starting lobby server with {:?}", config);

    // Each new game gets its own simulation task
    let runtime = Handle::current();
    let settings = config.loop_settings();
    let directory = Arc::new(GamesDirectory::with_launcher(
        config.game_defaults(),
        move |game| {
            info!("Launching simulation for game {}", game.name());
            runtime.spawn(run_game_loop(game, settings));
        },
    ));

    let acceptor = Acceptor::bind(config.address(), directory)?;
    let stop = acceptor.stop_handle()?;
    let mut acceptor_handle = tokio::task::spawn_blocking(move || acceptor.run());

    tokio::select! {
        result = &mut acceptor_handle => {
            match result {
                Ok(Ok(())) => info!("Acceptor finished"),
                Ok(Err(e)) => error!("Acceptor failed: {}", e),
                Err(e) => error!("Acceptor task panicked: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    tokio::task::spawn_blocking(move || stop.stop()).await?;
    match acceptor_handle.await {
        Ok(Ok(())) => info!("All connections closed"),
        Ok(Err(e)) => error!("Acceptor failed during shutdown: {}", e),
        Err(e) => error!("Acceptor task panicked: {}", e),
    }

    Ok(())
}
