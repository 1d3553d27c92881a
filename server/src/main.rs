use clap::Parser;
use log::info;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the UDP socket to
    #[arg(short = 'b', long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Simulation ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Maximum concurrently connected clients
    #[arg(short = 'm', long, default_value = "64")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    client_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_rate = args.tick_rate.clamp(1, 240);

    info!("Starting server at {} Hz", tick_rate);

    let mut server = Server::with_client_timeout(
        &args.bind,
        Duration::from_secs_f64(1.0 / tick_rate as f64),
        args.max_clients,
        Duration::from_secs(args.client_timeout),
    )
    .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
