use clap::Parser;
use client::input::{Autopilot, SteeringConfig};
use client::network::{Client, ClientConfig, SessionGoal};
use client::rendering::LogSink;
use log::info;
use shared::RoomRules;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3000")]
    server: String,

    /// Open a new room
    #[arg(short = 'c', long, conflicts_with_all = ["join", "list"])]
    create: bool,

    /// Join the room with this code
    #[arg(short = 'j', long)]
    join: Option<String>,

    /// List open rooms and exit
    #[arg(long, conflicts_with = "join")]
    list: bool,

    /// Room top speed in km/h when creating
    #[arg(long, default_value = "500")]
    max_speed: f64,

    /// Room acceleration in km/h per second when creating
    #[arg(long, default_value = "40")]
    accel: f64,

    /// Autopilot cruising speed in km/h
    #[arg(long, default_value = "250")]
    cruise: f64,

    /// Seconds to stay in the room, 0 runs until Ctrl-C
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Multiplier on steering input
    #[arg(long, default_value = "0.6")]
    steer_sensitivity: f32,

    /// Flip steering direction
    #[arg(long)]
    invert_steering: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    // Creating is the default when neither --join nor --list is given.
    let goal = match (&args.join, args.list && !args.create) {
        (Some(room_id), _) => SessionGoal::Join(room_id.clone()),
        (None, true) => SessionGoal::List,
        (None, false) => SessionGoal::Create(
            RoomRules {
                max_speed: args.max_speed,
                accel: args.accel,
            }
            .sanitized(),
        ),
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut config = ClientConfig::new(&args.server, goal);
    config.fake_ping_ms = args.fake_ping;
    config.duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    config.steering = SteeringConfig {
        sensitivity: args.steer_sensitivity,
        invert: args.invert_steering,
    };
    config.autopilot = Autopilot::new(args.cruise);

    let mut client = Client::new(config, Box::new(LogSink::default())).await?;
    client.run().await?;

    Ok(())
}
