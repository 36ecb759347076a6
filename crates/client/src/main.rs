mod headless;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use headless::HeadlessGame;
use spadenet::demo::format_duration;
use spadenet::{
    ConnectionStatus, DemoPlayer, NetClient, NetError, ServerAddress, SessionConfig, list_demos,
};

const FRAME: Duration = Duration::from_millis(16);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "spadenet-client")]
#[command(about = "Headless Ace of Spades 0.75/0.76 client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Joins a server and logs what happens until it disconnects
    Connect {
        #[arg(help = "Server address (aos://<ip as integer>:<port>:<version> or host:port)")]
        address: ServerAddress,

        #[arg(long, help = "Record the session as a demo")]
        record: bool,

        #[arg(long, default_value = "demos")]
        demo_dir: PathBuf,

        #[arg(long, help = "Disconnect after this many seconds")]
        seconds: Option<u64>,

        #[arg(long, help = "Force ASCII chat encoding")]
        no_unicode: bool,
    },
    /// Plays back a recorded demo
    Replay {
        path: PathBuf,

        #[arg(long, default_value_t = 1.0, help = "Playback speed (0.1-10)")]
        speed: f32,

        #[arg(long, default_value = "Deuce", help = "Spectator name")]
        name: String,
    },
    /// Lists the demos in a directory
    List {
        #[arg(default_value = "demos")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Connect {
            address,
            record,
            demo_dir,
            seconds,
            no_unicode,
        } => {
            let config = SessionConfig {
                record_demos: record,
                demo_dir,
                unicode: !no_unicode,
                poll_timeout: Duration::from_millis(1),
                ..Default::default()
            };
            let mut client = NetClient::new(config, HeadlessGame::default());
            client.connect(&address, 0.0)?;
            run(&mut client, seconds.map(Duration::from_secs))
        }
        Command::Replay { path, speed, name } => {
            let mut player = DemoPlayer::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            player.set_speed(speed, 0.0)?;
            log::info!("Demo length {}", format_duration(player.duration()));

            let config = SessionConfig {
                player_name: name,
                ..Default::default()
            };
            let mut client = NetClient::new(config, HeadlessGame::default());
            client.replay_from(player, 0.0);
            run(&mut client, None)
        }
        Command::List { dir } => {
            let demos =
                list_demos(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
            if demos.is_empty() {
                println!("No demos in {}", dir.display());
            }
            for demo in demos {
                println!(
                    "{}  {}  {}",
                    demo.file_name(),
                    demo.protocol,
                    format_duration(demo.duration)
                );
            }
            Ok(())
        }
    }
}

/// Drives the session at roughly 60 Hz until it ends.
fn run(client: &mut NetClient<HeadlessGame>, limit: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    let mut last_status = ConnectionStatus::NotConnected;
    let mut last_stats = started;

    loop {
        let elapsed = started.elapsed();
        if limit.is_some_and(|limit| elapsed >= limit) {
            log::info!("Time limit reached");
            client.disconnect();
            break;
        }

        let result = client.poll(elapsed.as_secs_f64());

        if client.status() != last_status {
            last_status = client.status();
            log::info!("{}", client.status_text());
        }

        match result {
            Ok(()) => {}
            Err(NetError::DemoEnded) => break,
            Err(e @ NetError::TransportDisconnected { .. }) => {
                log::warn!("{}", e);
                break;
            }
            Err(e) => {
                client.disconnect();
                return Err(e.into());
            }
        }

        if !client.is_replaying() && last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            if let Some(progress) = client.map_progress() {
                log::info!(
                    "Map {:.0}%: {}",
                    progress * 100.0,
                    client.status_text()
                );
            }
            let stats = client.stats();
            log::info!(
                "ping {} ms, up {:.1} KB/s, down {:.1} KB/s",
                stats
                    .rtt_ms
                    .map(|rtt| rtt.to_string())
                    .unwrap_or_else(|| "-".into()),
                stats.up_bytes_per_sec / 1024.0,
                stats.down_bytes_per_sec / 1024.0
            );
        }

        thread::sleep(FRAME);
    }

    log::info!(
        "Session over after {} world updates",
        client.game().world_updates()
    );
    Ok(())
}
