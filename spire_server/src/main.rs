mod config;
mod game;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use spire_ecs::World;
use spire_net::{resolve, Host};
use tokio::runtime::Builder;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::game::Game;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to bind, overriding the config file.
    #[arg(long)]
    port: Option<u16>,
    /// Peer address to connect to on startup.
    #[arg(long)]
    connect: Option<String>,
    #[arg(long, default_value = "./config.toml")]
    config: String,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("cannot load {}: {}, using defaults", args.config, err);
            Config::default()
        }
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(connect) = args.connect {
        config.connect = Some(connect);
    }

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    rt.block_on(run(config));
}

async fn run(config: Config) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let mut host = match Host::bind(addr) {
        Ok(host) => host,
        Err(err) => {
            tracing::error!("failed to bind {}: {}", addr, err);
            return;
        }
    };

    let mut world = World::new();
    let mut game = Game::new(&mut world, &mut host);
    game.spawn_local(&mut world, &mut host);

    if let Some(target) = &config.connect {
        match resolve(target) {
            Ok(peer) => {
                tracing::info!("connecting to {}", peer);
                host.connect(peer);
            }
            Err(err) => tracing::error!("cannot resolve {}: {}", target, err),
        }
    }

    let timestep = Duration::from_millis(config.timestep);
    let mut interval = tokio::time::interval(timestep);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut entities = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        game.tick(&mut world, timestep.as_secs_f32());
        host.update(&mut world).await;

        let count = game.entity_count(&world);
        if count != entities {
            tracing::info!("tracking {} entities", count);
            entities = count;
        }
    }

    tracing::info!("shutting down");
    host.shutdown().await;
}
