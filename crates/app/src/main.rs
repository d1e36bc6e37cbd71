//! huddle - leaderless quorum coordination for multiplayer rooms
//!
//! Runs a hub, manages rooms on it, or joins a room as a client.

use std::path::Path;

use clap::Parser;
use huddle_core::Config;
use huddle_net::HubClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod commands;

use cli::{Cli, Command};

fn load_config(path: Option<&Path>) -> huddle_core::Result<Config> {
    if let Some(path) = path {
        return Config::load(path);
    }
    match Config::default_path() {
        Some(path) if path.exists() => Config::load(path),
        _ => Ok(Config::default()),
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli, mut config: Config) -> huddle_core::Result<()> {
    match cli.command {
        Command::Hub { bind, database } => {
            if let Some(bind) = bind {
                config.hub.bind = bind;
            }
            if database.is_some() {
                config.hub.database = database;
            }
            commands::hub(&config.hub, ctrl_c()).await
        }
        Command::Create {
            room,
            players,
            title,
            subtitle,
            rules,
            hub,
        } => {
            let client = HubClient::connect(hub.resolve(config.hub.bind)).await?;
            let room = commands::build_room(&room, players, title, subtitle, rules);
            let room = commands::create(&client, room).await?;
            print!("{}", commands::format_room(&room));
            Ok(())
        }
        Command::Reset { room, hub } => {
            let client = HubClient::connect(hub.resolve(config.hub.bind)).await?;
            let outcome = commands::reset(&client, &room).await?;
            println!("{}: {:?}", room, outcome);
            Ok(())
        }
        Command::Show { room, hub } => {
            let client = HubClient::connect(hub.resolve(config.hub.bind)).await?;
            match commands::show(&client, &room).await? {
                Some(record) => print!("{}", commands::format_room(&record)),
                None => println!("room '{}' not found", room),
            }
            Ok(())
        }
        Command::List { hub } => {
            let client = HubClient::connect(hub.resolve(config.hub.bind)).await?;
            for room in commands::list(&client).await? {
                println!(
                    "{}\t{}\t{} players\t{}",
                    room.id, room.status, room.required_players, room.content.title
                );
            }
            Ok(())
        }
        Command::Join { room, id, hub } => {
            let client = HubClient::connect(hub.resolve(config.hub.bind)).await?;
            commands::join(client, &config.session, &room, id, ctrl_c()).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over the configured filter
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!(?config, "Loaded configuration");

    if let Err(e) = run(cli, config).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
