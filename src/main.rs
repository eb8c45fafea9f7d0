mod config;
mod context;
mod event;
mod game_ids;
mod giftcode;
mod handler;
mod helper;
mod likes;
mod liveness;
mod llm;
mod logging;
mod persistent_state;
mod plugin;
mod profile;
mod schedule;
mod scheduler;
mod store;
mod volatile_state;

use serenity::{all::GatewayIntents, Client};
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = crate::config::Config::load().await?;
    let token = cfg.general.discord_token.clone();

    let pstate = crate::persistent_state::PersistentState::load(&cfg).await?;
    let pstate = Arc::new(RwLock::new(pstate));
    let vstate = crate::volatile_state::VolatileState::new(&cfg)?;

    let events = store::Store::open(cfg.data_dir()?.join(store::EVENTS_FILE)).await?;
    let scheduler = Arc::new(RwLock::new(scheduler::Scheduler::new(events)));

    if cfg.liveness.enabled {
        liveness::spawn(cfg.liveness.bind).await?;
    }

    let handler = handler::Handler::new(cfg, pstate.clone(), vstate, scheduler.clone());

    // Things we want discord to tell us about.
    let intents = GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log_internal!("Shutting down...");
            shard_manager.shutdown_all().await;
        }
    });

    let result = client.start().await;

    // Mutations are saved as they happen.  One last best-effort save on the way out.
    pstate.read().await.flush().await;
    if let Err(e) = scheduler.read().await.flush().await {
        log_error!("Could not flush scheduled events: {}", e);
    }
    log_internal!("Shutting down... done");

    result.map_err(Into::into)
}
