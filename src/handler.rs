use crate::{
    config::Config, context::Context, event::Event, persistent_state::PersistentState,
    scheduler::Scheduler, volatile_state::VolatileState,
};
use serenity::all::{Message, Ready};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Discord event handler
///
/// Persistent state and the scheduler are shared with `main` so they can be flushed on shutdown.
pub struct Handler {
    cfg: RwLock<Config>,
    pstate: Arc<RwLock<PersistentState>>,
    vstate: RwLock<VolatileState>,
    scheduler: Arc<RwLock<Scheduler>>,
}

impl<'a> Handler {
    pub fn new(
        cfg: Config,
        pstate: Arc<RwLock<PersistentState>>,
        vstate: VolatileState,
        scheduler: Arc<RwLock<Scheduler>>,
    ) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            pstate,
            vstate: RwLock::new(vstate),
            scheduler,
        }
    }

    fn ctx(&'a self, discord_ctx: &'a serenity::all::Context) -> Context<'a> {
        Context {
            cfg: &self.cfg,
            pstate: &self.pstate,
            vstate: &self.vstate,
            scheduler: &self.scheduler,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready).handle(self.ctx(&discord_ctx)).await;
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        Event::Message(msg).handle(self.ctx(&discord_ctx)).await;
    }
}
