pub use crate::context::Context;
use crate::event::{Event, EventHandled};
use anyhow::Result;

mod debug;
mod events;
mod game_ids;
mod help;
mod ignore_bots;
mod likes;
mod profile;
mod ready;
mod redeem;
mod reload;

#[serenity::async_trait]
pub trait Plugin: Sync + Send {
    /// Plugin name.  Used for debug
    fn name(&self) -> &'static str;
    /// Help message lines.  None if no help message
    async fn usage(&self, ctx: &Context) -> Option<String>;
    /// Potentially handle event.  Returns:
    /// - Ok(EventHandled::Yes) if the event has been handled and no other plugin should attempt to
    ///   handle it
    /// - Ok(EventHandled::No) if another plugin should attempt to handle the event
    /// - Err if an error occurred
    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled>;
}

/// Ordered list of available plugins
pub fn plugins() -> Vec<Box<dyn Plugin>> {
    use crate::plugin::*;

    vec![
        // Core bot operations
        Box::new(debug::Debug),
        Box::new(ignore_bots::IgnoreBots),
        Box::new(ready::Ready),
        Box::new(help::Help),
        Box::new(reload::Reload),
        // Dating profiles
        Box::new(profile::ProfileCommands),
        Box::new(likes::LikeCommands),
        // Server utilities
        Box::new(events::EventCommands),
        Box::new(game_ids::GameIdCommands),
        Box::new(redeem::Redeem),
    ]
}

/// `usage()` line for one command
pub async fn usage_line(ctx: &Context<'_>, cmd: &str, description: &str) -> String {
    let prefix = &ctx.cfg.read().await.general.command_prefix;
    format!("{}{} - {}", prefix, cmd, description)
}
