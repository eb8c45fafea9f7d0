use crate::helper::MessageHelper;
use crate::{config::Config, event::*, log_error, log_internal, plugin::*, volatile_state};
use anyhow::Result;

pub struct Reload;

#[serenity::async_trait]
impl Plugin for Reload {
    fn name(&self) -> &'static str {
        "reload"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(usage_line(ctx, self.name(), "reload config (bot owner only)").await)
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Some((msg, _)) = event.is_bot_cmd(ctx, self.name()).await else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_owner(ctx).await {
            msg.reply(ctx.cache_http, "Only bot owners can reload the configuration.")
                .await?;
            return Ok(EventHandled::Yes);
        }

        // Nothing is swapped in unless both the file and the profile generator are good.
        let reloaded: Result<()> = match Config::load().await {
            Ok(new) => volatile_state::apply_config(ctx.cfg, ctx.vstate, new)
                .await
                .map_err(Into::into),
            Err(e) => Err(e),
        };
        let reply = match reloaded {
            Ok(()) => {
                log_internal!("Configuration reloaded by {}", msg.author.name);
                "Configuration reloaded successfully".to_owned()
            }
            Err(e) => {
                log_error!("Could not reload configuration: {}", e);
                format!("Could not reload the configuration, keeping the old one: {}", e)
            }
        };
        msg.reply(ctx.cache_http, reply).await?;
        Ok(EventHandled::Yes)
    }
}
