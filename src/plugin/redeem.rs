use crate::{
    event::*,
    giftcode::{is_valid_code, GiftCodeClient, GiftCodeError},
    log_error, log_internal,
    plugin::*,
};
use anyhow::Result;

/// Discord's message length limit
const MAX_MESSAGE: usize = 2000;

/// Redeem a gift code for every mapped game account
pub struct Redeem;

#[serenity::async_trait]
impl Plugin for Redeem {
    fn name(&self) -> &'static str {
        "redeem"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(
            usage_line(
                ctx,
                "redeem <code>",
                "redeem a gift code for every mapped game id",
            )
            .await,
        )
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Some((msg, args)) = event.is_bot_cmd(ctx, self.name()).await else {
            return Ok(EventHandled::No);
        };
        let Some(code) = args.first() else {
            msg.reply(ctx.cache_http, "Usage: `redeem <code>`").await?;
            return Ok(EventHandled::Yes);
        };
        if !is_valid_code(code) {
            msg.reply(
                ctx.cache_http,
                format!("`{}` is not a valid gift code. Codes are letters and digits only.", code),
            )
            .await?;
            return Ok(EventHandled::Yes);
        }

        let client = GiftCodeClient::new(&ctx.cfg.read().await.gift_code);
        let client = match client {
            Ok(client) => client,
            Err(GiftCodeError::MissingSecret) => {
                msg.reply(ctx.cache_http, "Gift code redemption is not configured.")
                    .await?;
                return Ok(EventHandled::Yes);
            }
            Err(e) => return Err(e.into()),
        };

        let players = ctx.pstate.read().await.game_ids.list();
        if players.is_empty() {
            msg.reply(
                ctx.cache_http,
                "No game ids are mapped yet. An administrator can add them with `map-game-id`.",
            )
            .await?;
            return Ok(EventHandled::Yes);
        }

        log_internal!(
            "{} is redeeming {} for {} player(s)",
            msg.author.name,
            code,
            players.len()
        );
        let typing = msg.channel_id.start_typing(ctx.http);
        let report = client.redeem(code, &players).await;
        typing.stop();

        let mut messages = report.render(MAX_MESSAGE).into_iter();
        if let Some(first) = messages.next() {
            msg.reply(ctx.cache_http, first).await?;
        }
        for rest in messages {
            if let Err(e) = msg.channel_id.say(ctx.cache_http, rest).await {
                log_error!("Could not post the rest of a gift code report: {}", e);
            }
        }
        Ok(EventHandled::Yes)
    }
}
