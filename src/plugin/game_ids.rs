use crate::{
    event::*,
    game_ids::is_valid_player_id,
    helper::{clip, MessageHelper},
    log_error,
    plugin::*,
};
use anyhow::Result;
use serenity::all::Message;

const MAP_GAME_ID: &str = "map-game-id";
const UNMAP_GAME_ID: &str = "unmap-game-id";
const LIST_GAME_IDS: &str = "list-game-ids";

/// Admin upkeep of which game account belongs to which member
pub struct GameIdCommands;

#[serenity::async_trait]
impl Plugin for GameIdCommands {
    fn name(&self) -> &'static str {
        "game_ids"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(
            [
                usage_line(ctx, "map-game-id @member <player id>", "link a game account (admins)")
                    .await,
                usage_line(ctx, "unmap-game-id @member", "unlink a game account (admins)").await,
                usage_line(ctx, LIST_GAME_IDS, "show linked game accounts (admins)").await,
            ]
            .join("\n"),
        )
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let (msg, args, cmd) = if let Some((msg, args)) = event.is_bot_cmd(ctx, MAP_GAME_ID).await {
            (msg, args, MAP_GAME_ID)
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, UNMAP_GAME_ID).await {
            (msg, args, UNMAP_GAME_ID)
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, LIST_GAME_IDS).await {
            (msg, args, LIST_GAME_IDS)
        } else {
            return Ok(EventHandled::No);
        };

        if !msg.is_privileged(ctx).await {
            msg.reply(ctx.cache_http, "Only administrators can manage game ids.")
                .await?;
            return Ok(EventHandled::Yes);
        }

        match cmd {
            MAP_GAME_ID => map(ctx, msg, &args).await?,
            UNMAP_GAME_ID => unmap(ctx, msg).await?,
            _ => list(ctx, msg).await?,
        }
        Ok(EventHandled::Yes)
    }
}

/// The first argument that isn't a mention
fn player_id_arg<'a>(args: &[&'a str]) -> Option<&'a str> {
    args.iter().copied().find(|arg| !arg.starts_with("<@"))
}

async fn map(ctx: &Context<'_>, msg: &Message, args: &[&str]) -> Result<()> {
    let (Some(member), Some(player_id)) = (msg.mentioned_user(), player_id_arg(args)) else {
        msg.reply(ctx.cache_http, "Usage: `map-game-id @member <player id>`")
            .await?;
        return Ok(());
    };
    if !is_valid_player_id(player_id) {
        msg.reply(
            ctx.cache_http,
            format!("`{}` is not a valid player id.", player_id),
        )
        .await?;
        return Ok(());
    }

    let mapped = ctx
        .pstate
        .write()
        .await
        .game_ids
        .map(member.id, player_id.to_owned())
        .await;
    let reply = match mapped {
        Ok(Some(previous)) => format!(
            "Mapped <@{}> to game id {} (was {}).",
            member.id, player_id, previous
        ),
        Ok(None) => format!("Mapped <@{}> to game id {}.", member.id, player_id),
        Err(e) => {
            log_error!("Could not map game id: {}", e);
            "Could not save the mapping. Please try again.".to_owned()
        }
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

async fn unmap(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let Some(member) = msg.mentioned_user() else {
        msg.reply(ctx.cache_http, "Usage: `unmap-game-id @member`")
            .await?;
        return Ok(());
    };

    let reply = match ctx.pstate.write().await.game_ids.unmap(member.id).await {
        Ok(Some(previous)) => format!("Unmapped <@{}> from game id {}.", member.id, previous),
        Ok(None) => format!("<@{}> has no game id mapped.", member.id),
        Err(e) => {
            log_error!("Could not unmap game id: {}", e);
            "Could not save the change. Please try again.".to_owned()
        }
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

async fn list(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let mappings = ctx.pstate.read().await.game_ids.list();
    let reply = if mappings.is_empty() {
        "No game ids are mapped yet.".to_owned()
    } else {
        let lines: Vec<String> = mappings
            .iter()
            .map(|(member, player_id)| format!("<@{}> \u{2192} {}", member, player_id))
            .collect();
        format!("**Game id map**\n{}", lines.join("\n"))
    };
    msg.reply(ctx.cache_http, clip(&reply, 2000)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_skips_mentions() {
        assert_eq!(player_id_arg(&["<@123>", "456"]), Some("456"));
        assert_eq!(player_id_arg(&["456", "<@!123>"]), Some("456"));
        assert_eq!(player_id_arg(&["<@123>"]), None);
    }
}
