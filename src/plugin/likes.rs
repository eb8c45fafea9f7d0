use crate::{
    event::*,
    helper::{clip, MessageHelper, UserHelper},
    likes::{LikeOutcome, UnlikeOutcome},
    log_error,
    logging::AsyncPrintColor,
    plugin::*,
};
use anyhow::Result;
use serenity::all::{Colour, CreateEmbed, CreateMessage, Message, UserId};
use std::collections::BTreeSet;

const LIKE: &str = "like";
const UNLIKE: &str = "unlike";
const LIKES: &str = "likes";
const MY_MATCHES: &str = "my-matches";
const TOP_LIKES: &str = "top-likes";

const DEFAULT_TOP: usize = 5;
const MAX_DESCRIPTION: usize = 4096;

/// Liking profiles and discovering matches
pub struct LikeCommands;

#[serenity::async_trait]
impl Plugin for LikeCommands {
    fn name(&self) -> &'static str {
        "likes"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(
            [
                usage_line(ctx, "like @member", "like a member's profile").await,
                usage_line(ctx, "unlike @member", "take a like back").await,
                usage_line(ctx, LIKES, "see who liked your profile").await,
                usage_line(ctx, MY_MATCHES, "see your mutual matches").await,
                usage_line(ctx, "top-likes [n]", "most liked profiles").await,
            ]
            .join("\n"),
        )
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        if let Some((msg, _)) = event.is_bot_cmd(ctx, LIKE).await {
            like(ctx, msg).await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, UNLIKE).await {
            unlike(ctx, msg).await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, LIKES).await {
            let likers = ctx.pstate.read().await.likes.table().likes_of(msg.author.id);
            let title = format!(
                "\u{2764}\u{FE0F} Likes for {}",
                msg.author.nick_in_guild(ctx, msg.guild_id).await
            );
            member_list(ctx, msg, title, &likers, "No one has liked your profile yet.").await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, MY_MATCHES).await {
            let matches = ctx
                .pstate
                .read()
                .await
                .likes
                .table()
                .matches_of(msg.author.id);
            let title = "\u{1F49E} Your Matches".to_owned();
            member_list(ctx, msg, title, &matches, "You have no matches yet.").await?;
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, TOP_LIKES).await {
            top_likes(ctx, msg, args.first().copied()).await?;
        } else {
            return Ok(EventHandled::No);
        }
        Ok(EventHandled::Yes)
    }
}

/// DM a member.  Members may have DMs closed; that's logged and otherwise ignored.
async fn notify(ctx: &Context<'_>, member: UserId, text: String) {
    let message = CreateMessage::new().content(text);
    if let Err(e) = member.direct_message(ctx.cache_http, message).await {
        log_error!(
            "Could not DM {}: {}",
            member.color(ctx.http).await,
            e
        );
    }
}

async fn like(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let Some(target) = msg.mentioned_user() else {
        msg.reply(ctx.cache_http, "Mention the member you want to like.")
            .await?;
        return Ok(());
    };
    if target.bot {
        msg.reply(ctx.cache_http, "You cannot like bots.").await?;
        return Ok(());
    }

    let outcome = ctx
        .pstate
        .write()
        .await
        .likes
        .like(msg.author.id, target.id)
        .await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            log_error!("Could not record like: {}", e);
            msg.reply(ctx.cache_http, "Could not save your like. Please try again.")
                .await?;
            return Ok(());
        }
    };

    let liker_name = msg.author.nick_in_guild(ctx, msg.guild_id).await;
    let likee_name = target.nick_in_guild(ctx, msg.guild_id).await;
    match outcome {
        LikeOutcome::SelfLike => {
            msg.reply(ctx.cache_http, "You cannot like yourself.").await?;
        }
        LikeOutcome::AlreadyLiked => {
            msg.reply(
                ctx.cache_http,
                format!("You have already liked {}'s profile.", likee_name),
            )
            .await?;
        }
        LikeOutcome::Liked { matched } => {
            msg.reply(
                ctx.cache_http,
                format!("{} liked {}'s profile! \u{2764}\u{FE0F}", liker_name, likee_name),
            )
            .await?;

            if matched {
                notify(
                    ctx,
                    target.id,
                    format!(
                        "\u{1F389} You have a new match! {} liked your profile and you liked theirs.",
                        liker_name
                    ),
                )
                .await;
                notify(
                    ctx,
                    msg.author.id,
                    format!(
                        "\u{1F389} You have a new match! {} liked your profile and you liked theirs.",
                        likee_name
                    ),
                )
                .await;
            }
        }
    }
    Ok(())
}

async fn unlike(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let Some(target) = msg.mentioned_user() else {
        msg.reply(ctx.cache_http, "Mention the member you want to unlike.")
            .await?;
        return Ok(());
    };
    if target.bot {
        msg.reply(ctx.cache_http, "You cannot unlike bots.").await?;
        return Ok(());
    }

    let outcome = ctx
        .pstate
        .write()
        .await
        .likes
        .unlike(msg.author.id, target.id)
        .await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            log_error!("Could not record unlike: {}", e);
            msg.reply(ctx.cache_http, "Could not save your change. Please try again.")
                .await?;
            return Ok(());
        }
    };

    let liker_name = msg.author.nick_in_guild(ctx, msg.guild_id).await;
    let likee_name = target.nick_in_guild(ctx, msg.guild_id).await;
    match outcome {
        UnlikeOutcome::SelfUnlike => {
            msg.reply(ctx.cache_http, "You cannot unlike yourself.").await?;
        }
        UnlikeOutcome::NotLiked => {
            msg.reply(
                ctx.cache_http,
                format!("You have not liked {}'s profile.", likee_name),
            )
            .await?;
        }
        UnlikeOutcome::Unliked { was_match } => {
            msg.reply(
                ctx.cache_http,
                format!("{} unliked {}'s profile.", liker_name, likee_name),
            )
            .await?;

            if was_match {
                notify(
                    ctx,
                    target.id,
                    format!(
                        "\u{1F494} {} has unliked your profile. Your match is no longer mutual.",
                        liker_name
                    ),
                )
                .await;
            }
        }
    }
    Ok(())
}

async fn member_list(
    ctx: &Context<'_>,
    msg: &Message,
    title: String,
    members: &BTreeSet<UserId>,
    empty: &str,
) -> Result<()> {
    if members.is_empty() {
        msg.reply(ctx.cache_http, empty).await?;
        return Ok(());
    }

    let description = members
        .iter()
        .map(|member| format!("<@{}>", member))
        .collect::<Vec<_>>()
        .join("\n");
    let embed = CreateEmbed::new()
        .title(title)
        .description(clip(&description, MAX_DESCRIPTION))
        .colour(Colour::RED)
        .thumbnail(msg.author.face());

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn top_likes(ctx: &Context<'_>, msg: &Message, arg: Option<&str>) -> Result<()> {
    let Some(n) = parse_count(arg) else {
        msg.reply(ctx.cache_http, "Please enter a positive number.")
            .await?;
        return Ok(());
    };

    let top = ctx.pstate.read().await.likes.table().top(n);
    if top.is_empty() {
        msg.reply(ctx.cache_http, "No profiles have been liked yet.")
            .await?;
        return Ok(());
    }

    let embed = CreateEmbed::new()
        .title(format!("\u{1F3C6} Top {} Profiles by Likes", top.len()))
        .description(clip(&leaderboard(&top), MAX_DESCRIPTION))
        .colour(Colour::GOLD);
    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

/// `None` for anything but a positive integer
fn parse_count(arg: Option<&str>) -> Option<usize> {
    match arg {
        None => Some(DEFAULT_TOP),
        Some(arg) => arg.parse().ok().filter(|n| *n > 0),
    }
}

fn leaderboard(top: &[(UserId, usize)]) -> String {
    top.iter()
        .enumerate()
        .map(|(i, (member, count))| {
            format!(
                "{}. <@{}> - {} like{}",
                i + 1,
                member,
                count,
                if *count == 1 { "" } else { "s" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_argument() {
        assert_eq!(parse_count(None), Some(DEFAULT_TOP));
        assert_eq!(parse_count(Some("3")), Some(3));
        assert_eq!(parse_count(Some("0")), None);
        assert_eq!(parse_count(Some("-2")), None);
        assert_eq!(parse_count(Some("lots")), None);
    }

    #[test]
    fn leaderboard_lines() {
        let top = [(UserId::new(10), 3), (UserId::new(5), 1)];
        assert_eq!(
            leaderboard(&top),
            "1. <@10> - 3 likes\n2. <@5> - 1 like"
        );
    }
}
