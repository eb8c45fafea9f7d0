use crate::{
    event::*,
    helper::{clip, MessageHelper, UserHelper, UserIdHelper},
    log_error,
    plugin::*,
    profile::{self, Profile},
    volatile_state,
};
use anyhow::Result;
use serenity::all::{Colour, CreateEmbed, CreateEmbedFooter, CreateMessage, Message, User};
use std::time::Duration;
use tokio::time::Instant;

const PROFILE: &str = "profile";
const RESET_PROFILE: &str = "reset-profile";
const LIST_PROFILES: &str = "list-profiles";
const FIND_MATCHES: &str = "find-matches";

/// How many random profiles `find-matches` suggests
const SUGGESTIONS: usize = 5;
/// Discord's cap on fields per embed
const MAX_EMBED_FIELDS: usize = 25;
const MAX_FIELD_VALUE: usize = 1024;

/// Generate, show, and manage dating profiles
pub struct ProfileCommands;

#[serenity::async_trait]
impl Plugin for ProfileCommands {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(
            [
                usage_line(ctx, "profile [@member]", "show or generate a dating profile").await,
                usage_line(ctx, "reset-profile @member", "forget a profile (admins)").await,
                usage_line(ctx, LIST_PROFILES, "list cached profiles (admins)").await,
                usage_line(ctx, FIND_MATCHES, "suggest a few random profiles").await,
            ]
            .join("\n"),
        )
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        if let Some((msg, _)) = event.is_bot_cmd(ctx, PROFILE).await {
            show_profile(ctx, msg).await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, RESET_PROFILE).await {
            reset_profile(ctx, msg).await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, LIST_PROFILES).await {
            list_profiles(ctx, msg).await?;
        } else if let Some((msg, _)) = event.is_bot_cmd(ctx, FIND_MATCHES).await {
            find_matches(ctx, msg).await?;
        } else {
            return Ok(EventHandled::No);
        }
        Ok(EventHandled::Yes)
    }
}

fn profile_embed(display_name: &str, user: &User, profile: &Profile) -> CreateEmbed {
    profile
        .fields()
        .into_iter()
        .fold(
            CreateEmbed::new()
                .title(display_name)
                .colour(Colour::BLUE)
                .thumbnail(user.face()),
            |embed, (key, value)| {
                embed.field(
                    profile::field_title(key),
                    clip(value, MAX_FIELD_VALUE),
                    false,
                )
            },
        )
}

async fn show_profile(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let target = msg.mentioned_user().unwrap_or(&msg.author).clone();
    if target.bot {
        msg.reply(ctx.cache_http, "Cannot generate profiles for bots.")
            .await?;
        return Ok(());
    }
    let display_name = target.nick_in_guild(ctx, msg.guild_id).await;

    let cached = ctx
        .pstate
        .read()
        .await
        .profiles
        .table()
        .get(&target.id)
        .cloned();

    let profile = match cached {
        Some(profile) => profile,
        None => {
            let limit = ctx.cfg.read().await.general.profile_rate_limit_seconds;
            let limit = Duration::from_secs(limit);
            let now = Instant::now();
            {
                let mut vstate = ctx.vstate.write().await;
                if let Some(wait) = vstate.profile_cooldown.remaining(msg.author.id, limit, now) {
                    drop(vstate);
                    msg.reply(
                        ctx.cache_http,
                        format!(
                            "Please wait {:.1} seconds before generating another profile.",
                            wait.as_secs_f32()
                        ),
                    )
                    .await?;
                    return Ok(());
                }
                vstate.profile_cooldown.update(msg.author.id, now);
            }

            // Generation can take a while; show that we're working on it.
            let typing = msg.channel_id.start_typing(ctx.http);
            let generated = volatile_state::generate_profile(ctx.vstate, &display_name).await;
            typing.stop();

            match generated {
                Ok(profile) => {
                    ctx.pstate
                        .write()
                        .await
                        .profiles
                        .put(target.id, profile.clone())
                        .await?;
                    profile
                }
                Err(e) => {
                    log_error!("Could not generate a profile for {}: {}", display_name, e);
                    msg.reply(
                        ctx.cache_http,
                        "Failed to generate a valid profile. Please try again.",
                    )
                    .await?;
                    return Ok(());
                }
            }
        }
    };

    let embed = profile_embed(&display_name, &target, &profile);
    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn reset_profile(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    if !msg.is_privileged(ctx).await {
        msg.reply(ctx.cache_http, "Only administrators can reset profiles.")
            .await?;
        return Ok(());
    }
    let Some(target) = msg.mentioned_user() else {
        msg.reply(ctx.cache_http, "Mention the member whose profile to reset.")
            .await?;
        return Ok(());
    };
    let display_name = target.nick_in_guild(ctx, msg.guild_id).await;

    let reset = ctx.pstate.write().await.profiles.reset(target.id).await?;
    let reply = if reset {
        format!("Profile for {} has been reset.", display_name)
    } else {
        format!("No existing profile found for {}.", display_name)
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

async fn list_profiles(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    if !msg.is_privileged(ctx).await {
        msg.reply(ctx.cache_http, "Only administrators can list profiles.")
            .await?;
        return Ok(());
    }

    let mut profiles: Vec<_> = ctx
        .pstate
        .read()
        .await
        .profiles
        .table()
        .iter()
        .map(|(member, profile)| (*member, profile.clone()))
        .collect();
    if profiles.is_empty() {
        msg.reply(ctx.cache_http, "No profiles have been generated yet.")
            .await?;
        return Ok(());
    }
    profiles.sort_by_key(|(member, _)| *member);

    let total = profiles.len();
    let mut embed = CreateEmbed::new()
        .title("\u{1F4C4} Cached Hinge Profiles")
        .colour(Colour::DARK_GREEN);
    for (member, profile) in profiles.into_iter().take(MAX_EMBED_FIELDS) {
        let display_name = member.nick_in_guild(ctx, msg.guild_id).await;
        embed = embed.field(
            display_name,
            format!("**Age:** {}, **Job:** {}", profile.age, clip(&profile.job, 200)),
            false,
        );
    }
    if total > MAX_EMBED_FIELDS {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "and {} more",
            total - MAX_EMBED_FIELDS
        )));
    }

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn find_matches(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let suggestions: Vec<Profile> = {
        let pstate = ctx.pstate.read().await;
        let mut rng = rand::thread_rng();
        profile::sample_matches(pstate.profiles.table(), msg.author.id, SUGGESTIONS, &mut rng)
            .into_iter()
            .map(|(_, profile)| profile.clone())
            .collect()
    };
    if suggestions.is_empty() {
        msg.reply(ctx.cache_http, "No potential matches found at the moment.")
            .await?;
        return Ok(());
    }

    let display_name = msg.author.nick_in_guild(ctx, msg.guild_id).await;
    let embed = suggestions.iter().fold(
        CreateEmbed::new()
            .title(format!("\u{1F50D} Potential Matches for {}", display_name))
            .colour(Colour::GOLD),
        |embed, profile| {
            embed.field(
                clip(&profile.name, 256),
                clip(
                    &format!(
                        "\u{1F4A1} **Dating me is like:** {}\n\u{1F4BC} **Job:** {}\n\u{1F382} **Age:** {}",
                        profile.dating_me_like, profile.job, profile.age
                    ),
                    MAX_FIELD_VALUE,
                ),
                false,
            )
        },
    );

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}
