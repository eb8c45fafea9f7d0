use crate::{
    event::*,
    helper::{clip, MessageHelper},
    log_error,
    plugin::*,
    schedule::{event_id, EventDefinition, Schedule},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::all::{GuildId, Message};

const SCHEDULE_EVENT: &str = "schedule-event";
const REMOVE_EVENT: &str = "remove-event";
const LIST_EVENTS: &str = "list-events";
const NEXT_EVENT: &str = "next-event";

const MAX_MESSAGE: usize = 2000;

/// Recurring announcements posted by the bot
pub struct EventCommands;

#[serenity::async_trait]
impl Plugin for EventCommands {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        Some(
            [
                usage_line(
                    ctx,
                    "schedule-event <name> weekly <day> <HH:MM> <message...>",
                    "post every week, UTC (admins)",
                )
                .await,
                usage_line(
                    ctx,
                    "schedule-event <name> interval <n> <minutes|hours|days> <HH:MM> <message...>",
                    "post every n units starting at HH:MM UTC (admins)",
                )
                .await,
                usage_line(ctx, "remove-event <name>", "stop a scheduled event (admins)").await,
                usage_line(ctx, LIST_EVENTS, "events posting to this channel").await,
                usage_line(ctx, "next-event <name>", "when an event posts next").await,
            ]
            .join("\n"),
        )
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let (msg, args, cmd) = if let Some((msg, args)) = event.is_bot_cmd(ctx, SCHEDULE_EVENT).await
        {
            (msg, args, SCHEDULE_EVENT)
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, REMOVE_EVENT).await {
            (msg, args, REMOVE_EVENT)
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, LIST_EVENTS).await {
            (msg, args, LIST_EVENTS)
        } else if let Some((msg, args)) = event.is_bot_cmd(ctx, NEXT_EVENT).await {
            (msg, args, NEXT_EVENT)
        } else {
            return Ok(EventHandled::No);
        };

        // Events belong to a server
        let Some(guild_id) = msg.guild_id else {
            msg.reply(ctx.cache_http, "Events can only be managed inside a server.")
                .await?;
            return Ok(EventHandled::Yes);
        };

        match cmd {
            SCHEDULE_EVENT => schedule_event(ctx, msg, guild_id, &args).await?,
            REMOVE_EVENT => remove_event(ctx, msg, guild_id, &args).await?,
            LIST_EVENTS => list_events(ctx, msg, guild_id).await?,
            _ => next_event(ctx, msg, guild_id, &args).await?,
        }
        Ok(EventHandled::Yes)
    }
}

/// Discord renders `<t:...>` in each reader's own time zone
fn timestamp(at: DateTime<Utc>) -> String {
    format!("<t:{0}:F> (<t:{0}:R>)", at.timestamp())
}

async fn schedule_event(
    ctx: &Context<'_>,
    msg: &Message,
    guild_id: GuildId,
    args: &[&str],
) -> Result<()> {
    if !msg.is_privileged(ctx).await {
        msg.reply(ctx.cache_http, "Only administrators can schedule events.")
            .await?;
        return Ok(());
    }
    let Some((name, rest)) = args.split_first() else {
        msg.reply(ctx.cache_http, "Missing event name. See `help`.")
            .await?;
        return Ok(());
    };

    let now = Utc::now();
    let definition = match EventDefinition::from_args(rest, msg.channel_id, now) {
        Ok(definition) => definition,
        Err(e) => {
            msg.reply(ctx.cache_http, format!("{}. See `help`.", e)).await?;
            return Ok(());
        }
    };
    let describe = definition.schedule.describe();

    let id = event_id(guild_id, name);
    let scheduled = ctx
        .scheduler
        .write()
        .await
        .schedule(&id, definition, now)
        .await;
    let reply = match scheduled {
        Ok(next_fire) => format!(
            "Scheduled event '{}': {}. First post {}.",
            name,
            describe,
            timestamp(next_fire)
        ),
        Err(e) => {
            log_error!("Could not schedule event {}: {}", id, e);
            format!("Could not schedule event '{}'. Please try again.", name)
        }
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

async fn remove_event(
    ctx: &Context<'_>,
    msg: &Message,
    guild_id: GuildId,
    args: &[&str],
) -> Result<()> {
    if !msg.is_privileged(ctx).await {
        msg.reply(ctx.cache_http, "Only administrators can remove events.")
            .await?;
        return Ok(());
    }
    let Some(name) = args.first() else {
        msg.reply(ctx.cache_http, "Missing event name.").await?;
        return Ok(());
    };

    let id = event_id(guild_id, name);
    let reply = match ctx.scheduler.write().await.remove(&id).await {
        Ok(true) => format!("Removed event '{}'.", name),
        Ok(false) => format!("No event named '{}' found.", name),
        Err(e) => {
            log_error!("Could not remove event {}: {}", id, e);
            format!("Could not remove event '{}'. Please try again.", name)
        }
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

fn describe_event(name: &str, definition: &EventDefinition, next_fire: DateTime<Utc>) -> String {
    let kind = match definition.schedule {
        Schedule::Weekly { .. } => "Weekly",
        Schedule::Interval { .. } => "Interval",
    };
    format!(
        "**{}**\n> **Type:** {}\n> **Schedule:** {}\n> **Message:** {}\n> **Next:** {}",
        name,
        kind,
        definition.schedule.describe(),
        clip(&definition.message, 200),
        timestamp(next_fire)
    )
}

async fn list_events(ctx: &Context<'_>, msg: &Message, guild_id: GuildId) -> Result<()> {
    let listing: Vec<String> = ctx
        .scheduler
        .read()
        .await
        .list(guild_id, msg.channel_id)
        .into_iter()
        .map(|(name, definition, next_fire)| describe_event(name, definition, next_fire))
        .collect();

    let reply = if listing.is_empty() {
        "No scheduled events found for this channel.".to_owned()
    } else {
        format!(
            "### \u{1F5D3} Scheduled Events for this Channel:\n{}",
            listing.join("\n\n")
        )
    };
    msg.reply(ctx.cache_http, clip(&reply, MAX_MESSAGE)).await?;
    Ok(())
}

async fn next_event(
    ctx: &Context<'_>,
    msg: &Message,
    guild_id: GuildId,
    args: &[&str],
) -> Result<()> {
    let Some(name) = args.first() else {
        msg.reply(ctx.cache_http, "Missing event name.").await?;
        return Ok(());
    };

    let next_fire = ctx
        .scheduler
        .read()
        .await
        .next_fire(&event_id(guild_id, name));
    let reply = match next_fire {
        Some(at) => format!("'{}' posts next {}.", name, timestamp(at)),
        None => format!("No event named '{}' found.", name),
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::IntervalUnit;
    use chrono::{TimeZone, Weekday};
    use serenity::all::ChannelId;

    #[test]
    fn event_listing_entry() {
        let definition = EventDefinition {
            channel_id: ChannelId::new(1),
            message: "Bear trap!".to_owned(),
            schedule: Schedule::Weekly {
                day_of_week: Weekday::Tue,
                hour: 7,
                minute: 5,
            },
        };
        let next = Utc.with_ymd_and_hms(2024, 1, 2, 7, 5, 0).unwrap();

        let text = describe_event("bear", &definition, next);
        assert!(text.starts_with("**bear**\n> **Type:** Weekly"));
        assert!(text.contains("Every tuesday at 07:05 UTC"));
        assert!(text.contains("Bear trap!"));
        assert!(text.contains(&format!("<t:{}:F>", next.timestamp())));
    }

    #[test]
    fn interval_entry_type() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let definition = EventDefinition {
            channel_id: ChannelId::new(1),
            message: "drink water".to_owned(),
            schedule: Schedule::Interval {
                interval_value: 2,
                interval_unit: IntervalUnit::Hours,
                start_time: start.naive_utc(),
            },
        };
        assert!(describe_event("water", &definition, start).contains("> **Type:** Interval"));
    }
}
