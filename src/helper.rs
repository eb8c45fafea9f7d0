//! Miscellaneous convenience methods

use crate::{context::Context, log_error};
use serenity::all::{GuildId, User};
use std::collections::HashMap;

#[serenity::async_trait]
pub trait UserIdHelper {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String;
}

#[serenity::async_trait]
impl UserIdHelper for serenity::all::UserId {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String {
        let user = match self.to_user(ctx.cache_http).await {
            Ok(user) => user,
            Err(_) => return format!("<unknown-user-{}>", *self),
        };

        user.nick_in_guild(ctx, guild_id).await
    }
}

#[serenity::async_trait]
pub trait UserHelper {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String;
}

#[serenity::async_trait]
impl UserHelper for serenity::all::User {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String {
        let nick_in_guild = match guild_id {
            Some(guild_id) => self.nick_in(ctx.cache_http, guild_id).await,
            None => None,
        };

        // May not be in a guild, e.g. DM.  Fall back to display name, then global username.
        match nick_in_guild {
            Some(nick_in_guild) => nick_in_guild,
            None => self.global_name.clone().unwrap_or_else(|| self.name.clone()),
        }
    }
}

#[serenity::async_trait]
pub trait MessageHelper {
    async fn human_format_content(&self, ctx: &Context) -> String;
    async fn is_from_owner(&self, ctx: &Context) -> bool;
    async fn is_privileged(&self, ctx: &Context) -> bool;
    fn mentioned_user(&self) -> Option<&User>;
}

#[serenity::async_trait]
impl MessageHelper for serenity::all::Message {
    /// Replace user mentions such as `<@1234>` with per-server names for logging.
    async fn human_format_content(&self, ctx: &Context) -> String {
        let mut content = self.content.clone();

        let mut mention_map: HashMap<String, String> = HashMap::new();
        for user in &self.mentions {
            let name = format!("@{}", user.nick_in_guild(ctx, self.guild_id).await);
            mention_map.insert(format!("<@!{}>", user.id), name.clone());
            mention_map.insert(format!("<@{}>", user.id), name);
        }

        for (mention, name) in mention_map {
            content = content.replace(&mention, &name);
        }
        content
    }

    async fn is_from_owner(&self, ctx: &Context) -> bool {
        let owners = &ctx.cfg.read().await.general.bot_owners;
        let author_global_name = &self.author.name;

        owners.contains(author_global_name)
    }

    /// Bot owners anywhere, or administrators of the server the message was sent in
    async fn is_privileged(&self, ctx: &Context) -> bool {
        if self.is_from_owner(ctx).await {
            return true;
        }
        let Some(guild_id) = self.guild_id else {
            return false;
        };

        let member = match guild_id.member(ctx.cache_http, self.author.id).await {
            Ok(member) => member,
            Err(e) => {
                log_error!("Could not look up member {}: {}", self.author.id, e);
                return false;
            }
        };
        match self.guild(ctx.cache) {
            Some(guild) => guild.member_permissions(&member).administrator(),
            None => false,
        }
    }

    /// First member mentioned in the message text.  Replies list the replied-to author as a
    /// mention too, so only mentions that actually appear in the content count.
    fn mentioned_user(&self) -> Option<&User> {
        self.mentions.iter().find(|user| {
            self.content.contains(&format!("<@{}>", user.id))
                || self.content.contains(&format!("<@!{}>", user.id))
        })
    }
}

/// Shorten `text` to at most `max_chars` characters, marking the cut with an ellipsis.  Discord
/// rejects embed fields over their length limits.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut clipped: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push('\u{2026}');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_counts_characters() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("abcdef", 4), "abc\u{2026}");
        assert_eq!(clip("h\u{e9}h\u{e9}h\u{e9}", 6), "h\u{e9}h\u{e9}h\u{e9}");
        assert_eq!(clip("h\u{e9}h\u{e9}h\u{e9}", 3).chars().count(), 3);
    }
}
