//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! the handler translates the callbacks into a distinct Event enum.

use crate::{context::Context, log_error};
use serenity::all::{Message, Ready};

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
}

impl Event {
    // When an event occurs, iterate over all the plugins to see if any can/should handle it.
    pub async fn handle(self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            match plugin.handle(&ctx, &self).await {
                Ok(EventHandled::Yes) => return,
                Ok(EventHandled::No) => continue,
                Err(err) => {
                    log_error!("Error in plugin {}: {}", plugin.name(), err);
                    if let Event::Message(msg) = &self {
                        let reply = "An unexpected error occurred. Please try again later.";
                        if let Err(err) = msg.reply(ctx.cache_http, reply).await {
                            log_error!("Could not report error to {}: {}", msg.author.name, err);
                        }
                    }
                    return;
                }
            }
        }
    }

    // Check if a message should be interpreted as a special bot command.
    //
    // These are prefixed with the configured prefix, e.g. `;like @someone`.  Returns the message
    // and the whitespace separated arguments following the command.
    pub async fn is_bot_cmd<'a>(
        &'a self,
        ctx: &Context<'_>,
        cmd: &str,
    ) -> Option<(&'a Message, Vec<&'a str>)> {
        let Event::Message(msg) = self else {
            return None;
        };
        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        parse_cmd(&msg.content, &prefix, cmd).map(|args| (msg, args))
    }
}

fn parse_cmd<'a>(content: &'a str, prefix: &str, cmd: &str) -> Option<Vec<&'a str>> {
    let mut words = content.split_whitespace();
    let first = words.next()?;
    match first.strip_prefix(prefix) {
        Some(name) if name.eq_ignore_ascii_case(cmd) => Some(words.collect()),
        _ => None,
    }
}

pub enum EventHandled {
    Yes,
    No,
}
