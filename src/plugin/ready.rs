use crate::{event::*, log_internal, plugin::*, scheduler::Scheduler};
use anyhow::Result;
use chrono::Utc;

/// Re-arms persisted events and starts the event runner once the connection is ready.
pub struct Ready;

#[serenity::async_trait]
impl Plugin for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn usage(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::Ready(_) = event else {
            return Ok(EventHandled::No);
        };

        // `restore` is idempotent, so gateway reconnects are harmless.
        let restored = ctx.scheduler.write().await.restore(Utc::now()).await?;
        log_internal!("Restored {} scheduled event(s)", restored);

        Scheduler::start(ctx.scheduler.clone(), ctx.http.clone()).await;
        Ok(EventHandled::Yes)
    }
}
