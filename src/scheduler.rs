//! Live jobs for recurring events, kept in step with their durable definitions.
//!
//! A definition goes `Defined -> Active -> Removed`.  Registering and removing always touch the
//! live job and the definitions file together, and roll the live side back if the file can't be
//! written, so the two never disagree.

use crate::{
    log_error, log_internal,
    logging::{EventId, PrintColor},
    schedule::{event_name, guild_prefix, EventDefinition, EventTable, ScheduleError, Trigger},
    store::Store,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GuildId, Http};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Notify, RwLock};

/// How long the runner sleeps when nothing is scheduled.  Any new event wakes it early.
const IDLE_SLEEP: Duration = Duration::from_secs(60 * 60);

struct LiveJob {
    definition: EventDefinition,
    trigger: Trigger,
    next_fire: DateTime<Utc>,
}

/// A job that came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub event_id: String,
    pub channel_id: ChannelId,
    pub message: String,
}

pub struct Scheduler {
    definitions: Store<EventTable>,
    live: HashMap<String, LiveJob>,
    /// Next fire times.  Entries go stale when a job is removed or re-armed and are skipped when
    /// popped.
    queue: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
    wake: Arc<Notify>,
    running: bool,
}

impl Scheduler {
    pub fn new(definitions: Store<EventTable>) -> Self {
        Self {
            definitions,
            live: HashMap::new(),
            queue: BinaryHeap::new(),
            wake: Arc::new(Notify::new()),
            running: false,
        }
    }

    fn arm(
        &mut self,
        event_id: &str,
        definition: EventDefinition,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let trigger = definition.schedule.trigger()?;
        let next_fire = trigger.next_after(now)?;
        self.live.insert(
            event_id.to_owned(),
            LiveJob {
                definition,
                trigger,
                next_fire,
            },
        );
        self.queue.push(Reverse((next_fire, event_id.to_owned())));
        self.wake.notify_one();
        Ok(next_fire)
    }

    /// Register (or replace) an event and persist its definition.  Returns the first firing.
    pub async fn schedule(
        &mut self,
        event_id: &str,
        definition: EventDefinition,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let previous_live = self.live.remove(event_id);
        let next_fire = match self.arm(event_id, definition.clone(), now) {
            Ok(next_fire) => next_fire,
            Err(e) => {
                if let Some(job) = previous_live {
                    self.live.insert(event_id.to_owned(), job);
                }
                return Err(e.into());
            }
        };

        let previous_definition = self
            .definitions
            .table_mut()
            .insert(event_id.to_owned(), definition);

        if let Err(e) = self.definitions.save().await {
            // Put both sides back the way they were
            self.live.remove(event_id);
            match previous_definition {
                Some(previous) => {
                    self.definitions
                        .table_mut()
                        .insert(event_id.to_owned(), previous);
                }
                None => {
                    self.definitions.table_mut().remove(event_id);
                }
            }
            if let Some(job) = previous_live {
                self.queue
                    .push(Reverse((job.next_fire, event_id.to_owned())));
                self.live.insert(event_id.to_owned(), job);
            }
            return Err(e);
        }

        log_internal!(
            "Scheduled event {}, first firing {}",
            EventId(event_id).color(),
            next_fire
        );
        Ok(next_fire)
    }

    /// Remove both the live job and its definition.  `false` if there was no such event.
    pub async fn remove(&mut self, event_id: &str) -> Result<bool> {
        let live = self.live.remove(event_id);
        let definition = self.definitions.table_mut().remove(event_id);
        if live.is_none() && definition.is_none() {
            return Ok(false);
        }

        if let Err(e) = self.definitions.save().await {
            if let Some(definition) = definition {
                self.definitions
                    .table_mut()
                    .insert(event_id.to_owned(), definition);
            }
            if let Some(job) = live {
                self.queue
                    .push(Reverse((job.next_fire, event_id.to_owned())));
                self.live.insert(event_id.to_owned(), job);
            }
            return Err(e);
        }

        log_internal!("Removed event {}", EventId(event_id).color());
        Ok(true)
    }

    /// Register a live job for every durable definition, then reconcile the two sides.
    pub async fn restore(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let definitions: Vec<(String, EventDefinition)> = self
            .definitions
            .table()
            .iter()
            .map(|(id, def)| (id.clone(), def.clone()))
            .collect();

        let mut restored = 0;
        for (event_id, definition) in definitions {
            match self.arm(&event_id, definition, now) {
                Ok(next_fire) => {
                    restored += 1;
                    log_internal!(
                        "Restored event {}, next firing {}",
                        EventId(&event_id).color(),
                        next_fire
                    );
                }
                Err(e) => log_error!("Could not restore event {}: {}", event_id, e),
            }
        }

        self.reconcile().await?;
        Ok(restored)
    }

    /// Drop live jobs that have no definition, and definitions that have no live job.
    pub async fn reconcile(&mut self) -> Result<()> {
        let orphan_jobs: Vec<String> = self
            .live
            .keys()
            .filter(|id| !self.definitions.table().contains_key(*id))
            .cloned()
            .collect();
        for event_id in orphan_jobs {
            log_error!("Dropping live job {} with no stored definition", event_id);
            self.live.remove(&event_id);
        }

        let orphan_definitions: Vec<String> = self
            .definitions
            .table()
            .keys()
            .filter(|id| !self.live.contains_key(*id))
            .cloned()
            .collect();
        if orphan_definitions.is_empty() {
            return Ok(());
        }
        for event_id in &orphan_definitions {
            log_error!("Dropping stored definition {} with no live job", event_id);
            self.definitions.table_mut().remove(event_id);
        }
        self.definitions.save().await
    }

    /// Pop every job due at `now`, re-arming each for its next occurrence.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut firings = Vec::new();

        while let Some(Reverse((at, _))) = self.queue.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, event_id))) = self.queue.pop() else {
                break;
            };
            let Some(job) = self.live.get_mut(&event_id) else {
                continue;
            };
            if job.next_fire != at {
                continue;
            }

            firings.push(Firing {
                event_id: event_id.clone(),
                channel_id: job.definition.channel_id,
                message: job.definition.message.clone(),
            });
            match job.trigger.next_after(now) {
                Ok(next_fire) => {
                    job.next_fire = next_fire;
                    self.queue.push(Reverse((next_fire, event_id)));
                }
                Err(e) => {
                    // The definition stays on disk; the next restore's reconcile drops it.
                    log_error!("Stopping event {}: {}", EventId(&event_id).color(), e);
                    self.live.remove(&event_id);
                }
            }
        }

        firings
    }

    /// Earliest pending firing, if any
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.live.values().map(|job| job.next_fire).min()
    }

    pub fn next_fire(&self, event_id: &str) -> Option<DateTime<Utc>> {
        self.live.get(event_id).map(|job| job.next_fire)
    }

    /// Events of `guild_id` that post to `channel_id`, sorted by name.
    pub fn list(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Vec<(&str, &EventDefinition, DateTime<Utc>)> {
        let prefix = guild_prefix(guild_id);
        let mut events: Vec<_> = self
            .live
            .iter()
            .filter(|(id, job)| {
                id.starts_with(&prefix) && job.definition.channel_id == channel_id
            })
            .map(|(id, job)| (event_name(id), &job.definition, job.next_fire))
            .collect();
        events.sort_by(|a, b| a.0.cmp(b.0));
        events
    }

    pub async fn flush(&self) -> Result<()> {
        self.definitions.save().await
    }

    /// Start the task that posts event messages.  Only the first call starts anything; gateway
    /// reconnects fire `ready` again.
    pub async fn start(scheduler: Arc<RwLock<Scheduler>>, http: Arc<Http>) {
        let wake = {
            let mut this = scheduler.write().await;
            if this.running {
                return;
            }
            this.running = true;
            this.wake.clone()
        };

        tokio::spawn(async move {
            loop {
                let (firings, next_wake) = {
                    let mut this = scheduler.write().await;
                    let firings = this.pop_due(Utc::now());
                    (firings, this.next_wake())
                };

                for firing in firings {
                    log_internal!("Firing event {}", EventId(&firing.event_id).color());
                    if let Err(e) = firing.channel_id.say(&http, &firing.message).await {
                        log_error!("Could not post event {}: {}", firing.event_id, e);
                    }
                }

                let sleep = next_wake
                    .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                    .unwrap_or(IDLE_SLEEP);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = wake.notified() => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{IntervalUnit, Schedule};
    use crate::store::Memory;
    use chrono::{Datelike, TimeDelta, TimeZone, Timelike, Weekday};
    use std::sync::atomic::Ordering;

    fn utc(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, mi, 0).unwrap()
    }

    fn every_two_hours(channel: u64) -> EventDefinition {
        EventDefinition {
            channel_id: ChannelId::new(channel),
            message: "drink water".to_owned(),
            schedule: Schedule::Interval {
                interval_value: 2,
                interval_unit: IntervalUnit::Hours,
                start_time: utc(1, 0, 0).naive_utc(),
            },
        }
    }

    fn wednesdays(channel: u64) -> EventDefinition {
        EventDefinition {
            channel_id: ChannelId::new(channel),
            message: "raid".to_owned(),
            schedule: Schedule::Weekly {
                day_of_week: Weekday::Wed,
                hour: 20,
                minute: 0,
            },
        }
    }

    async fn scheduler(backend: Arc<Memory>) -> Scheduler {
        Scheduler::new(Store::load(backend).await.unwrap())
    }

    #[tokio::test]
    async fn restore_aligns_interval_to_original_start() {
        let backend = Arc::new(Memory::default());
        let mut before = scheduler(backend.clone()).await;
        before
            .schedule("1_water", every_two_hours(5), utc(1, 0, 0) - TimeDelta::minutes(1))
            .await
            .unwrap();

        // process restarts at 05:10
        let mut after = scheduler(backend).await;
        assert_eq!(after.restore(utc(1, 5, 10)).await.unwrap(), 1);
        assert_eq!(after.next_fire("1_water"), Some(utc(1, 6, 0)));
    }

    #[tokio::test]
    async fn restore_reproduces_weekly_slot() {
        let backend = Arc::new(Memory::default());
        scheduler(backend.clone())
            .await
            .schedule("1_raid", wednesdays(5), utc(1, 0, 0))
            .await
            .unwrap();

        for restart in [utc(2, 3, 0), utc(3, 21, 0), utc(13, 23, 59)] {
            let mut s = scheduler(backend.clone()).await;
            s.restore(restart).await.unwrap();
            let next = s.next_fire("1_raid").unwrap();
            assert_eq!(next.weekday(), Weekday::Wed);
            assert_eq!((next.hour(), next.minute()), (20, 0));
            assert!(next > restart && next - restart <= TimeDelta::weeks(1));
        }
    }

    #[tokio::test]
    async fn remove_deletes_job_and_definition() {
        let backend = Arc::new(Memory::default());
        let mut s = scheduler(backend.clone()).await;
        s.schedule("1_raid", wednesdays(5), utc(1, 0, 0)).await.unwrap();

        assert!(s.remove("1_raid").await.unwrap());
        assert_eq!(s.next_fire("1_raid"), None);
        assert!(!s.remove("1_raid").await.unwrap());

        let mut reloaded = scheduler(backend).await;
        assert_eq!(reloaded.restore(utc(2, 0, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_save_rolls_back_both_sides() {
        let backend = Arc::new(Memory::default());
        let mut s = scheduler(backend.clone()).await;
        s.schedule("1_raid", wednesdays(5), utc(1, 0, 0)).await.unwrap();

        backend.fail_saves.store(true, Ordering::SeqCst);
        assert!(s.remove("1_raid").await.is_err());
        assert_eq!(s.next_fire("1_raid"), Some(utc(3, 20, 0)));
        assert!(s
            .schedule("1_water", every_two_hours(5), utc(1, 1, 0))
            .await
            .is_err());
        assert_eq!(s.next_fire("1_water"), None);

        backend.fail_saves.store(false, Ordering::SeqCst);
        let mut reloaded = scheduler(backend).await;
        assert_eq!(reloaded.restore(utc(1, 0, 0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_without_state_change() {
        let backend = Arc::new(Memory::default());
        let mut s = scheduler(backend).await;
        let mut bad = wednesdays(5);
        bad.schedule = Schedule::Weekly {
            day_of_week: Weekday::Wed,
            hour: 25,
            minute: 0,
        };

        assert!(s.schedule("1_bad", bad, utc(1, 0, 0)).await.is_err());
        assert_eq!(s.next_fire("1_bad"), None);
        assert!(!s.remove("1_bad").await.unwrap());
    }

    #[tokio::test]
    async fn restore_drops_unusable_definitions() {
        let backend = Arc::new(Memory::default());
        let mut table = EventTable::new();
        table.insert("1_ok".to_owned(), wednesdays(5));
        let mut broken = every_two_hours(5);
        broken.schedule = Schedule::Interval {
            interval_value: 0,
            interval_unit: IntervalUnit::Hours,
            start_time: utc(1, 0, 0).naive_utc(),
        };
        table.insert("1_broken".to_owned(), broken);
        crate::store::Backend::save(&*backend, &table).await.unwrap();

        let mut s = scheduler(backend.clone()).await;
        assert_eq!(s.restore(utc(1, 0, 0)).await.unwrap(), 1);

        let stored: EventTable = crate::store::Backend::load(&*backend).await.unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["1_ok"]);
    }

    #[tokio::test]
    async fn job_running_off_the_calendar_is_dropped_not_fatal() {
        let backend = Arc::new(Memory::default());
        let start = DateTime::<Utc>::MAX_UTC - TimeDelta::days(400);
        let mut yearly = every_two_hours(5);
        yearly.schedule = Schedule::Interval {
            interval_value: 365,
            interval_unit: IntervalUnit::Days,
            start_time: start.naive_utc(),
        };

        let mut s = scheduler(backend.clone()).await;
        s.schedule("1_yearly", yearly, start - TimeDelta::minutes(1))
            .await
            .unwrap();
        s.schedule("1_water", every_two_hours(5), utc(1, 0, 30))
            .await
            .unwrap();

        assert_eq!(s.pop_due(start).len(), 2);
        let last = start + TimeDelta::days(365);
        assert_eq!(s.next_fire("1_yearly"), Some(last));

        // the following occurrence doesn't exist, so the job stops and the rest carry on
        assert_eq!(s.pop_due(last).len(), 2);
        assert_eq!(s.next_fire("1_yearly"), None);
        assert!(s.next_fire("1_water").is_some());

        // a restart drops the stale definition
        let mut restarted = scheduler(backend.clone()).await;
        assert_eq!(restarted.restore(last).await.unwrap(), 1);
        let stored: EventTable = crate::store::Backend::load(&*backend).await.unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["1_water"]);
    }

    #[tokio::test]
    async fn pop_due_fires_and_rearms() {
        let mut s = scheduler(Arc::new(Memory::default())).await;
        s.schedule("1_water", every_two_hours(5), utc(1, 0, 30))
            .await
            .unwrap();
        assert_eq!(s.next_wake(), Some(utc(1, 2, 0)));

        assert!(s.pop_due(utc(1, 1, 59)).is_empty());
        let fired = s.pop_due(utc(1, 2, 0));
        assert_eq!(
            fired,
            vec![Firing {
                event_id: "1_water".to_owned(),
                channel_id: ChannelId::new(5),
                message: "drink water".to_owned(),
            }]
        );
        assert_eq!(s.next_fire("1_water"), Some(utc(1, 4, 0)));

        // a long stall fires once and stays on phase
        assert_eq!(s.pop_due(utc(1, 9, 30)).len(), 1);
        assert_eq!(s.next_fire("1_water"), Some(utc(1, 10, 0)));
    }

    #[tokio::test]
    async fn removed_job_never_fires() {
        let mut s = scheduler(Arc::new(Memory::default())).await;
        s.schedule("1_water", every_two_hours(5), utc(1, 0, 30))
            .await
            .unwrap();
        s.remove("1_water").await.unwrap();

        assert!(s.pop_due(utc(2, 0, 0)).is_empty());
        assert_eq!(s.next_wake(), None);
    }

    #[tokio::test]
    async fn replacing_an_event_keeps_one_job() {
        let mut s = scheduler(Arc::new(Memory::default())).await;
        s.schedule("1_water", every_two_hours(5), utc(1, 0, 30))
            .await
            .unwrap();
        s.schedule("1_water", wednesdays(5), utc(1, 0, 30))
            .await
            .unwrap();

        assert!(s.pop_due(utc(1, 2, 0)).is_empty());
        assert_eq!(s.pop_due(utc(3, 20, 0)).len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_guild_and_channel() {
        let mut s = scheduler(Arc::new(Memory::default())).await;
        let now = utc(1, 0, 30);
        s.schedule("1_water", every_two_hours(5), now).await.unwrap();
        s.schedule("1_raid", wednesdays(5), now).await.unwrap();
        s.schedule("1_elsewhere", wednesdays(6), now).await.unwrap();
        s.schedule("2_raid", wednesdays(5), now).await.unwrap();

        let names: Vec<&str> = s
            .list(GuildId::new(1), ChannelId::new(5))
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert_eq!(names, vec!["raid", "water"]);
    }
}
