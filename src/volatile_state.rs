use crate::{
    config::Config,
    profile::{self, GenerationError, Profile, ProfileTextSource},
};
use serenity::all::UserId;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::Instant};

/// State which is lost across sessions
pub struct VolatileState {
    profile_source: Arc<dyn ProfileTextSource>,
    pub profile_cooldown: Cooldown,
}

impl VolatileState {
    pub fn new(cfg: &Config) -> Result<Self, GenerationError> {
        Ok(Self {
            profile_source: profile::source_from_config(&cfg.profile_generator)?,
            profile_cooldown: Cooldown::new(),
        })
    }

    pub fn set_profile_source(&mut self, source: Arc<dyn ProfileTextSource>) {
        self.profile_source = source;
    }
}

/// Generate a profile with whichever source is configured right now.
///
/// The lock is only held to grab the source, so a slow generation doesn't block other commands
/// or a config reload.
pub async fn generate_profile(
    vstate: &RwLock<VolatileState>,
    name: &str,
) -> Result<Profile, GenerationError> {
    let source = vstate.read().await.profile_source.clone();
    source.generate(name).await
}

/// Install `new` together with the profile source it describes.  If the source can't be built,
/// neither changes.
pub async fn apply_config(
    cfg: &RwLock<Config>,
    vstate: &RwLock<VolatileState>,
    new: Config,
) -> Result<(), GenerationError> {
    let source = profile::source_from_config(&new.profile_generator)?;
    *cfg.write().await = new;
    vstate.write().await.set_profile_source(source);
    Ok(())
}

/// Per member timestamps of the last expensive request
pub struct Cooldown(HashMap<UserId, Instant>);

impl Cooldown {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Time left before `id` may try again, if any
    pub fn remaining(&self, id: UserId, limit: Duration, now: Instant) -> Option<Duration> {
        match self.0.get(&id) {
            Some(last) if now.duration_since(*last) < limit => {
                Some(limit - now.duration_since(*last))
            }
            Some(_) => None,
            None => None,
        }
    }

    pub fn update(&mut self, id: UserId, now: Instant) {
        self.0.insert(id, now);
    }
}
