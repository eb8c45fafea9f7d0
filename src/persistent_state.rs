use crate::{
    config::Config,
    game_ids::GameIds,
    likes::Likes,
    log_error, log_internal,
    profile::Profiles,
    store::{self, Store},
};
use anyhow::Result;

/// State which persists across sessions
///
/// Scheduled event definitions persist too, but live with the [`crate::scheduler::Scheduler`]
/// that arms them.
pub struct PersistentState {
    pub profiles: Store<Profiles>,
    pub likes: Store<Likes>,
    pub game_ids: Store<GameIds>,
}

impl PersistentState {
    pub async fn load(cfg: &Config) -> Result<Self> {
        let dir = cfg.data_dir()?;

        let profiles: Store<Profiles> = Store::open(dir.join(store::PROFILES_FILE)).await?;
        let likes: Store<Likes> = Store::open(dir.join(store::LIKES_FILE)).await?;
        let game_ids: Store<GameIds> = Store::open(dir.join(store::GAME_IDS_FILE)).await?;

        // Profiles cached before every field existed were filled in while loading.  Write them
        // back so the file on disk catches up.
        let backfilled = profiles
            .table()
            .values()
            .filter(|profile| profile.sentinel_count() > 0)
            .count();
        if backfilled > 0 {
            log_internal!("Filled missing fields in {} cached profile(s)", backfilled);
            profiles.save().await?;
        }

        log_internal!(
            "Loaded {} profile(s), {} like(s), {} game id(s) from `{}`",
            profiles.table().len(),
            likes.table().len(),
            game_ids.table().len(),
            dir.to_string_lossy(),
        );

        Ok(Self {
            profiles,
            likes,
            game_ids,
        })
    }

    /// Best effort save of every table
    pub async fn flush(&self) {
        let results = [
            ("profiles", self.profiles.save().await),
            ("likes", self.likes.save().await),
            ("game ids", self.game_ids.save().await),
        ];
        for (name, result) in results {
            if let Err(e) = result {
                log_error!("Could not flush {}: {}", name, e);
            }
        }
    }
}
