//! Flat tables persisted as whole JSON documents.
//!
//! Every mutation rewrites the entire file.  That is fine for the table sizes a single Discord
//! community produces, and the write-then-rename keeps a crash mid-write from truncating the
//! previous copy.

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{io::ErrorKind, path::PathBuf};

pub const PROFILES_FILE: &str = "profile_cache.json";
pub const LIKES_FILE: &str = "likes_cache.json";
pub const EVENTS_FILE: &str = "events.json";
pub const GAME_IDS_FILE: &str = "game_ids.json";

/// Where a table lives between sessions
#[serenity::async_trait]
pub trait Backend<T>: Send + Sync {
    /// Load the table.  A table that was never saved loads as its default.
    async fn load(&self) -> Result<T>;
    async fn save(&self, table: &T) -> Result<()>;
}

/// Pretty-printed JSON file
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[serenity::async_trait]
impl<T> Backend<T> for JsonFile
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    async fn load(&self) -> Result<T> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                anyhow!(
                    "Could not parse `{}`: {}",
                    self.path.to_string_lossy(),
                    e
                )
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(anyhow!(
                "Could not read `{}`: {}",
                self.path.to_string_lossy(),
                e
            )),
        }
    }

    async fn save(&self, table: &T) -> Result<()> {
        let serialized = serde_json::to_string_pretty(table).map_err(|e| {
            anyhow!(
                "Could not serialize `{}`: {}",
                self.path.to_string_lossy(),
                e
            )
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow!(
                    "Could not create directory `{}`: {}",
                    parent.to_string_lossy(),
                    e
                )
            })?;
        }

        let tmp_path = self.path.with_extension("json.new");
        tokio::fs::write(&tmp_path, serialized).await.map_err(|e| {
            anyhow!(
                "Could not write temporary file `{}`: {}",
                tmp_path.to_string_lossy(),
                e
            )
        })?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Could not rename `{}` to `{}`: {}",
                    tmp_path.to_string_lossy(),
                    self.path.to_string_lossy(),
                    e
                )
            })
    }
}

#[serenity::async_trait]
impl<T, B> Backend<T> for std::sync::Arc<B>
where
    T: Send + Sync + 'static,
    B: Backend<T>,
{
    async fn load(&self) -> Result<T> {
        (**self).load().await
    }

    async fn save(&self, table: &T) -> Result<()> {
        (**self).save(table).await
    }
}

/// In-memory stand-in for [`JsonFile`].  Still goes through serde so round trips are honest.
#[cfg(test)]
#[derive(Default)]
pub struct Memory {
    pub json: std::sync::Mutex<Option<String>>,
    pub fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[serenity::async_trait]
impl<T> Backend<T> for Memory
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    async fn load(&self) -> Result<T> {
        let json = self.json.lock().map_err(|_| anyhow!("poisoned"))?.clone();
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(T::default()),
        }
    }

    async fn save(&self, table: &T) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        let json = serde_json::to_string_pretty(table)?;
        *self.json.lock().map_err(|_| anyhow!("poisoned"))? = Some(json);
        Ok(())
    }
}

/// A table plus the backend it is persisted to
pub struct Store<T> {
    table: T,
    backend: Box<dyn Backend<T>>,
}

impl<T> Store<T> {
    pub async fn load(backend: impl Backend<T> + 'static) -> Result<Self> {
        let table = backend.load().await?;
        Ok(Self {
            table,
            backend: Box::new(backend),
        })
    }

    pub async fn open(path: PathBuf) -> Result<Self>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    {
        Self::load(JsonFile::new(path)).await
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Callers must [`Store::save`] once they're done mutating.
    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub async fn save(&self) -> Result<()> {
        self.backend.save(&self.table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_file_loads_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store: Store<HashMap<String, String>> =
            Store::open(dir.path().join("nothing.json")).await.unwrap();
        assert!(store.table().is_empty());
    }

    #[tokio::test]
    async fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(GAME_IDS_FILE);

        let mut store: Store<HashMap<String, String>> = Store::open(path.clone()).await.unwrap();
        store
            .table_mut()
            .insert("1234".to_owned(), "987654".to_owned());
        store.save().await.unwrap();

        let reloaded: Store<HashMap<String, String>> = Store::open(path.clone()).await.unwrap();
        assert_eq!(reloaded.table(), store.table());
        // rename leaves no temporary file behind
        assert!(!path.with_extension("json.new").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LIKES_FILE);
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result: Result<Store<HashMap<String, Vec<String>>>> = Store::open(path).await;
        assert!(result.is_err());
    }
}
