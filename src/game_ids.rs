//! Which in-game player each Discord member redeems gift codes for.

use crate::{log_internal, store::Store};
use anyhow::Result;
use serenity::all::UserId;
use std::collections::HashMap;

pub type GameIds = HashMap<UserId, String>;

impl Store<GameIds> {
    /// Map `member` to `player_id`, returning the id it replaced.
    pub async fn map(&mut self, member: UserId, player_id: String) -> Result<Option<String>> {
        let previous = self.table_mut().insert(member, player_id.clone());
        if let Err(e) = self.save().await {
            match previous {
                Some(previous) => self.table_mut().insert(member, previous),
                None => self.table_mut().remove(&member),
            };
            return Err(e);
        }
        log_internal!("Mapped {} to game id {}", member, player_id);
        Ok(previous)
    }

    /// Returns the id that was mapped, if any.
    pub async fn unmap(&mut self, member: UserId) -> Result<Option<String>> {
        let Some(previous) = self.table_mut().remove(&member) else {
            return Ok(None);
        };
        if let Err(e) = self.save().await {
            self.table_mut().insert(member, previous);
            return Err(e);
        }
        log_internal!("Unmapped {} from game id {}", member, previous);
        Ok(Some(previous))
    }

    /// All mappings, ordered by member
    pub fn list(&self) -> Vec<(UserId, String)> {
        let mut list: Vec<_> = self
            .table()
            .iter()
            .map(|(member, id)| (*member, id.clone()))
            .collect();
        list.sort();
        list
    }
}

/// Player ids are the game's numeric "fid"
pub fn is_valid_player_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Memory;
    use std::sync::{atomic::Ordering, Arc};

    #[tokio::test]
    async fn map_replace_and_unmap() {
        let backend = Arc::new(Memory::default());
        let mut ids: Store<GameIds> = Store::load(backend.clone()).await.unwrap();
        let member = UserId::new(42);

        assert_eq!(ids.map(member, "111".to_owned()).await.unwrap(), None);
        assert_eq!(
            ids.map(member, "222".to_owned()).await.unwrap(),
            Some("111".to_owned())
        );

        let reloaded: Store<GameIds> = Store::load(backend.clone()).await.unwrap();
        assert_eq!(reloaded.list(), vec![(member, "222".to_owned())]);

        assert_eq!(ids.unmap(member).await.unwrap(), Some("222".to_owned()));
        assert_eq!(ids.unmap(member).await.unwrap(), None);
        assert!(ids.list().is_empty());
    }

    #[tokio::test]
    async fn failed_save_restores_previous_mapping() {
        let backend = Arc::new(Memory::default());
        let mut ids: Store<GameIds> = Store::load(backend.clone()).await.unwrap();
        let member = UserId::new(7);
        ids.map(member, "111".to_owned()).await.unwrap();

        backend.fail_saves.store(true, Ordering::SeqCst);
        assert!(ids.map(member, "222".to_owned()).await.is_err());
        assert!(ids.unmap(member).await.is_err());
        assert_eq!(ids.list(), vec![(member, "111".to_owned())]);
    }

    #[test]
    fn player_id_validation() {
        assert!(is_valid_player_id("123456789"));
        assert!(!is_valid_player_id(""));
        assert!(!is_valid_player_id("12ab"));
        assert!(!is_valid_player_id("<@123>"));
    }
}
