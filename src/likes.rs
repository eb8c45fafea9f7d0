//! Likes between members, and the mutual matches derived from them.

use crate::{log_internal, store::Store};
use anyhow::Result;
use serenity::all::UserId;
use std::collections::{BTreeSet, HashMap};

/// Directed like edges, stored as `likee -> likers`
#[derive(Default, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Likes(HashMap<UserId, BTreeSet<UserId>>);

#[derive(Debug, PartialEq, Eq)]
pub enum LikeOutcome {
    SelfLike,
    AlreadyLiked,
    /// `matched` if the likee already liked the liker, i.e. this like formed a new match
    Liked { matched: bool },
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnlikeOutcome {
    SelfUnlike,
    NotLiked,
    /// `was_match` if the removed like broke a mutual match
    Unliked { was_match: bool },
}

impl Likes {
    pub fn contains(&self, liker: UserId, likee: UserId) -> bool {
        self.0
            .get(&likee)
            .is_some_and(|likers| likers.contains(&liker))
    }

    fn insert(&mut self, liker: UserId, likee: UserId) -> bool {
        self.0.entry(likee).or_default().insert(liker)
    }

    fn remove(&mut self, liker: UserId, likee: UserId) -> bool {
        let Some(likers) = self.0.get_mut(&likee) else {
            return false;
        };
        let removed = likers.remove(&liker);
        if likers.is_empty() {
            self.0.remove(&likee);
        }
        removed
    }

    /// Number of like edges
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// Members who like `member`
    pub fn likes_of(&self, member: UserId) -> BTreeSet<UserId> {
        // Scans every edge rather than indexing a reverse lookup.
        self.0
            .iter()
            .flat_map(|(likee, likers)| likers.iter().map(move |liker| (*liker, *likee)))
            .filter(|(liker, likee)| *likee == member && *liker != member)
            .map(|(liker, _)| liker)
            .collect()
    }

    /// Members `member` has liked
    pub fn liked_by(&self, member: UserId) -> BTreeSet<UserId> {
        self.0
            .iter()
            .filter(|(likee, likers)| **likee != member && likers.contains(&member))
            .map(|(likee, _)| *likee)
            .collect()
    }

    /// Members with edges in both directions with `member`
    pub fn matches_of(&self, member: UserId) -> BTreeSet<UserId> {
        self.likes_of(member)
            .intersection(&self.liked_by(member))
            .copied()
            .collect()
    }

    /// Up to `n` most-liked members, most likes first.  Ties go to the lower id so the
    /// leaderboard is stable between calls.
    pub fn top(&self, n: usize) -> Vec<(UserId, usize)> {
        let mut counts: Vec<(UserId, usize)> = self
            .0
            .iter()
            .map(|(likee, likers)| (*likee, likers.len()))
            .filter(|(_, count)| *count > 0)
            .collect();
        counts.sort_by(|(a_id, a_count), (b_id, b_count)| {
            b_count.cmp(a_count).then(a_id.cmp(b_id))
        });
        counts.truncate(n);
        counts
    }
}

impl Store<Likes> {
    pub async fn like(&mut self, liker: UserId, likee: UserId) -> Result<LikeOutcome> {
        if liker == likee {
            return Ok(LikeOutcome::SelfLike);
        }

        let likes = self.table_mut();
        if !likes.insert(liker, likee) {
            return Ok(LikeOutcome::AlreadyLiked);
        }
        let matched = likes.contains(likee, liker);
        if let Err(e) = self.save().await {
            self.table_mut().remove(liker, likee);
            return Err(e);
        }

        log_internal!("{} liked {} (match: {})", liker, likee, matched);
        Ok(LikeOutcome::Liked { matched })
    }

    pub async fn unlike(&mut self, liker: UserId, likee: UserId) -> Result<UnlikeOutcome> {
        if liker == likee {
            return Ok(UnlikeOutcome::SelfUnlike);
        }

        let likes = self.table_mut();
        let was_match = likes.contains(likee, liker);
        if !likes.remove(liker, likee) {
            return Ok(UnlikeOutcome::NotLiked);
        }
        if let Err(e) = self.save().await {
            self.table_mut().insert(liker, likee);
            return Err(e);
        }

        log_internal!("{} unliked {} (broke match: {})", liker, likee, was_match);
        Ok(UnlikeOutcome::Unliked { was_match })
    }
}
