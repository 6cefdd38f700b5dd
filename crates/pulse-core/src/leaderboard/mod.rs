//! Decay-aware leaderboard
//!
//! Per-user scores attenuate exponentially per day, but decay is lazy:
//! `update_user` only re-decays the touched user, and the table-wide
//! refresh runs on the read paths (`get_top_users`, `get_user_rank`)
//! just before answering. All operations serialize on one mutex; the
//! skip list underneath is single-writer by construction.

pub mod decay;
pub mod skiplist;
pub mod snapshot;

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use decay::TimeDecay;
use skiplist::SkipList;
use snapshot::{Snapshot, SnapshotEntry};

/// Injectable clock returning seconds since the Unix epoch.
pub type TimeSource = Box<dyn Fn() -> i64 + Send>;

const SCORE_EPSILON: f64 = 1e-6;

fn default_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RankEntry {
    pub user_id: String,
    pub score: f64,
    pub rank: usize,
    pub last_update: i64,
}

struct BoardState {
    list: SkipList,
    decay: TimeDecay,
    max_users: usize,
    clock: TimeSource,
}

pub struct Leaderboard {
    state: Mutex<BoardState>,
}

impl Leaderboard {
    /// `max_users == 0` disables eviction; the table then grows without
    /// bound and operators should watch `size()`.
    pub fn new(decay_factor: f64, max_users: usize) -> Result<Self, Error> {
        Ok(Self {
            state: Mutex::new(BoardState {
                list: SkipList::new(16, 0.5)?,
                decay: TimeDecay::new(decay_factor)?,
                max_users,
                clock: Box::new(default_now_secs),
            }),
        })
    }

    pub fn set_time_source<F>(&self, clock: F)
    where
        F: Fn() -> i64 + Send + 'static,
    {
        self.state.lock().unwrap().clock = Box::new(clock);
    }

    /// Add `points` to a user's decayed score. `timestamp <= 0` means
    /// "now" per the injected clock. Zero points for an unknown user is
    /// a no-op so queries never materialize empty rows.
    pub fn update_user(&self, user_id: &str, points: f64, timestamp: i64) {
        let mut state = self.state.lock().unwrap();
        let now = if timestamp > 0 {
            timestamp
        } else {
            (state.clock)()
        };

        if points == 0.0 && state.list.find(user_id).is_none() {
            return;
        }

        let new_score = match state.list.find(user_id) {
            Some(node) => state.decay.apply(node.score(), node.last_update(), now) + points,
            None => points,
        };

        state.list.upsert(user_id, new_score, now);

        if state.max_users > 0 && state.list.len() > state.max_users {
            let evict = state.list.tail().and_then(|tail| {
                if tail.user_id() != user_id || state.list.len() > state.max_users {
                    Some(tail.user_id().to_owned())
                } else {
                    None
                }
            });
            if let Some(id) = evict {
                state.list.erase(&id);
            }
        }
    }

    /// Top `k` users after a full lazy-decay refresh, annotated with
    /// 1-based ranks.
    pub fn get_top_users(&self, k: usize) -> Vec<RankEntry> {
        let mut state = self.state.lock().unwrap();
        let now = (state.clock)();
        refresh_scores_locked(&mut state, now);

        state
            .list
            .top_k(k)
            .into_iter()
            .enumerate()
            .map(|(i, node)| RankEntry {
                user_id: node.user_id().to_owned(),
                score: node.score(),
                rank: i + 1,
                last_update: node.last_update(),
            })
            .collect()
    }

    pub fn get_user_rank(&self, user_id: &str) -> Option<RankEntry> {
        let mut state = self.state.lock().unwrap();
        let now = (state.clock)();
        refresh_scores_locked(&mut state, now);

        let node = state.list.find(user_id)?;
        let rank = state.list.rank_of(user_id)?;
        Some(RankEntry {
            user_id: node.user_id().to_owned(),
            score: node.score(),
            rank,
            last_update: node.last_update(),
        })
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().list.len()
    }

    pub fn save_to_json(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        let mut entries = Vec::with_capacity(state.list.len());
        state.list.for_each(|node| {
            entries.push(SnapshotEntry {
                user_id: node.user_id().to_owned(),
                score: node.score(),
                last_update: node.last_update(),
            });
        });
        let count = entries.len();
        snapshot::write(
            path.as_ref(),
            &Snapshot {
                decay_factor: state.decay.factor(),
                max_users: state.max_users as u64,
                entries,
            },
        )?;
        info!(path = %path.as_ref().display(), entries = count, "saved leaderboard snapshot");
        Ok(())
    }

    /// Replace the whole board with the snapshot's contents. Stored
    /// `last_update` timestamps are preserved, so decay resumes from
    /// snapshot time rather than load time.
    pub fn load_from_json(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let loaded = snapshot::read(path.as_ref())?;

        let mut state = self.state.lock().unwrap();
        if let Some(factor) = loaded.decay_factor {
            state.decay = TimeDecay::new(factor)?;
        }
        if let Some(max_users) = loaded.max_users {
            state.max_users = max_users as usize;
        }

        state.list.clear();
        let count = loaded.entries.len();
        for entry in loaded.entries {
            state
                .list
                .upsert(&entry.user_id, entry.score, entry.last_update);
        }
        info!(path = %path.as_ref().display(), entries = count, "loaded leaderboard snapshot");
        Ok(())
    }
}

impl Default for Leaderboard {
    fn default() -> Self {
        Self::new(0.95, 100_000).expect("default leaderboard parameters are valid")
    }
}

/// Decay every row to `now`, then re-thread the changed ones. The list
/// cannot be mutated mid-traversal (upsert re-links towers), so changes
/// are collected first and applied after.
fn refresh_scores_locked(state: &mut BoardState, now: i64) {
    let mut updates = Vec::new();
    let decay = state.decay;
    state.list.for_each(|node| {
        let decayed = decay.apply(node.score(), node.last_update(), now);
        if (decayed - node.score()).abs() > SCORE_EPSILON || node.last_update() != now {
            updates.push((node.user_id().to_owned(), decayed));
        }
    });
    for (user_id, score) in updates {
        state.list.upsert(&user_id, score, now);
    }
}
