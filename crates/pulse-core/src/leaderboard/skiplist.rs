//! Indexed skip list ordered by (score desc, user id asc)
//!
//! Nodes live in an arena (`Vec<Node>` plus a free list) and every link
//! is an arena handle, so the forward-only tower structure needs no
//! reference counting and erasure is a plain splice. A side map from
//! user id to handle gives O(1) point lookup next to the O(log n)
//! ordered operations.

use std::collections::HashMap;

use rand::random;

use crate::error::Error;

const MAX_SUPPORTED_LEVELS: usize = 32;

#[derive(Debug)]
pub struct Node {
    user_id: String,
    score: f64,
    last_update: i64,
    forward: Vec<Option<usize>>,
}

impl Node {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }
}

pub struct SkipList {
    max_levels: usize,
    probability: f64,
    current_level: usize,
    /// Header tower: entry per level, `None` marks end of chain.
    head: Vec<Option<usize>>,
    arena: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    len: usize,
}

impl SkipList {
    pub fn new(max_levels: usize, probability: f64) -> Result<Self, Error> {
        if max_levels == 0 || max_levels > MAX_SUPPORTED_LEVELS {
            return Err(Error::InvalidConfig(
                "skip list max_levels out of supported range",
            ));
        }
        if probability <= 0.0 || probability >= 1.0 {
            return Err(Error::InvalidConfig(
                "skip list probability must be in (0, 1)",
            ));
        }
        Ok(Self {
            max_levels,
            probability,
            current_level: 1,
            head: vec![None; max_levels],
            arena: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace the row for `user_id`. Replacement re-draws the
    /// tower height, so an upsert is erase-then-insert.
    pub fn upsert(&mut self, user_id: &str, score: f64, timestamp: i64) {
        self.erase(user_id);

        let node_level = self.random_level();
        let mut update = vec![None::<usize>; self.max_levels];
        let mut current: Option<usize> = None;
        for level in (0..self.current_level).rev() {
            while let Some(next) = self.next_of(current, level) {
                if self.comes_before(next, score, user_id) {
                    current = Some(next);
                } else {
                    break;
                }
            }
            update[level] = current;
        }

        // Levels above the old top splice directly off the header,
        // which `update` already encodes as None.
        if node_level > self.current_level {
            self.current_level = node_level;
        }

        let node = Node {
            user_id: user_id.to_owned(),
            score,
            last_update: timestamp,
            forward: vec![None; node_level],
        };
        let handle = match self.free.pop() {
            Some(h) => {
                self.arena[h] = node;
                h
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        };

        for level in 0..node_level {
            let next = self.next_of(update[level], level);
            self.arena[handle].forward[level] = next;
            match update[level] {
                None => self.head[level] = Some(handle),
                Some(prev) => self.arena[prev].forward[level] = Some(handle),
            }
        }

        self.index.insert(user_id.to_owned(), handle);
        self.len += 1;
    }

    pub fn erase(&mut self, user_id: &str) -> bool {
        let Some(&target) = self.index.get(user_id) else {
            return false;
        };
        let score = self.arena[target].score;

        let mut current: Option<usize> = None;
        for level in (0..self.current_level).rev() {
            while let Some(next) = self.next_of(current, level) {
                if next != target && self.comes_before(next, score, user_id) {
                    current = Some(next);
                } else {
                    break;
                }
            }
            if self.next_of(current, level) == Some(target) {
                let after = self.arena[target].forward[level];
                match current {
                    None => self.head[level] = after,
                    Some(prev) => self.arena[prev].forward[level] = after,
                }
            }
        }

        while self.current_level > 1 && self.head[self.current_level - 1].is_none() {
            self.current_level -= 1;
        }

        self.index.remove(user_id);
        self.release(target);
        self.len -= 1;
        true
    }

    pub fn find(&self, user_id: &str) -> Option<&Node> {
        self.index.get(user_id).map(|&h| &self.arena[h])
    }

    /// 1-based position of `user_id` in score order, `None` if absent.
    /// Linear on level 0; callers rank a single user at a time.
    pub fn rank_of(&self, user_id: &str) -> Option<usize> {
        let mut rank = 1;
        let mut current = self.head[0];
        while let Some(h) = current {
            if self.arena[h].user_id == user_id {
                return Some(rank);
            }
            rank += 1;
            current = self.arena[h].forward[0];
        }
        None
    }

    pub fn top_k(&self, k: usize) -> Vec<&Node> {
        let mut out = Vec::with_capacity(k.min(self.len));
        let mut current = self.head[0];
        while let Some(h) = current {
            if out.len() == k {
                break;
            }
            out.push(&self.arena[h]);
            current = self.arena[h].forward[0];
        }
        out
    }

    /// The lowest-ranked node: lowest score, ties broken by the
    /// lexicographically greatest user id.
    pub fn tail(&self) -> Option<&Node> {
        let mut current = self.head[0]?;
        while let Some(next) = self.arena[current].forward[0] {
            current = next;
        }
        Some(&self.arena[current])
    }

    pub fn for_each(&self, mut f: impl FnMut(&Node)) {
        let mut current = self.head[0];
        while let Some(h) = current {
            f(&self.arena[h]);
            current = self.arena[h].forward[0];
        }
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.free.clear();
        self.index.clear();
        self.head.iter_mut().for_each(|slot| *slot = None);
        self.current_level = 1;
        self.len = 0;
    }

    fn release(&mut self, handle: usize) {
        // Handles are recycled; drop the payload now so a stale slot
        // never pins user data.
        self.arena[handle].user_id = String::new();
        self.arena[handle].forward.clear();
        self.free.push(handle);
    }

    fn next_of(&self, from: Option<usize>, level: usize) -> Option<usize> {
        match from {
            None => self.head[level],
            Some(h) => self.arena[h].forward[level],
        }
    }

    fn comes_before(&self, handle: usize, score: f64, user_id: &str) -> bool {
        let node = &self.arena[handle];
        if node.score > score {
            return true;
        }
        if node.score < score {
            return false;
        }
        node.user_id.as_str() < user_id
    }

    fn random_level(&self) -> usize {
        let mut level = 1;
        while level < self.max_levels && random::<f64>() < self.probability {
            level += 1;
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SkipList {
        let mut list = SkipList::new(16, 0.5).unwrap();
        list.upsert("alice", 50.0, 1);
        list.upsert("bob", 75.0, 1);
        list.upsert("carol", 30.0, 1);
        list
    }

    #[test]
    fn test_validates_parameters() {
        assert!(SkipList::new(0, 0.5).is_err());
        assert!(SkipList::new(33, 0.5).is_err());
        assert!(SkipList::new(16, 0.0).is_err());
        assert!(SkipList::new(16, 1.0).is_err());
        assert!(SkipList::new(1, 0.25).is_ok());
    }

    #[test]
    fn test_score_descending_order() {
        let list = sample();
        let ids: Vec<&str> = list.top_k(10).iter().map(|n| n.user_id()).collect();
        assert_eq!(ids, ["bob", "alice", "carol"]);
    }

    #[test]
    fn test_tie_breaks_on_user_id() {
        let mut list = SkipList::new(16, 0.5).unwrap();
        list.upsert("zoe", 10.0, 1);
        list.upsert("amy", 10.0, 1);
        list.upsert("mel", 10.0, 1);
        let ids: Vec<&str> = list.top_k(3).iter().map(|n| n.user_id()).collect();
        assert_eq!(ids, ["amy", "mel", "zoe"]);
        assert_eq!(list.tail().unwrap().user_id(), "zoe");
    }

    #[test]
    fn test_upsert_replaces() {
        let mut list = sample();
        list.upsert("carol", 100.0, 2);
        assert_eq!(list.len(), 3);
        assert_eq!(list.top_k(1)[0].user_id(), "carol");
        let carol = list.find("carol").unwrap();
        assert_eq!(carol.score(), 100.0);
        assert_eq!(carol.last_update(), 2);
    }

    #[test]
    fn test_erase() {
        let mut list = sample();
        assert!(list.erase("alice"));
        assert!(!list.erase("alice"));
        assert_eq!(list.len(), 2);
        assert!(list.find("alice").is_none());
        assert_eq!(list.rank_of("alice"), None);
        let ids: Vec<&str> = list.top_k(10).iter().map(|n| n.user_id()).collect();
        assert_eq!(ids, ["bob", "carol"]);
    }

    #[test]
    fn test_rank() {
        let list = sample();
        assert_eq!(list.rank_of("bob"), Some(1));
        assert_eq!(list.rank_of("alice"), Some(2));
        assert_eq!(list.rank_of("carol"), Some(3));
        assert_eq!(list.rank_of("nobody"), None);
    }

    #[test]
    fn test_clear() {
        let mut list = sample();
        list.clear();
        assert!(list.is_empty());
        assert!(list.tail().is_none());
        list.upsert("dora", 1.0, 1);
        assert_eq!(list.rank_of("dora"), Some(1));
    }

    #[test]
    fn test_order_invariant_under_churn() {
        let mut list = SkipList::new(16, 0.5).unwrap();
        for i in 0..500 {
            let score = ((i * 7919) % 257) as f64;
            list.upsert(&format!("user-{:03}", i), score, 1);
        }
        for i in (0..500).step_by(3) {
            list.erase(&format!("user-{:03}", i));
        }
        for i in (0..500).step_by(5) {
            let score = ((i * 104_729) % 101) as f64;
            list.upsert(&format!("user-{:03}", i), score, 2);
        }

        let mut rows: Vec<(String, f64)> = Vec::new();
        list.for_each(|n| rows.push((n.user_id().to_owned(), n.score())));
        assert_eq!(rows.len(), list.len());

        let mut expected = rows.clone();
        expected.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap()
                .then_with(|| a.0.cmp(&b.0))
        });
        assert_eq!(rows, expected);
    }
}
