//! Path blacklist state machine.
//!
//! A path that reverts on-chain accumulates a pre-blacklist strike count;
//! once that count reaches `threshold` the path is permanently
//! blacklisted and dropped from the path index. A path that later
//! validates successfully decrements its strike count by one step rather
//! than clearing it outright, so a path that fails occasionally under
//! real conditions is not permanently penalized for a single success.
//!

use crate::types::Path;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blacklist {
    threshold: u32,
    pre_blacklist: HashMap<Path, u32>,
    blacklisted: HashSet<Path>,
}

impl Blacklist {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            pre_blacklist: HashMap::new(),
            blacklisted: HashSet::new(),
        }
    }

    pub fn is_blacklisted(&self, path: &Path) -> bool {
        self.blacklisted.contains(path)
    }

    /// Record an on-chain revert for `path`. Returns `true` if this call
    /// promoted the path to permanently blacklisted.
    pub fn record_failure(&mut self, path: &Path) -> bool {
        if self.blacklisted.contains(path) {
            return false;
        }
        let count = self.pre_blacklist.entry(path.clone()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            self.pre_blacklist.remove(path);
            self.blacklisted.insert(path.clone());
            return true;
        }
        false
    }

    /// Record a successful on-chain validation for `path`, stepping its
    /// strike count down by one. A path with no strikes is unaffected.
    pub fn record_success(&mut self, path: &Path) {
        if let Some(count) = self.pre_blacklist.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.pre_blacklist.remove(path);
            }
        }
    }

    pub fn blacklisted_paths(&self) -> impl Iterator<Item = &Path> {
        self.blacklisted.iter()
    }

    pub fn pre_blacklist_paths(&self) -> &HashMap<Path, u32> {
        &self.pre_blacklist
    }

    /// Rebuild from the two halves persisted separately on disk (the
    /// reference implementation keeps pre-blacklist strikes and permanent
    /// blacklist entries in separate files).
    pub fn from_parts(threshold: u32, pre_blacklist: HashMap<Path, u32>, blacklisted: HashSet<Path>) -> Self {
        Self { threshold, pre_blacklist, blacklisted }
    }

    pub fn into_parts(self) -> (HashMap<Path, u32>, HashSet<Path>) {
        (self.pre_blacklist, self.blacklisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(byte: u8) -> Path {
        let mut a = [0u8; 20];
        a[19] = byte;
        let addr = alloy::primitives::Address::from(a);
        Path::new(vec![addr, addr, addr])
    }

    #[test]
    fn promotes_to_blacklist_at_threshold() {
        let mut bl = Blacklist::new(3);
        let p = path(1);
        assert!(!bl.record_failure(&p));
        assert!(!bl.record_failure(&p));
        assert!(bl.record_failure(&p));
        assert!(bl.is_blacklisted(&p));
        assert!(!bl.pre_blacklist_paths().contains_key(&p));
    }

    #[test]
    fn success_decrements_gradually_not_reset() {
        let mut bl = Blacklist::new(5);
        let p = path(2);
        bl.record_failure(&p);
        bl.record_failure(&p);
        bl.record_failure(&p);
        assert_eq!(*bl.pre_blacklist_paths().get(&p).unwrap(), 3);

        bl.record_success(&p);
        assert_eq!(*bl.pre_blacklist_paths().get(&p).unwrap(), 2);

        bl.record_success(&p);
        bl.record_success(&p);
        assert!(!bl.pre_blacklist_paths().contains_key(&p));
    }

    #[test]
    fn success_on_untracked_path_is_noop() {
        let mut bl = Blacklist::new(3);
        let p = path(3);
        bl.record_success(&p);
        assert!(!bl.pre_blacklist_paths().contains_key(&p));
    }

    #[test]
    fn blacklisted_path_ignores_further_failures() {
        let mut bl = Blacklist::new(1);
        let p = path(4);
        assert!(bl.record_failure(&p));
        assert!(!bl.record_failure(&p));
        assert!(bl.is_blacklisted(&p));
    }
}
