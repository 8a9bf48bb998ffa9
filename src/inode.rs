//! Deterministic `VirtualPath <-> ino` translation.
//!
//! `fuser` addresses everything by inode number; the replication core
//! speaks entirely in paths. Rather than keep a counter-assigned
//! bidirectional map (which needs careful bookkeeping on every create and
//! every lookup miss), the inode for a path is derived by hashing it, and
//! only the reverse direction (`ino -> path`) is cached, lazily, the first
//! time a path is observed.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

pub type VirtualPath = String;

pub const ROOT_INO: u64 = 1;

fn hash_path(path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let h = hasher.finish();
    // ino 0 and 1 are reserved (FUSE treats 1 as root); never derive either.
    if h <= ROOT_INO { h.wrapping_add(2) } else { h }
}

pub struct InodeTable {
    by_ino: Mutex<HashMap<u64, VirtualPath>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        by_ino.insert(ROOT_INO, "/".to_string());
        InodeTable { by_ino: Mutex::new(by_ino) }
    }

    /// Computes (and caches) the `ino` for `path`, inserting it into the
    /// reverse map so a later call addressed only by `ino` resolves back.
    pub fn remember(&self, path: &str) -> u64 {
        if path == "/" {
            return ROOT_INO;
        }
        let ino = hash_path(path);
        let mut map = self.by_ino.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(ino, path.to_string());
        ino
    }

    /// Looks up the path previously `remember`ed for `ino`.
    pub fn lookup(&self, ino: u64) -> Option<VirtualPath> {
        if ino == ROOT_INO {
            return Some("/".to_string());
        }
        let map = self.by_ino.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&ino).cloned()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_one() {
        let table = InodeTable::new();
        assert_eq!(table.lookup(ROOT_INO).as_deref(), Some("/"));
        assert_eq!(table.remember("/"), ROOT_INO);
    }

    #[test]
    fn remember_then_lookup_round_trips() {
        let table = InodeTable::new();
        let ino = table.remember("/foo/bar");
        assert_ne!(ino, ROOT_INO);
        assert_eq!(table.lookup(ino).as_deref(), Some("/foo/bar"));
    }

    #[test]
    fn same_path_yields_same_ino() {
        let table = InodeTable::new();
        let a = table.remember("/same");
        let b = table.remember("/same");
        assert_eq!(a, b);
    }
}
