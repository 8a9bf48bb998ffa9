//! `MasterHandle -> SlaveHandle` translation, per slave instance.
//!
//! Promoted from the source's class-level dict (shared across every
//! slave in the process, a bug) to a per-instance, locked map: it is
//! touched by both the slave's worker thread (on replay) and its mount
//! dispatch thread (on slave-side `read`/`release` using `fh`).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct FdMap {
    inner: Mutex<HashMap<i64, i64>>,
}

impl FdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, master_fd: i64, slave_fd: i64) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(master_fd, slave_fd);
    }

    pub fn get(&self, master_fd: i64) -> Option<i64> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&master_fd).copied()
    }

    pub fn remove(&self, master_fd: i64) -> Option<i64> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&master_fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let map = FdMap::new();
        map.insert(10, 99);
        assert_eq!(map.get(10), Some(99));
        assert_eq!(map.remove(10), Some(99));
        assert_eq!(map.get(10), None);
    }
}
