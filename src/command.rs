//! The replicated/load-balanced operation set. A closed `enum`, matched
//! exhaustively everywhere it is consumed — a new variant that isn't
//! handled at every match site fails to compile, which is the point
//! (the source relied on runtime type-dispatch instead).

use std::sync::Arc;

use crate::rendezvous::{CompletionSignal, Rendezvous};

/// One logical mutating operation, independent of which slave it will be
/// replayed against.
#[derive(Debug, Clone)]
pub enum MutationKind {
    Mkdir { path: String, mode: u32 },
    Create { path: String, mode: u32, master_fd: i32 },
    Open { path: String, flags: i32, master_fd: i32 },
    Write { path: String, buf: Vec<u8>, offset: i64, master_fd: i32 },
    Truncate { path: String, length: i64, master_fd: Option<i32> },
    Release { path: String, master_fd: i32 },
    Rename { old: String, new: String },
    Rmdir { path: String },
    Unlink { path: String },
    Chmod { path: String, mode: u32 },
}

/// A result of slicing bytes off a slave's backing store.
pub type ReadResult = Result<Vec<u8>, i32>;

/// One slave-targeted copy of a mutation, carrying its own independent
/// completion signal — distinct per slave, never an aliased clone of a
/// shared record (see the "broadcast command aliasing" note).
pub struct Mutation {
    pub kind: MutationKind,
    pub slave_index: usize,
    pub done: Arc<CompletionSignal>,
}

/// A read dispatched to exactly one slave, carrying the rendezvous the
/// master will block on for the result.
pub struct ReadCommand {
    pub path: String,
    pub length: usize,
    pub offset: i64,
    pub master_fd: Option<i32>,
    pub slave_index: usize,
    pub rendezvous: Arc<Rendezvous<ReadResult>>,
}

pub enum Command {
    Mutation(Mutation),
    Read(ReadCommand),
}

/// Builds one independent `Mutation` + completion signal per slave for a
/// broadcast. Each `Mutation` owns its own `MutationKind` clone and its
/// own `Arc<CompletionSignal>`; nothing is shared and mutated in place.
pub fn broadcast(kind: MutationKind, nbr_slaves: usize) -> Vec<(Mutation, Arc<CompletionSignal>)> {
    (0..nbr_slaves)
        .map(|slave_index| {
            let done = Arc::new(CompletionSignal::new());
            (Mutation { kind: kind.clone(), slave_index, done: done.clone() }, done)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_builds_one_independent_copy_per_slave() {
        let kind = MutationKind::Mkdir { path: "/t".into(), mode: 0o755 };
        let copies = broadcast(kind, 3);
        assert_eq!(copies.len(), 3);
        for (i, (mutation, _)) in copies.iter().enumerate() {
            assert_eq!(mutation.slave_index, i);
        }
        // Each copy's signal is a distinct allocation.
        assert!(!Arc::ptr_eq(&copies[0].1, &copies[1].1));
    }
}
