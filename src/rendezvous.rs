//! Single-shot producer/consumer handoff, used for read results (the
//! `Rendezvous`) and for mutation-broadcast acknowledgement (the
//! completion signal). Both are the same shape: `Mutex<Option<T>>` guarded
//! by a `Condvar`, replacing the source's fragile two-lock dance outright.

use std::sync::{Condvar, Mutex};

pub struct Rendezvous<T> {
    slot: Mutex<Option<T>>,
    cvar: Condvar,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Rendezvous { slot: Mutex::new(None), cvar: Condvar::new() }
    }

    /// Publishes `value`. Must be called at most once per instance.
    pub fn provide(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(value);
        self.cvar.notify_one();
    }

    /// Blocks until `provide` has been called, then returns the value.
    pub fn get(&self) -> T {
        let guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let mut guard = self
            .cvar
            .wait_while(guard, |slot| slot.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.take().expect("rendezvous woke with an empty slot")
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The barrier half of a mutation broadcast: a `Rendezvous<()>` by another
/// name, kept distinct so call sites read `signal.fire()` / `signal.wait()`
/// rather than `provide(())` / `get()`.
pub type CompletionSignal = Rendezvous<()>;

impl CompletionSignal {
    pub fn fire(&self) {
        self.provide(());
    }

    pub fn wait(&self) {
        self.get();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn get_blocks_until_provide() {
        let rdv = Arc::new(Rendezvous::new());
        let producer = rdv.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.provide(42);
        });
        assert_eq!(rdv.get(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn completion_signal_fire_and_wait() {
        let signal = Arc::new(CompletionSignal::new());
        let s = signal.clone();
        let handle = thread::spawn(move || s.fire());
        signal.wait();
        handle.join().unwrap();
    }
}
