//! Debounced change notifications.
//!
//! Write paths call [`ChangeNotifier::fire`] after commit. A single worker
//! thread waits for the first pending event, lets the coalescing window
//! elapse, then hands every distinct `(kind, external)` pair to the
//! subscribers exactly once. A bulk sync touching thousands of rows
//! therefore produces one "contacts changed" callback per window.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Contacts,
    Timeline,
    MeProfile,
    MeProfilePresenceText,
}

/// One coalesced notification. `external` is true when the change arrived
/// from the server or the native address book rather than a local edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub external: bool,
}

pub type ObserverId = u64;

type Observer = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Pending {
    events: BTreeSet<ChangeEvent>,
    shutdown: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Condvar,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_id: Mutex<ObserverId>,
}

impl Shared {
    /// Callbacks run without any notifier lock held, so they may subscribe
    /// or unsubscribe.
    fn dispatch(&self, events: &BTreeSet<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        log::debug!(
            "Dispatching {} change event(s) to {} observer(s)",
            events.len(),
            observers.len()
        );
        for event in events {
            for observer in &observers {
                observer(*event);
            }
        }
    }

    fn drain(&self, guard: &mut MutexGuard<'_, Pending>) {
        let batch = std::mem::take(&mut guard.events);
        MutexGuard::unlocked(guard, || self.dispatch(&batch));
    }
}

pub struct ChangeNotifier {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeNotifier {
    /// Spawn the worker thread with the given coalescing window.
    pub fn new(interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wake: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("peoplesync-notify".into())
            .spawn(move || run_worker(&worker_shared, interval));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn notifier thread, events flush on demand only: {}", e);
                None
            }
        };

        Self { shared, worker }
    }

    /// Record a change. Duplicates within the window collapse into one.
    pub fn fire(&self, kind: ChangeKind, external: bool) {
        let mut pending = self.shared.pending.lock();
        if pending.events.insert(ChangeEvent { kind, external }) {
            self.shared.wake.notify_one();
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.shared.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.shared.observers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Dispatch everything pending now instead of waiting for the window.
    pub fn flush(&self) {
        let mut pending = self.shared.pending.lock();
        self.shared.drain(&mut pending);
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().events.len()
    }
}

fn run_worker(shared: &Shared, interval: Duration) {
    let mut pending = shared.pending.lock();
    loop {
        while pending.events.is_empty() && !pending.shutdown {
            shared.wake.wait(&mut pending);
        }
        if pending.shutdown {
            shared.drain(&mut pending);
            break;
        }

        let deadline = Instant::now() + interval;
        while !pending.shutdown {
            if shared.wake.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        shared.drain(&mut pending);
    }
    log::debug!("Notifier worker stopped");
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        {
            let mut pending = self.shared.pending.lock();
            pending.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Notifier worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recording(notifier: &ChangeNotifier) -> (ObserverId, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = notifier.subscribe(move |event| {
            let _ = tx.lock().send(event);
        });
        (id, rx)
    }

    #[test]
    fn test_burst_is_coalesced_into_one_callback() {
        let notifier = ChangeNotifier::new(Duration::from_millis(50));
        let (_, rx) = recording(&notifier);

        for _ in 0..1000 {
            notifier.fire(ChangeKind::Contacts, true);
        }

        let event = rx.recv_timeout(Duration::from_secs(5)).expect("event");
        assert_eq!(
            event,
            ChangeEvent {
                kind: ChangeKind::Contacts,
                external: true
            }
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_distinct_pairs_are_each_delivered() {
        let notifier = ChangeNotifier::new(Duration::from_secs(60));
        let (_, rx) = recording(&notifier);

        notifier.fire(ChangeKind::Timeline, false);
        notifier.fire(ChangeKind::Contacts, false);
        notifier.fire(ChangeKind::Contacts, true);
        notifier.fire(ChangeKind::Contacts, false);
        assert_eq!(notifier.pending_count(), 3);

        notifier.flush();
        let got: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                ChangeEvent { kind: ChangeKind::Contacts, external: false },
                ChangeEvent { kind: ChangeKind::Contacts, external: true },
                ChangeEvent { kind: ChangeKind::Timeline, external: false },
            ]
        );
        assert_eq!(notifier.pending_count(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::new(Duration::from_secs(60));
        let (id, rx) = recording(&notifier);
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));

        notifier.fire(ChangeKind::MeProfile, false);
        notifier.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_delivers_pending_and_joins() {
        let notifier = ChangeNotifier::new(Duration::from_secs(60));
        let (_, rx) = recording(&notifier);
        notifier.fire(ChangeKind::MeProfilePresenceText, false);
        drop(notifier);
        assert_eq!(
            rx.try_recv().expect("delivered on shutdown").kind,
            ChangeKind::MeProfilePresenceText
        );
    }
}
