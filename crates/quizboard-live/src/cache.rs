// Process-wide leaderboard store keyed by quiz id.
//
// Each merge replaces the whole board for one quiz and synchronously notifies
// the listeners registered for it. Boards carry a logical version from the
// cache's own clock so that a response computed from older state (a
// cold-start fetch issued before a streamed update) cannot overwrite newer
// data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use quizboard_core::model::{LeaderboardEntry, QuizId};
use tracing::{debug, warn};

/// What a registration listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    Quiz(QuizId),
    All,
}

impl Interest {
    pub fn matches(&self, quiz_id: &QuizId) -> bool {
        match self {
            Interest::Quiz(id) => id == quiz_id,
            Interest::All => true,
        }
    }
}

/// One stored board, as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    pub quiz_id: QuizId,
    /// Server order, never re-sorted.
    pub entries: Vec<LeaderboardEntry>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

pub type Listener = Arc<dyn Fn(&BoardSnapshot) + Send + Sync>;

struct Registration {
    id: u64,
    interest: Interest,
    listener: Listener,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    boards: HashMap<QuizId, BoardSnapshot>,
    registrations: Vec<Registration>,
    next_id: u64,
}

/// Shared leaderboard cache. Create with [`LeaderboardCache::new`] and share
/// as `Arc<LeaderboardCache>`.
#[derive(Default)]
pub struct LeaderboardCache {
    state: Mutex<State>,
    clock: AtomicU64,
    /// Held for the whole replace-and-notify step of a merge.
    dispatch: Mutex<()>,
    /// Thread currently running listeners, if any.
    dispatcher: Mutex<Option<ThreadId>>,
}

impl LeaderboardCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve the next version. Anything stamped later wins over it.
    pub fn stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the board for `quiz_id` and notify its listeners.
    pub fn merge(&self, quiz_id: &QuizId, entries: Vec<LeaderboardEntry>) -> bool {
        let version = self.stamp();
        self.merge_at(quiz_id, entries, version)
    }

    /// Replace the board only if `version` is newer than the stored one.
    /// Returns whether the board was applied.
    pub fn merge_at(&self, quiz_id: &QuizId, entries: Vec<LeaderboardEntry>, version: u64) -> bool {
        if self.is_dispatching_here() {
            warn!(quiz_id = %quiz_id, "re-entrant leaderboard merge from a listener ignored");
            return false;
        }

        let _dispatch = lock(&self.dispatch);

        let (snapshot, listeners) = {
            let mut state = lock(&self.state);
            if let Some(existing) = state.boards.get(quiz_id) {
                if existing.version >= version {
                    debug!(
                        quiz_id = %quiz_id,
                        stored = existing.version,
                        version,
                        "dropping stale leaderboard"
                    );
                    return false;
                }
            }

            let snapshot = BoardSnapshot {
                quiz_id: quiz_id.clone(),
                entries,
                version,
                updated_at: Utc::now(),
            };
            state.boards.insert(quiz_id.clone(), snapshot.clone());

            let listeners: Vec<(Listener, Arc<AtomicBool>)> = state
                .registrations
                .iter()
                .filter(|r| r.interest.matches(quiz_id))
                .map(|r| (Arc::clone(&r.listener), Arc::clone(&r.active)))
                .collect();
            (snapshot, listeners)
        };

        debug!(
            quiz_id = %quiz_id,
            version,
            entries = snapshot.entries.len(),
            listeners = listeners.len(),
            "leaderboard merged"
        );

        let _dispatching = DispatchMark::set(&self.dispatcher);
        for (listener, active) in listeners {
            if active.load(Ordering::Acquire) {
                listener(&snapshot);
            }
        }
        true
    }

    /// Entries for `quiz_id`, empty if nothing is known.
    pub fn snapshot(&self, quiz_id: &QuizId) -> Vec<LeaderboardEntry> {
        lock(&self.state)
            .boards
            .get(quiz_id)
            .map(|b| b.entries.clone())
            .unwrap_or_default()
    }

    /// Stored board with its version, if any.
    pub fn board(&self, quiz_id: &QuizId) -> Option<BoardSnapshot> {
        lock(&self.state).boards.get(quiz_id).cloned()
    }

    pub fn quiz_ids(&self) -> Vec<QuizId> {
        let mut ids: Vec<QuizId> = lock(&self.state).boards.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot_all(&self) -> HashMap<QuizId, Vec<LeaderboardEntry>> {
        lock(&self.state)
            .boards
            .iter()
            .map(|(id, board)| (id.clone(), board.entries.clone()))
            .collect()
    }

    /// Register `listener` for one quiz. It is not called with the current
    /// board; read [`snapshot`](Self::snapshot) for that.
    pub fn subscribe<F>(self: &Arc<Self>, quiz_id: &QuizId, listener: F) -> Subscription
    where
        F: Fn(&BoardSnapshot) + Send + Sync + 'static,
    {
        self.register(Interest::Quiz(quiz_id.clone()), Arc::new(listener))
    }

    /// Register `listener` for every quiz.
    pub fn subscribe_all<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&BoardSnapshot) + Send + Sync + 'static,
    {
        self.register(Interest::All, Arc::new(listener))
    }

    pub(crate) fn register(self: &Arc<Self>, interest: Interest, listener: Listener) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.registrations.push(Registration {
                id,
                interest,
                listener,
                active: Arc::clone(&active),
            });
            id
        };

        Subscription {
            cache: Arc::downgrade(self),
            id,
            active,
        }
    }

    /// Number of live registrations, across all interests.
    pub fn listener_count(&self) -> usize {
        lock(&self.state).registrations.len()
    }

    fn unregister(&self, id: u64, active: &AtomicBool) {
        // Waiting for the dispatch lock guarantees a merge running on another
        // thread has finished with this listener. From inside a listener the
        // lock is already held by this thread, and the flag alone suffices.
        let _dispatch = if self.is_dispatching_here() {
            None
        } else {
            Some(lock(&self.dispatch))
        };
        active.store(false, Ordering::Release);

        // The listener is dropped after the state lock is released; its
        // captures may own other subscriptions.
        let removed = {
            let mut state = lock(&self.state);
            let index = state.registrations.iter().position(|r| r.id == id);
            index.map(|i| state.registrations.remove(i))
        };
        drop(removed);
    }

    fn is_dispatching_here(&self) -> bool {
        *lock(&self.dispatcher) == Some(thread::current().id())
    }
}

/// Records the dispatching thread for the duration of listener calls.
struct DispatchMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> DispatchMark<'a> {
    fn set(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(slot) = Some(thread::current().id());
        Self { slot }
    }
}

impl Drop for DispatchMark<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

/// Unregisters its listener when dropped or cancelled.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cache: Weak<LeaderboardCache>,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.cache.upgrade() {
            Some(cache) => cache.unregister(self.id, &self.active),
            None => self.active.store(false, Ordering::Release),
        }
    }
}

/// Lock ignoring poisoning; a panicking listener must not wedge the cache.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
