// Subscription hub: many logical leaderboard subscriptions, few connections.
//
// Interest is reference counted per `Interest`. The first subscriber for an
// interest opens its stream (the per-quiz endpoint, or the single aggregate
// endpoint for `Interest::All`); the last one to leave closes it. Every
// stream feeds the shared cache, and listeners are cache registrations, so a
// quiz's listeners are notified no matter which stream delivered the update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use quizboard_core::http::{decode, Fetch, Method};
use quizboard_core::model::{LeaderboardEntry, QuizId};
use quizboard_core::protocol::{
    leaderboard_path, quiz_stream_path, AggregateMessage, ALL_LEADERBOARDS_STREAM,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{BoardSnapshot, Interest, LeaderboardCache, Subscription};
use crate::stream::{
    StreamConnection, StreamError, StreamEvent, StreamOptions, StreamStatus, Transport,
};

struct InterestEntry {
    refs: usize,
    generation: u64,
    connection: StreamConnection,
}

struct HubInner {
    cache: Arc<LeaderboardCache>,
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn Fetch>,
    options: StreamOptions,
    interests: Mutex<HashMap<Interest, InterestEntry>>,
    generations: AtomicU64,
}

/// Cheaply cloneable handle; clones share connections and the cache.
///
/// Subscribing must happen inside a tokio runtime, since connections and
/// cold-start fetches run as spawned tasks.
#[derive(Clone)]
pub struct LeaderboardHub {
    inner: Arc<HubInner>,
}

impl LeaderboardHub {
    pub fn new(
        cache: Arc<LeaderboardCache>,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn Fetch>,
        options: StreamOptions,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                cache,
                transport,
                fetcher,
                options,
                interests: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<LeaderboardCache> {
        &self.inner.cache
    }

    /// Listen to one quiz. The first subscriber opens the per-quiz stream and
    /// triggers a cold-start fetch of the current board.
    pub fn subscribe_to_quiz<F>(&self, quiz_id: &QuizId, listener: F) -> HubSubscription
    where
        F: Fn(&BoardSnapshot) + Send + Sync + 'static,
    {
        let cache_sub = self.inner.cache.subscribe(quiz_id, listener);
        let interest = Interest::Quiz(quiz_id.clone());
        let (generation, status, first) = self.inner.acquire(&interest);
        if first {
            self.inner.refresh(quiz_id, interest.clone(), generation);
        }
        self.guard(interest, generation, cache_sub, status)
    }

    /// Listen to every quiz through the aggregate stream.
    pub fn subscribe_to_all<F>(&self, listener: F) -> HubSubscription
    where
        F: Fn(&BoardSnapshot) + Send + Sync + 'static,
    {
        let cache_sub = self.inner.cache.subscribe_all(listener);
        let (generation, status, _) = self.inner.acquire(&Interest::All);
        self.guard(Interest::All, generation, cache_sub, status)
    }

    /// The quiz's leaderboard probably changed server-side (e.g. after a
    /// final score submission). Refetch it if anyone listens to that quiz,
    /// either directly or through the aggregate stream.
    pub fn mark_stale(&self, quiz_id: &QuizId) {
        let listened = {
            let interests = self.inner.lock();
            [Interest::Quiz(quiz_id.clone()), Interest::All]
                .into_iter()
                .find_map(|interest| {
                    let generation = interests.get(&interest)?.generation;
                    Some((interest, generation))
                })
        };
        match listened {
            Some((interest, generation)) => {
                debug!(quiz_id = %quiz_id, ?interest, "leaderboard marked stale, refetching");
                self.inner.refresh(quiz_id, interest, generation);
            }
            None => debug!(quiz_id = %quiz_id, "leaderboard marked stale, nobody listening"),
        }
    }

    /// Number of open stream connections.
    pub fn active_connections(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn subscriber_count(&self, interest: &Interest) -> usize {
        self.inner.lock().get(interest).map_or(0, |e| e.refs)
    }

    pub fn connection_status(&self, interest: &Interest) -> Option<StreamStatus> {
        self.inner
            .lock()
            .get(interest)
            .map(|e| e.connection.status())
    }

    fn guard(
        &self,
        interest: Interest,
        generation: u64,
        cache_sub: Subscription,
        status: watch::Receiver<StreamStatus>,
    ) -> HubSubscription {
        HubSubscription {
            hub: Arc::downgrade(&self.inner),
            interest,
            generation,
            cache_sub: Some(cache_sub),
            status,
        }
    }
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Interest, InterestEntry>> {
        self.interests.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one more subscriber, opening the stream for a new interest.
    /// Returns the interest's generation, its status receiver and whether
    /// this was the first subscriber.
    fn acquire(&self, interest: &Interest) -> (u64, watch::Receiver<StreamStatus>, bool) {
        let mut interests = self.lock();
        if let Some(entry) = interests.get_mut(interest) {
            entry.refs += 1;
            debug!(?interest, refs = entry.refs, "joined existing leaderboard stream");
            return (entry.generation, entry.connection.watch(), false);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = self.open_stream(interest);
        let status = connection.watch();
        info!(?interest, path = connection.path(), "opening leaderboard stream");
        interests.insert(
            interest.clone(),
            InterestEntry {
                refs: 1,
                generation,
                connection,
            },
        );
        (generation, status, true)
    }

    fn release(&self, interest: &Interest, generation: u64) {
        let closing = {
            let mut interests = self.lock();
            let emptied = match interests.get_mut(interest) {
                Some(entry) if entry.generation == generation => {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.refs == 0
                }
                _ => false,
            };
            if emptied {
                interests.remove(interest)
            } else {
                None
            }
        };

        if let Some(entry) = closing {
            info!(?interest, "last subscriber left, closing leaderboard stream");
            entry.connection.close();
        }
    }

    fn is_current(&self, interest: &Interest, generation: u64) -> bool {
        self.lock()
            .get(interest)
            .is_some_and(|e| e.generation == generation)
    }

    fn open_stream(&self, interest: &Interest) -> StreamConnection {
        let transport = Arc::clone(&self.transport);
        let options = self.options.clone();
        let cache = Arc::clone(&self.cache);

        match interest {
            Interest::Quiz(quiz_id) => {
                let quiz_id = quiz_id.clone();
                StreamConnection::open(
                    transport,
                    quiz_stream_path(&quiz_id),
                    options,
                    move |event: StreamEvent<Vec<LeaderboardEntry>>| {
                        if let StreamEvent::Message(entries) = event {
                            cache.merge(&quiz_id, entries);
                        }
                        Ok(())
                    },
                )
            }
            Interest::All => StreamConnection::open(
                transport,
                ALL_LEADERBOARDS_STREAM,
                options,
                move |event: StreamEvent<AggregateMessage>| match event {
                    StreamEvent::Message(AggregateMessage::Update {
                        quiz_id,
                        leaderboard,
                    }) => {
                        cache.merge(&quiz_id, leaderboard);
                        Ok(())
                    }
                    StreamEvent::Message(AggregateMessage::Error { error }) => {
                        warn!(error = %error, "leaderboard stream reported a server error");
                        Err(StreamError::Server(error))
                    }
                    StreamEvent::Error(_) => Ok(()),
                },
            ),
        }
    }

    /// Fetch the quiz's board and merge it under a version reserved now, so
    /// any streamed update that lands first wins. The result is dropped if
    /// `interest` was released meanwhile.
    fn refresh(self: &Arc<Self>, quiz_id: &QuizId, interest: Interest, generation: u64) {
        let version = self.cache.stamp();
        let hub = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);
        let quiz_id = quiz_id.clone();

        tokio::spawn(async move {
            let path = leaderboard_path(&quiz_id);
            let result = match fetcher.fetch(Method::GET, &path, None).await {
                Ok(value) => decode::<Vec<LeaderboardEntry>>(&path, value),
                Err(e) => Err(e),
            };

            let Some(hub) = hub.upgrade() else {
                return;
            };
            if !hub.is_current(&interest, generation) {
                debug!(quiz_id = %quiz_id, "subscription gone, dropping leaderboard fetch");
                return;
            }

            match result {
                Ok(entries) => {
                    if !hub.cache.merge_at(&quiz_id, entries, version) {
                        debug!(quiz_id = %quiz_id, "fetched leaderboard superseded by stream");
                    }
                }
                Err(e) => warn!(quiz_id = %quiz_id, error = %e, "leaderboard fetch failed"),
            }
        });
    }
}

/// Keeps one hub subscription alive. Dropping it stops listener calls
/// immediately and releases the interest.
#[must_use = "dropping a HubSubscription unsubscribes immediately"]
pub struct HubSubscription {
    hub: Weak<HubInner>,
    interest: Interest,
    generation: u64,
    cache_sub: Option<Subscription>,
    status: watch::Receiver<StreamStatus>,
}

impl HubSubscription {
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Current health of the underlying connection.
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// Receiver for awaiting connection-state changes.
    pub fn status_watch(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        // Stop delivery first, then give up the connection.
        drop(self.cache_sub.take());
        if let Some(hub) = self.hub.upgrade() {
            hub.release(&self.interest, self.generation);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ConnectionState, Frame, FrameStream, TransportError};
    use async_trait::async_trait;
    use futures_util::stream;
    use futures_util::StreamExt;
    use quizboard_core::http::HttpError;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    type FrameSender = mpsc::UnboundedSender<Result<Frame, TransportError>>;

    /// Transport whose connections are fed by the test through channels.
    #[derive(Default)]
    struct ChannelTransport {
        opened: Mutex<Vec<(String, FrameSender)>>,
    }

    impl ChannelTransport {
        fn opens(&self, path: &str) -> usize {
            self.opened.lock().unwrap().iter().filter(|(p, _)| p == path).count()
        }

        /// Sender of the most recent connection to `path`.
        fn sender(&self, path: &str) -> FrameSender {
            self.opened
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(p, _)| p == path)
                .map(|(_, tx)| tx.clone())
                .unwrap()
        }

        fn push(&self, path: &str, data: Value) {
            self.sender(path)
                .send(Ok(Frame::Message(data.to_string())))
                .unwrap();
        }
    }

    impl Transport for ChannelTransport {
        fn open(&self, path: &str) -> FrameStream {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(Ok(Frame::Open));
            self.opened.lock().unwrap().push((path.to_string(), tx));
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
                .boxed()
        }
    }

    /// Fetch double answering from a path map, optionally held at a gate.
    #[derive(Default)]
    struct FakeFetch {
        responses: Mutex<HashMap<String, Value>>,
        calls: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeFetch {
        fn respond(&self, path: &str, value: Value) {
            self.responses.lock().unwrap().insert(path.to_string(), value);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn fetch(
            &self,
            _method: Method,
            path: &str,
            _body: Option<Value>,
        ) -> Result<Value, HttpError> {
            self.calls.lock().unwrap().push(path.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let response = self.responses.lock().unwrap().get(path).cloned();
            response.ok_or_else(|| HttpError::Status {
                path: path.to_string(),
                status: 404,
                body: String::new(),
            })
        }
    }

    fn hub_with(fetch: Arc<FakeFetch>) -> (LeaderboardHub, Arc<ChannelTransport>) {
        let transport = Arc::new(ChannelTransport::default());
        let hub = LeaderboardHub::new(
            LeaderboardCache::new(),
            transport.clone(),
            fetch,
            StreamOptions {
                backoff_base: Duration::from_millis(10),
                backoff_max: Duration::from_millis(50),
                jitter: 0.0,
                idle_timeout: None,
            },
        );
        (hub, transport)
    }

    fn forwarding() -> (
        impl Fn(&BoardSnapshot) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<BoardSnapshot>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |board: &BoardSnapshot| {
            let _ = tx.send(board.clone());
        };
        (listener, rx)
    }

    fn entry(user: &str, score: u32) -> LeaderboardEntry {
        LeaderboardEntry::new(user, score)
    }

    const Q1_STREAM: &str = "/quiz-sessions/leaderboard/q1/stream";

    #[tokio::test]
    async fn per_quiz_stream_updates_cache_and_listener() {
        let fetch = Arc::new(FakeFetch::default());
        fetch.respond("/leaderboards/q1", json!([]));
        let (hub, transport) = hub_with(fetch);
        let q1 = QuizId::new("q1");

        let (listener, mut rx) = forwarding();
        let _sub = hub.subscribe_to_quiz(&q1, listener);

        // Cold start of the empty board.
        assert!(rx.recv().await.unwrap().entries.is_empty());

        transport.push(Q1_STREAM, json!([{"user_id": "u1", "score": 5.0}]));
        transport.push(
            Q1_STREAM,
            json!([{"user_id": "u1", "score": 5.0}, {"user_id": "u2", "score": 3.0}]),
        );
        assert_eq!(rx.recv().await.unwrap().entries, vec![entry("u1", 5)]);
        assert_eq!(
            rx.recv().await.unwrap().entries,
            vec![entry("u1", 5), entry("u2", 3)]
        );
        assert_eq!(hub.cache().snapshot(&q1), vec![entry("u1", 5), entry("u2", 3)]);
    }

    #[tokio::test]
    async fn interest_is_shared_and_released() {
        let fetch = Arc::new(FakeFetch::default());
        let (hub, transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");
        let interest = Interest::Quiz(q1.clone());

        let a = hub.subscribe_to_quiz(&q1, |_| {});
        let b = hub.subscribe_to_quiz(&q1, |_| {});
        tokio::task::yield_now().await;

        assert_eq!(hub.active_connections(), 1);
        assert_eq!(hub.subscriber_count(&interest), 2);
        assert_eq!(transport.opens(Q1_STREAM), 1);
        assert_eq!(fetch.calls(), vec!["/leaderboards/q1".to_string()]);

        drop(a);
        assert_eq!(hub.active_connections(), 1);
        let tx = transport.sender(Q1_STREAM);
        b.cancel();
        assert_eq!(hub.active_connections(), 0);
        assert_eq!(hub.subscriber_count(&interest), 0);

        // The aborted task drops its frame stream.
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .unwrap();

        let _again = hub.subscribe_to_quiz(&q1, |_| {});
        tokio::task::yield_now().await;
        assert_eq!(hub.active_connections(), 1);
        assert_eq!(transport.opens(Q1_STREAM), 2);
    }

    #[tokio::test]
    async fn dropped_subscriber_hears_nothing_while_stream_stays_open() {
        use std::sync::atomic::AtomicUsize;

        let fetch = Arc::new(FakeFetch::default());
        let (hub, transport) = hub_with(fetch);
        let q1 = QuizId::new("q1");

        let heard = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&heard);
        let a = hub.subscribe_to_quiz(&q1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (listener, mut rx) = forwarding();
        let _b = hub.subscribe_to_quiz(&q1, listener);
        tokio::task::yield_now().await;

        transport.push(Q1_STREAM, json!([{"user_id": "u1", "score": 1}]));
        rx.recv().await.unwrap();
        assert_eq!(heard.load(Ordering::SeqCst), 1);

        drop(a);
        transport.push(Q1_STREAM, json!([{"user_id": "u1", "score": 2}]));
        assert_eq!(rx.recv().await.unwrap().entries, vec![entry("u1", 2)]);
        assert_eq!(heard.load(Ordering::SeqCst), 1);
        assert_eq!(hub.active_connections(), 1);
    }

    #[tokio::test]
    async fn aggregate_stream_feeds_per_quiz_listeners() {
        let fetch = Arc::new(FakeFetch::default());
        fetch.respond("/leaderboards/q2", json!([]));
        let (hub, transport) = hub_with(fetch);
        let q2 = QuizId::new("q2");

        let (all, mut all_rx) = forwarding();
        let _all = hub.subscribe_to_all(all);
        let (one, mut one_rx) = forwarding();
        let _one = hub.subscribe_to_quiz(&q2, one);
        assert_eq!(hub.active_connections(), 2);

        // Drain the cold start on both listeners.
        assert_eq!(one_rx.recv().await.unwrap().quiz_id, q2);
        assert_eq!(all_rx.recv().await.unwrap().quiz_id, q2);

        transport.push(
            ALL_LEADERBOARDS_STREAM,
            json!({"quiz_id": "q2", "leaderboard": [{"user_id": "u9", "score": 4}]}),
        );
        assert_eq!(all_rx.recv().await.unwrap().entries, vec![entry("u9", 4)]);
        assert_eq!(one_rx.recv().await.unwrap().entries, vec![entry("u9", 4)]);
    }

    #[tokio::test]
    async fn aggregate_error_is_reported_not_merged() {
        let (hub, transport) = hub_with(Arc::new(FakeFetch::default()));
        let (all, mut rx) = forwarding();
        let sub = hub.subscribe_to_all(all);
        let mut status = sub.status_watch();

        status
            .wait_for(|s| s.state == ConnectionState::Open)
            .await
            .unwrap();
        transport.push(ALL_LEADERBOARDS_STREAM, json!({"error": "redis down"}));
        status
            .wait_for(|s| s.last_error.is_some())
            .await
            .unwrap();
        assert_eq!(
            sub.status().last_error,
            Some(StreamError::Server("redis down".into()))
        );

        transport.push(
            ALL_LEADERBOARDS_STREAM,
            json!({"quiz_id": "q1", "leaderboard": []}),
        );
        assert_eq!(rx.recv().await.unwrap().quiz_id, QuizId::new("q1"));
        assert_eq!(hub.cache().quiz_ids(), vec![QuizId::new("q1")]);
    }

    #[tokio::test]
    async fn late_cold_start_does_not_overwrite_stream_update() {
        let gate = Arc::new(Notify::new());
        let fetch = Arc::new(FakeFetch {
            gate: Some(gate.clone()),
            ..FakeFetch::default()
        });
        fetch.respond("/leaderboards/q1", json!([{"user_id": "old", "score": 1}]));
        let (hub, transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");

        let (listener, mut rx) = forwarding();
        let _sub = hub.subscribe_to_quiz(&q1, listener);
        tokio::task::yield_now().await;

        transport.push(Q1_STREAM, json!([{"user_id": "new", "score": 2}]));
        assert_eq!(rx.recv().await.unwrap().entries, vec![entry("new", 2)]);

        gate.notify_one();
        // Let the fetch task finish.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hub.cache().snapshot(&q1), vec![entry("new", 2)]);
        assert!(rx.try_recv().is_err());
        assert_eq!(fetch.calls().len(), 1);
    }

    #[tokio::test]
    async fn fetch_for_released_interest_is_dropped() {
        let gate = Arc::new(Notify::new());
        let fetch = Arc::new(FakeFetch {
            gate: Some(gate.clone()),
            ..FakeFetch::default()
        });
        fetch.respond("/leaderboards/q1", json!([{"user_id": "u", "score": 1}]));
        let (hub, _transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");

        let sub = hub.subscribe_to_quiz(&q1, |_| {});
        tokio::task::yield_now().await;
        assert_eq!(fetch.calls().len(), 1);
        drop(sub);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.cache().board(&q1).is_none());
    }

    #[tokio::test]
    async fn mark_stale_refetches_only_for_listened_quizzes() {
        let fetch = Arc::new(FakeFetch::default());
        fetch.respond("/leaderboards/q1", json!([]));
        let (hub, _transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");

        hub.mark_stale(&q1);
        tokio::task::yield_now().await;
        assert!(fetch.calls().is_empty());

        let (listener, mut rx) = forwarding();
        let _sub = hub.subscribe_to_quiz(&q1, listener);
        rx.recv().await.unwrap();

        fetch.respond("/leaderboards/q1", json!([{"user_id": "u1", "score": 3}]));
        hub.mark_stale(&q1);
        assert_eq!(rx.recv().await.unwrap().entries, vec![entry("u1", 3)]);
        assert_eq!(fetch.calls().len(), 2);
    }

    #[tokio::test]
    async fn mark_stale_refetches_for_aggregate_listeners() {
        let fetch = Arc::new(FakeFetch::default());
        fetch.respond("/leaderboards/q1", json!([{"user_id": "u1", "score": 4}]));
        let (hub, _transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");

        let (listener, mut rx) = forwarding();
        let _sub = hub.subscribe_to_all(listener);
        tokio::task::yield_now().await;
        assert!(fetch.calls().is_empty());

        hub.mark_stale(&q1);
        let board = rx.recv().await.unwrap();
        assert_eq!(board.quiz_id, q1);
        assert_eq!(board.entries, vec![entry("u1", 4)]);
        assert_eq!(fetch.calls(), vec!["/leaderboards/q1".to_string()]);
    }

    #[tokio::test]
    async fn mark_stale_after_aggregate_release_drops_fetch() {
        let gate = Arc::new(Notify::new());
        let fetch = Arc::new(FakeFetch {
            gate: Some(gate.clone()),
            ..FakeFetch::default()
        });
        fetch.respond("/leaderboards/q1", json!([{"user_id": "u1", "score": 4}]));
        let (hub, _transport) = hub_with(fetch.clone());
        let q1 = QuizId::new("q1");

        let sub = hub.subscribe_to_all(|_| {});
        hub.mark_stale(&q1);
        tokio::task::yield_now().await;
        assert_eq!(fetch.calls().len(), 1);
        drop(sub);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.cache().board(&q1).is_none());
    }

    #[tokio::test]
    async fn malformed_message_keeps_stream_and_cache() {
        let fetch = Arc::new(FakeFetch::default());
        fetch.respond("/leaderboards/q1", json!([{"user_id": "u1", "score": 1}]));
        let (hub, transport) = hub_with(fetch);
        let q1 = QuizId::new("q1");

        let (listener, mut rx) = forwarding();
        let sub = hub.subscribe_to_quiz(&q1, listener);
        rx.recv().await.unwrap();

        transport
            .sender(Q1_STREAM)
            .send(Ok(Frame::Message("{oops".into())))
            .unwrap();
        transport.push(Q1_STREAM, json!([{"user_id": "u1", "score": 1.5}]));
        transport.push(Q1_STREAM, json!([{"user_id": "u2", "score": 7}]));

        assert_eq!(rx.recv().await.unwrap().entries, vec![entry("u2", 7)]);
        assert_eq!(transport.opens(Q1_STREAM), 1);
        assert_eq!(sub.status().state, ConnectionState::Open);
    }
}
