// Live leaderboard distribution: reconnecting push streams, the shared
// leaderboard cache and the subscription hub that ties them together.

pub mod backoff;
pub mod cache;
pub mod hub;
pub mod sse;
pub mod stream;

pub use cache::{BoardSnapshot, Interest, LeaderboardCache, Subscription};
pub use hub::{HubSubscription, LeaderboardHub};
pub use sse::SseTransport;
pub use stream::{
    ConnectionState, StreamConnection, StreamError, StreamEvent, StreamOptions, StreamStatus,
    Transport, TransportError,
};
