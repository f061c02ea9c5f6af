//! Live chain feed ingestion with a time-windowed item store
//!
//! A feed pulls events from one upstream (HTTP polling or a WebSocket
//! stream), normalizes and deduplicates them, keeps recent items in a bounded
//! window that expires on a timer, and publishes an aggregate view plus
//! connection health for a presentation layer to render.

pub mod admission;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod normalizer;
pub mod supervisor;
pub mod transport;
pub mod window;

pub use config::{FeedConfig, FeedPreset};
pub use error::{ConfigError, TransportError};
pub use feed::{Feed, FeedEngine, FeedHandle, FeedView, Ingest};
pub use normalizer::{DomainEvent, IdentityKey};
pub use supervisor::{ConnectionState, ConnectionStatus};
pub use window::{TrackedItem, WindowConfig, WindowStore};
