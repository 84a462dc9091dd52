// ecosync-api: Async Rust client for the ecosync backend (REST + live feeds)

pub mod backoff;
pub mod client;
pub mod error;
pub mod feed;
pub mod transport;

pub use client::{ApiClient, IDEMPOTENCY_HEADER, SubmitResponse, Upload};
pub use error::Error;
pub use feed::{
    Document, FeedClient, FeedEvent, FeedQuery, FieldFilter, FilterOp, OrderBy, ReconnectConfig,
};
pub use transport::{TlsMode, TransportConfig};
