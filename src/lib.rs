//! Client-side data synchronization for REST collections and records.
//!
//! Bind an [`Engine`] to an endpoint and it keeps a normalized copy of the
//! remote data in sync: GETs are deduplicated, debounced on search, retried
//! with exponential backoff and discarded when stale. Mutations can update the
//! held list optimistically before resyncing with the server.
//!
//! ```no_run
//! use std::sync::Arc;
//! use restsync::{Config, Engine, EngineConfig, HttpTransport, Params};
//!
//! # async fn demo() -> color_eyre::Result<()> {
//! let config = Config::with_base_url("https://admin.example.com/api");
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let engine = Engine::bind("/fixed-assets", EngineConfig::default().with_pagination(true), transport);
//!
//! engine.update_params(Params::new().with("search", "chair"));
//! let mut snapshots = engine.subscribe();
//! while snapshots.changed().await.is_ok() {
//!   println!("{} items", snapshots.borrow().items().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod normalize;
pub mod params;
pub mod state;
pub mod transport;
pub mod triggers;
pub mod url_builder;

pub use config::{Config, EngineConfig};
pub use coordinator::FetchMode;
pub use engine::Engine;
pub use error::SyncError;
pub use mutation::{is_optimistic, MutationOptions, OPTIMISTIC_MARKER};
pub use normalize::{normalize, Envelope, PageMeta};
pub use params::{ParamValue, Params};
pub use state::{MutationLoading, Snapshot, Verb};
pub use transport::{HttpTransport, Method, Response, Transport, TransportError};
pub use triggers::{LifecycleBus, LifecycleEvent};
