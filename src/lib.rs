//! Kagami Uploadr Library
//!
//! Upload-and-dispatch front end for a media similarity service.
//!
//! # Features
//!
//! - **Classified Storage**: Uploaded files land in a per-category directory
//!   (images, audio, mapper text, everything else)
//! - **Backend Forwarding**: Any category can be forwarded to a remote
//!   multipart endpoint instead of the local disk
//! - **Prediction Proxy**: Single-file uploads are relayed to the predictor
//!   and its JSON answer is returned unchanged
//! - **Replace Semantics**: Audio uploads can atomically replace the
//!   directory's previous contents
//! - **Listing**: Paginated listing of a category directory
//!
//! # Example
//!
//! ```no_run
//! use kagami_uploadr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod ingest;
pub mod listing;
pub mod metrics;
pub mod predict;
pub mod response;
pub mod router;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use classify::Category;
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
