//! offline-cache - A cache-first offline agent for a web page.
//!
//! On install the agent pre-caches a fixed list of assets into a named
//! bucket. Afterwards every intercepted request is answered from any bucket
//! that holds a match, falling back to the live network on a miss.
//!
//! # Example
//!
//! ```no_run
//! use offline_cache::{AgentConfig, HttpNetwork, MemoryStorage, NetworkConfig, OfflineCacheAgent, Request};
//!
//! # async fn example() -> offline_cache::Result<()> {
//! let network = HttpNetwork::new(&NetworkConfig::default())?;
//! let agent = OfflineCacheAgent::new(AgentConfig::default(), MemoryStorage::new(), network);
//!
//! // Pre-cache the asset list, then start intercepting.
//! agent.on_install().await?;
//! agent.activate()?;
//!
//! let request = Request::resolve(reqwest::Method::GET, "http://localhost:5000", "/")?;
//! let served = agent.on_fetch(&request).await?;
//! println!("{:?}: {} bytes", served.source, served.response.body.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod agent;
pub mod config;
pub mod error;
pub mod network;
pub mod request;
pub mod stats;
pub mod storage;

// Re-export main types for convenience
pub use agent::{AgentState, FetchResponse, OfflineCacheAgent, ResponseSource};
pub use config::{AgentConfig, AppConfig, NetworkConfig, PathConfig};
pub use error::{Error, Result};
pub use network::{HttpNetwork, Network};
pub use request::{Request, RequestKey, StoredResponse};
pub use stats::FetchStats;
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
