//! podhub - WebSub subscriber and podcast feed synchronizer.
//!
//! Subscribes to podcast feeds at their WebSub hubs, ingests pushed updates
//! through an authenticated callback endpoint and falls back to periodic
//! pulls for feeds whose pushes stop arriving.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod web;
pub mod websub;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::Database;
pub use engine::Engine;
pub use error::{PodhubError, Result};
pub use feed::{FeedSynchronizer, SyncOutcome};
pub use scheduler::{ReconciliationScheduler, SchedulerHandle, SweepReport};
pub use web::WebServer;
pub use websub::{CallbackHandler, SubscribeOutcome, SubscriptionManager};
