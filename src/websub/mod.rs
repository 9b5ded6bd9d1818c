//! WebSub subscriber.
//!
//! Discovers hubs for feed topics, manages subscription leases and answers
//! hub callbacks (verification handshakes and content notifications).

pub mod callback;
pub mod discovery;
pub mod manager;
pub mod repository;
pub mod signature;
pub mod types;

pub use callback::{CallbackHandler, CallbackRequest, CallbackResponse};
pub use discovery::{DiscoveredHub, HubDiscoverer, HubSource};
pub use manager::{SubscribeOutcome, SubscriptionManager, UnsubscribeOutcome, TOPIC_PARAM};
pub use repository::{CallbackLogRepository, SubscriptionRepository};
pub use signature::{generate_secret, sign, verify_signature, SignatureAlgorithm, SignatureCheck};
pub use types::{CallbackKind, CallbackLog, HubMode, Subscription, SubscriptionStatus};
