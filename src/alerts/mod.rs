//! Milestone alerts
//!
//! One-shot threshold alerts on follower counts, the engine that fires
//! them and the dispatcher that delivers the resulting notifications.

pub mod attempts;
pub mod config;
pub mod engine;
pub mod notifier;
pub mod store;
pub mod template;

pub use attempts::AttemptLog;
pub use config::{Alert, AlertId, AlertState, UserChannel};
pub use engine::AlertEngine;
pub use notifier::{Delivery, DispatchError, Messenger, NotificationDispatcher, Notifier, NotifierError};
pub use store::{AlertStore, AlertStoreError};
