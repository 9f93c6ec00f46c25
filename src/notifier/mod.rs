//! Alert notification
//!
//! `Notifier` applies retry and dry-run on top of a `NotificationTransport`;
//! Telegram is the production transport.

pub mod delivery;
pub mod errors;
pub mod telegram;
pub mod test_utils;
pub mod traits;

pub use delivery::Notifier;
pub use errors::{NotifyError, NotifyResult};
pub use telegram::{TelegramConfig, TelegramTransport};
pub use traits::NotificationTransport;
