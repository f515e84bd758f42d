//! External collaborators: token store, backbone subscription and paging
//! alerts.
//!
//! The broker core never talks to Redis or Pushbullet directly; it sees a
//! [`TokenStore`] trait object and a stream of backbone messages.

pub mod alert;
pub mod backbone;
pub mod token_store;

pub use alert::Alerter;
pub use token_store::{MemoryTokenStore, RedisTokenStore, TokenStore};
