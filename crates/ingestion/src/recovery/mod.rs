pub mod dto;
pub mod ports;
pub mod service;

pub use dto::{Action, RetryRecord};
pub use ports::{RecoveryTarget, apply};
pub use service::{ErrorTag, RecoveryController, classify};
