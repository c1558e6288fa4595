pub mod dto;
pub mod ports;
pub mod service;

pub use dto::{ProgressEvent, SessionInfo, SessionMeta};
pub use ports::{ProgressSink, Subscription};
pub use service::ProgressBus;
