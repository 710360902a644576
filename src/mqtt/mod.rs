pub mod client;
pub mod discovery;
pub mod resilience;
pub mod transport;

pub use client::MqttTransport;
pub use discovery::{announcements, Announcement, TopicLayout};
pub use resilience::{RetryPolicy, SessionStats};
pub use transport::Transport;
