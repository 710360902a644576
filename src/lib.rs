pub mod config;
pub mod connectivity;
pub mod display;
pub mod error;
pub mod link;
pub mod mqtt;
pub mod reclaim;
pub mod scheduler;
pub mod sensors;
pub mod state;

pub use config::Config;
pub use connectivity::{ConnectivityManager, HealthCheck, SessionOutcome};
pub use scheduler::{Scheduler, TickReport};
