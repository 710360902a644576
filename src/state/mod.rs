pub mod aggregator;
pub mod connectivity;
pub mod fault_tracker;
pub mod health;
pub mod timers;

pub use aggregator::{Aggregator, Averages};
pub use connectivity::ConnectivityState;
pub use fault_tracker::FaultTracker;
pub use health::{DeviceStatus, HealthEvaluator};
pub use timers::{IntervalTimer, Intervals, Timers};

/// Everything the scheduler mutates, owned in one place
#[derive(Debug)]
pub struct NodeState {
    pub connectivity: ConnectivityState,
    pub faults: FaultTracker,
    pub aggregator: Aggregator,
    pub timers: Timers,
}

impl NodeState {
    pub fn new(faults: FaultTracker, aggregator: Aggregator, intervals: Intervals) -> Self {
        Self {
            connectivity: ConnectivityState::new(),
            faults,
            aggregator,
            timers: Timers::new(intervals),
        }
    }
}
