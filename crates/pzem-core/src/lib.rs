pub mod config;
pub mod driver;
pub mod link;
pub mod report;
pub mod sample;
pub mod scheduler;
pub mod stats;

#[cfg(test)]
mod driver_tests;
#[cfg(test)]
mod report_tests;

pub use config::SchedulerConfig;
pub use driver::{AdapterInfo, DiscoveryError, Pzem004t};
pub use link::{
    BrokerSession, ConnectFailure, ConnectionManager, ConnectionState, LinkError, LinkStatus,
    PublishError, TransportLink,
};
pub use report::{Announcement, EncodedReport, ReducedReport, Report};
pub use sample::{Reading, Sample, SampleError, SampleSource};
pub use scheduler::{Clock, Iteration, LoopCounters, MonotonicClock, PublishOutcome, Scheduler};
pub use stats::{AggregationWindow, Quantity};
