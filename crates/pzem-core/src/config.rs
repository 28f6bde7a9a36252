use std::time::Duration;

pub const REPORT_TOPIC: &str = "energy/pzem/data";
pub const STATUS_TOPIC: &str = "energy/pzem/status";
pub const CLIENT_ID: &str = "PZEM_MONITOR_001";
pub const MAX_REPORT_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sample_interval: Duration,
    pub publish_interval: Duration,
    pub reconnect_interval: Duration,
    pub loop_yield: Duration,
    pub max_report_bytes: usize,
    pub report_topic: String,
    pub status_topic: String,
    pub client_id: String,
}

impl SchedulerConfig {
    /// Whole minutes per window, as advertised in the report.
    pub fn interval_minutes(&self) -> u64 {
        self.publish_interval.as_secs() / 60
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            publish_interval: Duration::from_secs(300),
            reconnect_interval: Duration::from_secs(5),
            loop_yield: Duration::from_millis(10),
            max_report_bytes: MAX_REPORT_BYTES,
            report_topic: REPORT_TOPIC.to_string(),
            status_topic: STATUS_TOPIC.to_string(),
            client_id: CLIENT_ID.to_string(),
        }
    }
}
