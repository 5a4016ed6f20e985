use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub heartbeat_interval: Duration,
    /// Each node draws its election timeout once from
    /// `election_timeout_min..=election_timeout_max`.
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub election_poll_interval: Duration,
    pub rpc_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(150),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(1200),
            election_poll_interval: Duration::from_millis(30),
            rpc_timeout: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.election_timeout_min <= self.election_timeout_max,
            "election timeout min ({:?}) exceeds max ({:?})",
            self.election_timeout_min,
            self.election_timeout_max
        );
        anyhow::ensure!(
            self.heartbeat_interval < self.election_timeout_min,
            "heartbeat interval ({:?}) must be shorter than the minimum \
             election timeout ({:?})",
            self.heartbeat_interval,
            self.election_timeout_min
        );
        anyhow::ensure!(
            !self.election_poll_interval.is_zero(),
            "election poll interval must be non-zero"
        );
        Ok(())
    }

    pub fn random_election_timeout(&self) -> Duration {
        let min = self.election_timeout_min.as_millis() as u64;
        let max = self.election_timeout_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max.max(min)))
    }
}
