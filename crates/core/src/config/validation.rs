use super::types::SchedulerConfig;
use crate::channel::MAX_CHANNEL_CAPACITY;
use crate::error::ConfigError;

impl SchedulerConfig {
    /// Validate ranges that would otherwise surface as setup failures.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_policy()?;
        self.validate_channel()?;
        self.validate_coordinator()?;
        Ok(())
    }

    fn validate_policy(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        if p.slice_ns == 0 {
            return Err(ConfigError::Invalid("policy.slice_ns must be positive".into()));
        }
        if p.vtime_scale == 0 {
            return Err(ConfigError::Invalid("policy.vtime_scale must be positive".into()));
        }
        if p.drain_batch == 0 || p.run_drain_batch == 0 {
            return Err(ConfigError::Invalid(
                "policy.drain_batch and policy.run_drain_batch must be positive".into(),
            ));
        }
        if p.max_tracked == 0 {
            return Err(ConfigError::Invalid("policy.max_tracked must be positive".into()));
        }
        if p.registry_shards == 0 || !p.registry_shards.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "policy.registry_shards must be a power of two, got {}",
                p.registry_shards
            )));
        }
        Ok(())
    }

    fn validate_channel(&self) -> Result<(), ConfigError> {
        let capacity = self.channel.capacity;
        if capacity == 0 || capacity > MAX_CHANNEL_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "channel.capacity must be in 1..={MAX_CHANNEL_CAPACITY}, got {capacity}"
            )));
        }
        Ok(())
    }

    fn validate_coordinator(&self) -> Result<(), ConfigError> {
        if self.coordinator.report_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.report_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
