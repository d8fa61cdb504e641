use super::defaults::MAX_DEVICE_NAME_BYTES;
use super::{
    AppConfig, ServiceConfig, MAX_CHANNELS, MAX_QUEUE_SLOTS, MAX_SAMPLE_RATE, MAX_WINDOW_MS,
    MIN_CHANNELS, MIN_QUEUE_SLOTS, MIN_SAMPLE_RATE, MIN_WINDOW_MS,
};
use crate::error::ServiceError;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::Path;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and canonicalize the datastore path.
    pub fn validate(&mut self) -> Result<()> {
        if !self.binary_threshold.is_finite() || !(0.0..=1.0).contains(&self.binary_threshold) {
            bail!(
                "--binary-threshold must be between 0.0 and 1.0, got {}",
                self.binary_threshold
            );
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            );
        }
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&self.channels) {
            bail!(
                "--channels must be between {MIN_CHANNELS} and {MAX_CHANNELS}, got {}",
                self.channels
            );
        }
        if !(MIN_WINDOW_MS..=MAX_WINDOW_MS).contains(&self.window_ms) {
            bail!(
                "--window-ms must be between {MIN_WINDOW_MS} and {MAX_WINDOW_MS} ms, got {}",
                self.window_ms
            );
        }
        if !(MIN_QUEUE_SLOTS..=MAX_QUEUE_SLOTS).contains(&self.queue_slots) {
            bail!(
                "--queue-slots must be between {MIN_QUEUE_SLOTS} and {MAX_QUEUE_SLOTS}, got {}",
                self.queue_slots
            );
        }

        // Device names are matched verbatim against what the host reports.
        if let Some(device) = &self.input_device {
            if device.trim().is_empty()
                || device.len() > MAX_DEVICE_NAME_BYTES
                || device.chars().any(char::is_control)
            {
                bail!(
                    "--input-device must be 1-{MAX_DEVICE_NAME_BYTES} bytes with no control characters"
                );
            }
        }

        if let Some(datastore) = self.datastore.take() {
            check_datastore_dir(&datastore).map_err(|err| anyhow!("--datastore: {err}"))?;
            let canonical = datastore
                .canonicalize()
                .with_context(|| format!("failed to resolve --datastore {}", datastore.display()))?;
            self.datastore = Some(canonical);
        }

        Ok(())
    }

    /// Build the library configuration. Requires `--datastore`.
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let datastore = self
            .datastore
            .clone()
            .ok_or_else(|| anyhow!("--datastore (or EARMARK_DATASTORE) is required"))?;
        let config = ServiceConfig {
            datastore_dir: datastore,
            engine: self.engine_options(),
            format: self.capture_format(),
            queue_slots: self.queue_slots,
            overflow_policy: self.overflow_policy,
            autodiscovery: self.autodiscovery,
            log_timings: self.log_timings && !self.no_logs,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ServiceConfig {
    /// Checks run again at service construction, for library callers that
    /// build the struct by hand.
    pub fn validate(&self) -> Result<(), ServiceError> {
        check_datastore_dir(&self.datastore_dir)?;
        let threshold = self.engine.binary_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ServiceError::Config(format!(
                "binary threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }
        let format = &self.format;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&format.sample_rate) {
            return Err(ServiceError::Config(format!(
                "sample rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                format.sample_rate
            )));
        }
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&format.channels) {
            return Err(ServiceError::Config(format!(
                "channel count must be between {MIN_CHANNELS} and {MAX_CHANNELS}, got {}",
                format.channels
            )));
        }
        if format.window_frames == 0 {
            return Err(ServiceError::Config("capture window is empty".to_string()));
        }
        if !(MIN_QUEUE_SLOTS..=MAX_QUEUE_SLOTS).contains(&self.queue_slots) {
            return Err(ServiceError::Config(format!(
                "queue slots must be between {MIN_QUEUE_SLOTS} and {MAX_QUEUE_SLOTS}, got {}",
                self.queue_slots
            )));
        }
        Ok(())
    }
}

fn check_datastore_dir(path: &Path) -> Result<(), ServiceError> {
    if path.as_os_str().is_empty() {
        return Err(ServiceError::Config(
            "datastore directory is required".to_string(),
        ));
    }
    if !path.is_dir() {
        return Err(ServiceError::Config(format!(
            "datastore directory {} does not exist",
            path.display()
        )));
    }
    Ok(())
}
