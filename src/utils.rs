/// Utility functions and helpers for gateway operations
///
/// This module contains various utility functions for validation,
/// formatting, logging, and performance monitoring.

use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::error::{HvlinkError, HvlinkResult};

/// Performance metrics for bus and session operations
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
}

impl PerformanceMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation
    pub fn record_success(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_duration += duration;

        self.min_duration = Some(
            self.min_duration.map_or(duration, |min| min.min(duration))
        );
        self.max_duration = Some(
            self.max_duration.map_or(duration, |max| max.max(duration))
        );

        if self.total_requests > 0 {
            self.avg_duration = self.total_duration / self.total_requests as u32;
        }
    }

    /// Record a failed operation
    pub fn record_failure(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.total_duration += duration;

        if self.total_requests > 0 {
            self.avg_duration = self.total_duration / self.total_requests as u32;
        }
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }

    /// Get requests per second
    pub fn requests_per_second(&self) -> f64 {
        if self.total_duration.is_zero() {
            return 0.0;
        }
        self.total_requests as f64 / self.total_duration.as_secs_f64()
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    /// Stop the timer and return duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }

    /// Stop timer and log result
    pub fn stop_and_log(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        if success {
            info!("✅ Operation '{}' succeeded in {:?}", self.operation_name, duration);
        } else {
            warn!("❌ Operation '{}' failed after {:?}", self.operation_name, duration);
        }
        duration
    }
}

/// Data validation utilities
pub mod validation {
    use super::*;
    use crate::protocol::{Slot, Submodule, SLOT_COUNT, SUBMODULE_COUNT};

    /// Validate crate slot number (0-15)
    pub fn validate_slot(slot: Slot) -> HvlinkResult<()> {
        if slot >= SLOT_COUNT {
            return Err(HvlinkError::addressing(
                format!("Invalid slot: {} (must be 0-{})", slot, SLOT_COUNT - 1)
            ));
        }
        Ok(())
    }

    /// Validate submodule index (0-1)
    pub fn validate_submodule(submodule: Submodule) -> HvlinkResult<()> {
        if submodule >= SUBMODULE_COUNT {
            return Err(HvlinkError::addressing(
                format!("Invalid submodule: {} (must be 0-{})", submodule, SUBMODULE_COUNT - 1)
            ));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Format performance metrics as a table
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        format!(
            "Performance Metrics:\n\
             ├─ Total Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {}\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             ├─ Max Duration: {}\n\
             └─ Requests/sec: {:.1}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), |d| format_duration(d)),
            metrics.max_duration.map_or("N/A".to_string(), |d| format_duration(d)),
            metrics.requests_per_second()
        )
    }
}

/// Logging utilities
pub mod logging {
    use super::*;

    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// Log one translated command exchange for debugging
    pub fn log_exchange(
        slot: u8,
        submodule: u8,
        command: &str,
        duration: Duration,
        success: bool,
    ) {
        let status = if success { "✅" } else { "❌" };

        debug!(
            "{} Slot {}:{} '{}' | Duration: {}",
            status,
            slot,
            submodule,
            command,
            format::format_duration(duration)
        );
    }
}
