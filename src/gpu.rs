//! Best-effort GPU memory monitoring.
//!
//! A single background task samples `nvidia-smi` at a fixed interval and
//! flips a shared pressure flag when memory utilization crosses the
//! configured threshold. The inference client may reject new requests while
//! the flag is set. Absence of the tool is not an error: the monitor simply
//! reports no GPU data.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::GpuSettings;
use crate::logging::{report_progress, ProgressEvent};

/// Minimum spacing between pressure alerts.
const ALERT_INTERVAL: Duration = Duration::from_secs(60);

/// One sample of GPU state.
#[derive(Debug, Clone)]
pub struct GpuStats {
    pub gpu_id: u32,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_free_mb: f64,
    pub utilization_percent: f64,
    pub temperature_c: Option<f64>,
    pub power_draw_w: Option<f64>,
}

impl GpuStats {
    /// Memory utilization as a fraction in [0, 1].
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_total_mb == 0.0 {
            0.0
        } else {
            self.memory_used_mb / self.memory_total_mb
        }
    }
}

/// Samples GPU state and tracks memory pressure.
pub struct GpuMonitor {
    settings: GpuSettings,
    pressure: AtomicBool,
    last_alert: Mutex<Option<tokio::time::Instant>>,
    sampler_running: AtomicBool,
}

impl GpuMonitor {
    pub fn new(settings: GpuSettings) -> Self {
        Self {
            settings,
            pressure: AtomicBool::new(false),
            last_alert: Mutex::new(None),
            sampler_running: AtomicBool::new(false),
        }
    }

    /// Whether the last sample crossed the memory threshold.
    pub fn under_pressure(&self) -> bool {
        self.pressure.load(Ordering::Relaxed)
    }

    /// Whether pressure should reject new requests.
    pub fn should_reject(&self) -> bool {
        self.settings.reject_on_pressure && self.under_pressure()
    }

    /// Take one sample. Returns `None` when the query tool is unavailable
    /// or its output cannot be parsed.
    pub async fn sample(&self) -> Option<GpuStats> {
        let output = Command::new("nvidia-smi")
            .arg(format!("--id={}", self.settings.gpu_id))
            .arg("--query-gpu=memory.used,memory.total,memory.free,utilization.gpu,temperature.gpu,power.draw")
            .arg("--format=csv,noheader,nounits")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(5), output).await {
            Ok(Ok(out)) if out.status.success() => out,
            Ok(Ok(out)) => {
                log::warn!(
                    "nvidia-smi returned error: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                return None;
            }
            Ok(Err(e)) => {
                // Tool missing entirely: degrade to "no GPU data".
                log::debug!("nvidia-smi unavailable: {e}");
                return None;
            }
            Err(_) => {
                log::warn!("nvidia-smi timed out");
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stats = parse_csv_line(self.settings.gpu_id, stdout.trim())?;

        if stats.memory_utilization() > self.settings.gpu_memory_threshold {
            self.pressure.store(true, Ordering::Relaxed);
            self.alert(&stats).await;
        } else {
            self.pressure.store(false, Ordering::Relaxed);
        }

        Some(stats)
    }

    /// Rate-limited pressure alert.
    async fn alert(&self, stats: &GpuStats) {
        let mut last = self.last_alert.lock().await;
        let now = tokio::time::Instant::now();
        if let Some(previous) = *last {
            if now.duration_since(previous) < ALERT_INTERVAL {
                return;
            }
        }
        *last = Some(now);
        report_progress(ProgressEvent::GpuAlert {
            gpu_id: stats.gpu_id,
            memory_utilization: stats.memory_utilization(),
        });
    }

    /// Start the background sampling loop. At most one loop runs per
    /// monitor regardless of how many times this is called.
    pub fn start_sampler(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if !self.settings.enabled {
            return None;
        }
        if self.sampler_running.swap(true, Ordering::SeqCst) {
            return None;
        }
        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(self.settings.poll_interval_seconds.max(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = monitor.sample().await;
            }
        }))
    }
}

fn parse_csv_line(gpu_id: u32, line: &str) -> Option<GpuStats> {
    let values: Vec<&str> = line.split(',').map(str::trim).collect();
    if values.len() < 4 {
        log::warn!("unexpected nvidia-smi output: {line}");
        return None;
    }
    Some(GpuStats {
        gpu_id,
        memory_used_mb: values[0].parse().ok()?,
        memory_total_mb: values[1].parse().ok()?,
        memory_free_mb: values[2].parse().ok()?,
        utilization_percent: values[3].parse().ok()?,
        temperature_c: values.get(4).and_then(|v| v.parse().ok()),
        power_draw_w: values.get(5).and_then(|v| v.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_csv_line() {
        let stats = parse_csv_line(0, "8192, 16384, 8192, 75, 62, 250.5").unwrap();
        assert_eq!(stats.memory_used_mb, 8192.0);
        assert_eq!(stats.memory_total_mb, 16384.0);
        assert_eq!(stats.utilization_percent, 75.0);
        assert_eq!(stats.temperature_c, Some(62.0));
        assert_eq!(stats.power_draw_w, Some(250.5));
        assert!((stats.memory_utilization() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn parses_line_without_optional_fields() {
        let stats = parse_csv_line(1, "100, 1000, 900, 10").unwrap();
        assert_eq!(stats.gpu_id, 1);
        assert!(stats.temperature_c.is_none());
        assert!(stats.power_draw_w.is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_csv_line(0, "garbage").is_none());
        assert!(parse_csv_line(0, "1, 2").is_none());
        assert!(parse_csv_line(0, "a, b, c, d").is_none());
    }

    #[tokio::test]
    async fn missing_tool_degrades_cleanly() {
        // Sampling must never error even when nvidia-smi is absent.
        let monitor = GpuMonitor::new(GpuSettings::default());
        let _ = monitor.sample().await;
        assert!(!monitor.should_reject());
    }

    #[tokio::test]
    async fn sampler_starts_at_most_once() {
        let monitor = Arc::new(GpuMonitor::new(GpuSettings {
            enabled: true,
            poll_interval_seconds: 3600,
            ..GpuSettings::default()
        }));
        let first = monitor.start_sampler();
        let second = monitor.start_sampler();
        assert!(first.is_some());
        assert!(second.is_none());
        if let Some(handle) = first {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn disabled_monitor_does_not_sample() {
        let monitor = Arc::new(GpuMonitor::new(GpuSettings::default()));
        assert!(monitor.start_sampler().is_none());
    }
}
