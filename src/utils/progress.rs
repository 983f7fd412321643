use std::time::{Duration, Instant};

/// 一次速度估算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// 字节/秒，不会为负
    pub speed: f64,
    /// 剩余时间；速度为 0 时为 None（“计算中”）
    pub eta: Option<Duration>,
}

impl Estimate {
    pub fn eta_seconds(&self) -> Option<f64> {
        self.eta.map(|eta| eta.as_secs_f64())
    }
}

/// 速度/剩余时间估算器
///
/// Only the last accepted sample is kept. Updates arriving less than
/// `min_interval` after that sample are ignored so that bursts of chunk
/// acknowledgements do not make the figures jump around.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last_sample: Option<(Instant, u64)>,
    min_interval: Duration,
    smoothing: Option<f64>,
    smoothed_speed: Option<f64>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self {
            last_sample: None,
            min_interval: Duration::from_secs(1),
            smoothing: None,
            smoothed_speed: None,
        }
    }

    /// 指数平滑，`alpha` 为新样本的权重，取值 (0, 1]
    pub fn with_smoothing(mut self, alpha: f64) -> Self {
        if alpha > 0.0 && alpha <= 1.0 {
            self.smoothing = Some(alpha);
        }
        self
    }

    /// Forget the baseline, e.g. after a pause so idle time is not counted.
    pub fn reset(&mut self) {
        self.last_sample = None;
        self.smoothed_speed = None;
    }

    pub fn update(&mut self, bytes_transferred: u64, total_bytes: u64, now: Instant) -> Option<Estimate> {
        let (last_time, last_bytes) = match self.last_sample {
            Some(sample) => sample,
            None => {
                self.last_sample = Some((now, bytes_transferred));
                return None;
            }
        };

        let elapsed = now.saturating_duration_since(last_time);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }

        let delta = bytes_transferred.saturating_sub(last_bytes);
        let instant_speed = delta as f64 / elapsed.as_secs_f64();

        let speed = match (self.smoothing, self.smoothed_speed) {
            (Some(alpha), Some(previous)) => alpha * instant_speed + (1.0 - alpha) * previous,
            _ => instant_speed,
        };
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 0.0 };

        self.last_sample = Some((now, bytes_transferred));
        self.smoothed_speed = Some(speed);

        let remaining = total_bytes.saturating_sub(bytes_transferred);
        let eta = if speed > 0.0 {
            Duration::try_from_secs_f64(remaining as f64 / speed).ok()
        } else {
            None
        };

        Some(Estimate { speed, eta })
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// 格式化剩余时间，None 表示还在计算
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(duration) => format_duration(duration),
        None => "calculating...".to_string(),
    }
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
