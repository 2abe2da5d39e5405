use crate::settings::ClientSettings;

const JITTER_RATIO: f64 = 0.1;
const MIN_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            initial_delay_ms: settings.reconnect_initial_delay_ms,
            max_delay_ms: settings.reconnect_max_delay_ms.max(settings.reconnect_initial_delay_ms),
        }
    }

    /// Doubling delay for the given consecutive failure count, before jitter.
    pub(crate) fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1_u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    pub fn next_delay_ms(&self, attempt: u32) -> u64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        jittered_delay_ms(self.base_delay_ms(attempt), JITTER_RATIO, nanos)
    }
}

fn jittered_delay_ms(base_ms: u64, ratio: f64, nanos: i128) -> u64 {
    let frac = ((nanos % 1000) as f64) / 1000.0;
    let delta = (frac * 2.0 - 1.0) * (base_ms as f64 * ratio);
    ((base_ms as f64 + delta).max(MIN_DELAY_MS as f64)) as u64
}
