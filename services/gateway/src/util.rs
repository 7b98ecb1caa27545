//! Clock helpers shared by the tasks.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since process start. First caller pins the epoch, so call
/// this early in `main`.
pub fn boot_millis() -> u64 {
    let boot = *BOOT.get_or_init(Instant::now);
    u64::try_from(boot.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Seconds since process start.
pub fn uptime_secs() -> u64 {
    boot_millis() / 1000
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> i64 {
    i64::try_from(epoch_millis() / 1000).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_clock_is_monotonic() {
        let a = boot_millis();
        let b = boot_millis();
        assert!(b >= a);
    }

    #[test]
    fn epoch_clocks_agree() {
        let ms = epoch_millis();
        let s = epoch_secs();
        assert!((s - i64::try_from(ms / 1000).unwrap()).abs() <= 1);
    }
}
