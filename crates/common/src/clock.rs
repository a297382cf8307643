use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Producers stamp acquisition times with this clock and consumers compute
/// latency against it, so every process on the host must use the same one.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotone_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
