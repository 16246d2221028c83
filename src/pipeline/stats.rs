use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all stages. Relaxed ordering: they are only ever reported.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub captured: AtomicU64,
    pub capture_errors: AtomicU64,
    pub capture_drops: AtomicU64,
    pub published: AtomicU64,
    pub detection_failures: AtomicU64,
    pub packets_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub clamped_packets: AtomicU64,
    pub annotated: AtomicU64,
    pub annotate_drops: AtomicU64,
    pub display_drops: AtomicU64,
    pub displayed: AtomicU64,
    pub display_errors: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            captured: get(&self.captured),
            capture_errors: get(&self.capture_errors),
            capture_drops: get(&self.capture_drops),
            published: get(&self.published),
            detection_failures: get(&self.detection_failures),
            packets_sent: get(&self.packets_sent),
            send_failures: get(&self.send_failures),
            clamped_packets: get(&self.clamped_packets),
            annotated: get(&self.annotated),
            annotate_drops: get(&self.annotate_drops),
            display_drops: get(&self.display_drops),
            displayed: get(&self.displayed),
            display_errors: get(&self.display_errors),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub capture_errors: u64,
    pub capture_drops: u64,
    pub published: u64,
    pub detection_failures: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
    pub clamped_packets: u64,
    pub annotated: u64,
    pub annotate_drops: u64,
    pub display_drops: u64,
    pub displayed: u64,
    pub display_errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured={} dropped={} published={} detect_failed={} sent={} send_failed={} clamped={} displayed={} display_dropped={}",
            self.captured,
            self.capture_drops,
            self.published,
            self.detection_failures,
            self.packets_sent,
            self.send_failures,
            self.clamped_packets,
            self.displayed,
            self.display_drops + self.annotate_drops
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        bump(&stats.captured);
        bump(&stats.captured);
        bump(&stats.send_failures);
        let snap = stats.snapshot();
        assert_eq!(snap.captured, 2);
        assert_eq!(snap.send_failures, 1);
        assert!(snap.to_string().contains("captured=2"));

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["send_failures"], 1);
    }
}
