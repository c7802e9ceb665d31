//! Smoothed one-way latency estimate
//!
//! The client cannot see the server's clock directly. Each latency reply
//! carries the server-observed probe traversal plus the reply's send
//! instant; averaging that outbound measurement with the observed inbound
//! traversal low-pass filters a one-way estimate that coarsely tolerates
//! asymmetric paths. "Effective now" is the server-time instant the client
//! is currently hearing.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use crate::protocol::LatencyReply;

/// Shared clock state: one writer (the reply handler), many readers.
#[derive(Debug)]
pub struct SyncClock {
    latency: RwLock<Duration>,
}

impl SyncClock {
    pub fn new(initial_latency: Duration) -> Self {
        Self {
            latency: RwLock::new(initial_latency),
        }
    }

    /// Current smoothed one-way latency
    pub fn latency(&self) -> Duration {
        *self.latency.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Latency-adjusted wall clock: `wall_now() - latency`
    pub fn now(&self) -> SystemTime {
        let now = SystemTime::now();
        now.checked_sub(self.latency()).unwrap_or(now)
    }

    /// Fold a latency reply into the estimate. Returns the new value.
    pub fn update(&self, reply: &LatencyReply) -> Duration {
        self.update_at(SystemTime::now(), reply)
    }

    fn update_at(&self, received: SystemTime, reply: &LatencyReply) -> Duration {
        // Skewed clocks can make either traversal look negative; clamp at
        // zero rather than poisoning the estimate.
        let inbound = received
            .duration_since(reply.time.to_system())
            .unwrap_or(Duration::ZERO);
        let outbound = Duration::from_nanos(reply.latency_ns.max(0) as u64);

        let estimate = (inbound + outbound) / 2;
        *self.latency.write().unwrap_or_else(|e| e.into_inner()) = estimate;

        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireTime;
    use std::time::UNIX_EPOCH;

    fn reply_at(sent: SystemTime, one_way: Duration) -> LatencyReply {
        LatencyReply {
            latency_ns: one_way.as_nanos() as i64,
            time: WireTime::from_system(sent),
        }
    }

    #[test]
    fn symmetric_path_converges_immediately() {
        let clock = SyncClock::new(Duration::from_millis(5));
        let true_latency = Duration::from_millis(20);

        let mut sent = UNIX_EPOCH + Duration::from_secs(1_000);
        for _ in 0..3 {
            let received = sent + true_latency;
            clock.update_at(received, &reply_at(sent, true_latency));
            sent += Duration::from_millis(100);
        }

        let err = clock.latency().abs_diff(true_latency);
        assert!(err < Duration::from_millis(1), "off by {err:?}");
    }

    #[test]
    fn asymmetric_path_averages_both_directions() {
        let clock = SyncClock::new(Duration::from_millis(5));

        let sent = UNIX_EPOCH + Duration::from_secs(2_000);
        let received = sent + Duration::from_millis(30);
        let updated = clock.update_at(received, &reply_at(sent, Duration::from_millis(10)));

        assert_eq!(updated, Duration::from_millis(20));
        assert_eq!(clock.latency(), Duration::from_millis(20));
    }

    #[test]
    fn negative_measurements_clamp_to_zero() {
        let clock = SyncClock::new(Duration::from_millis(5));

        // reply "sent" after we received it, and a negative server reading
        let sent = UNIX_EPOCH + Duration::from_secs(3_000);
        let received = sent - Duration::from_millis(50);
        let reply = LatencyReply {
            latency_ns: -1_000_000,
            time: WireTime::from_system(sent),
        };

        assert_eq!(clock.update_at(received, &reply), Duration::ZERO);
    }

    #[test]
    fn effective_now_trails_the_wall_clock() {
        let clock = SyncClock::new(Duration::from_millis(250));

        let effective = clock.now();
        let wall = SystemTime::now();
        let lag = wall.duration_since(effective).unwrap();

        assert!(lag >= Duration::from_millis(250), "lag was {lag:?}");
        assert!(lag < Duration::from_millis(500));
    }
}
