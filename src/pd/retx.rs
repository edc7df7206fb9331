//! Retransmission bookkeeping for a single message exchange (RFC 8415 Section 15).

use std::time::{Duration, Instant};

use rand::Rng;

/// Randomization applied to a timeout value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// `[v * 0.9, v * 1.1]`
    Full,
    /// `[v, v * 1.1]`, required for the first Solicit timeout
    Positive,
}

const JITTER_DIVISOR: u64 = 10;

pub fn add_jitter<R: Rng + ?Sized>(rng: &mut R, value: Duration, mode: Jitter) -> Duration {
    let value_ms = value.as_millis() as u64;
    let jitter = value_ms / JITTER_DIVISOR;
    let randomized = match mode {
        Jitter::Positive => value_ms + rng.random_range(0..=jitter),
        Jitter::Full => value_ms - jitter + rng.random_range(0..=2 * jitter),
    };
    Duration::from_millis(randomized)
}

#[derive(Debug, Clone)]
pub struct RetxTracker {
    xid: [u8; 3],
    start_time: Instant,
    timeout: Duration,
    max_timeout: Option<Duration>,
    count: u16,
    max_count: Option<u16>,
    end_time: Option<Instant>,
    long_elapsed_time: bool,
}

impl RetxTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            xid: [0; 3],
            start_time: now,
            timeout: Duration::ZERO,
            max_timeout: None,
            count: 0,
            max_count: None,
            end_time: None,
            long_elapsed_time: false,
        }
    }

    /// Begin a new exchange. The transaction id always differs from the previous exchange's.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: Instant,
        initial_timeout: Duration,
        max_timeout: Option<Duration>,
        jitter: Jitter,
    ) {
        let old = self.xid;
        loop {
            self.xid = rng.random();
            if self.xid != old {
                break;
            }
        }

        self.start_time = now;
        self.timeout = add_jitter(rng, initial_timeout, jitter);
        self.max_timeout = max_timeout;
        self.count = 0;
        self.max_count = None;
        self.end_time = None;
        self.long_elapsed_time = false;
    }

    pub fn xid(&self) -> [u8; 3] {
        self.xid
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_max_count(&mut self, max_count: u16) {
        self.max_count = Some(max_count);
    }

    pub fn set_end_time(&mut self, end_time: Instant) {
        self.end_time = Some(end_time);
    }

    pub fn set_max_timeout(&mut self, max_timeout: Option<Duration>) {
        self.max_timeout = max_timeout;
    }

    /// Only the first message of the exchange has been sent
    pub fn is_first_attempt(&self) -> bool {
        self.count == 1
    }

    /// False once the retransmission count or the end time is exhausted
    pub fn should_retx(&self, now: Instant) -> bool {
        if let Some(max_count) = self.max_count {
            if self.count > max_count {
                return false;
            }
        }
        match self.end_time {
            Some(end_time) => now < end_time,
            None => true,
        }
    }

    /// Deadline for the current attempt, never past the end time
    pub fn next_deadline(&self, now: Instant) -> Instant {
        let deadline = now + self.timeout;
        match self.end_time {
            Some(end_time) if end_time < deadline => end_time,
            _ => deadline,
        }
    }

    /// `RT = 2*RTprev + RAND*RTprev`, computed as `RTprev + jitter(RTprev)`, capped by MRT.
    pub fn update_after_tx<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.timeout += add_jitter(rng, self.timeout, Jitter::Full);

        if let Some(max_timeout) = self.max_timeout {
            if self.timeout > max_timeout {
                self.timeout = add_jitter(rng, max_timeout, Jitter::Full);
            }
        }

        self.count = self.count.saturating_add(1);
    }

    /// Elapsed time in hundredths of a second since the first message of the exchange.
    pub fn elapsed_time(&mut self, now: Instant) -> u16 {
        if self.count == 0 {
            return 0;
        }
        if self.long_elapsed_time {
            return u16::MAX;
        }

        let centis = now.saturating_duration_since(self.start_time).as_millis() / 10;
        let elapsed = u16::try_from(centis).unwrap_or(u16::MAX);
        if elapsed == u16::MAX {
            self.long_elapsed_time = true;
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn full_jitter_bounds() {
        let mut rng = rng();
        for _ in 0..1000 {
            let v = add_jitter(&mut rng, Duration::from_secs(10), Jitter::Full);
            assert!(v >= Duration::from_secs(9) && v <= Duration::from_secs(11), "{v:?}");
        }
    }

    #[test]
    fn positive_jitter_bounds() {
        let mut rng = rng();
        for _ in 0..1000 {
            let v = add_jitter(&mut rng, Duration::from_secs(1), Jitter::Positive);
            assert!(
                v >= Duration::from_secs(1) && v <= Duration::from_millis(1100),
                "{v:?}"
            );
        }
    }

    #[test]
    fn timeout_doubles_and_caps() {
        let mut rng = rng();
        let now = Instant::now();
        let mut retx = RetxTracker::new(now);
        let mrt = Duration::from_secs(30);
        retx.start(&mut rng, now, Duration::from_secs(1), Some(mrt), Jitter::Full);

        let first = retx.timeout();
        assert!(first >= Duration::from_millis(900) && first <= Duration::from_millis(1100));

        for _ in 0..20 {
            let prev = retx.timeout().as_millis() as f64;
            retx.update_after_tx(&mut rng);
            let rt = retx.timeout().as_millis() as f64;
            assert!(rt <= 33_000.0, "RT {rt} exceeds MRT + 10%");
            if prev * 2.1 > 30_000.0 {
                // may have been capped at MRT
                assert!(rt >= 27_000.0 || rt >= prev * 1.9 - 1.0, "{prev} -> {rt}");
                continue;
            }
            assert!(rt >= prev * 1.9 - 1.0 && rt <= prev * 2.1 + 1.0, "{prev} -> {rt}");
        }
    }

    #[test]
    fn new_exchange_changes_xid() {
        let mut rng = rng();
        let now = Instant::now();
        let mut retx = RetxTracker::new(now);
        let mut prev = retx.xid();
        for _ in 0..100 {
            retx.start(&mut rng, now, Duration::from_secs(1), None, Jitter::Full);
            assert_ne!(retx.xid(), prev);
            prev = retx.xid();
        }
    }

    #[test]
    fn max_count_allows_initial_plus_retransmissions() {
        let mut rng = rng();
        let now = Instant::now();
        let mut retx = RetxTracker::new(now);
        retx.start(&mut rng, now, Duration::from_secs(1), None, Jitter::Full);
        retx.set_max_count(10);

        let mut sent = 0;
        while retx.should_retx(now) {
            retx.update_after_tx(&mut rng);
            sent += 1;
        }
        assert_eq!(sent, 11);
    }

    #[test]
    fn end_time_limits_deadline() {
        let mut rng = rng();
        let now = Instant::now();
        let mut retx = RetxTracker::new(now);
        retx.start(&mut rng, now, Duration::from_secs(10), None, Jitter::Full);
        retx.set_end_time(now + Duration::from_secs(3));

        assert_eq!(retx.next_deadline(now), now + Duration::from_secs(3));
        assert!(retx.should_retx(now + Duration::from_secs(2)));
        assert!(!retx.should_retx(now + Duration::from_secs(3)));
    }

    #[test]
    fn elapsed_time_saturates_and_sticks() {
        let mut rng = rng();
        let now = Instant::now();
        let mut retx = RetxTracker::new(now);
        retx.start(&mut rng, now, Duration::from_secs(1), None, Jitter::Full);

        assert_eq!(retx.elapsed_time(now + Duration::from_secs(5)), 0);
        retx.update_after_tx(&mut rng);

        assert_eq!(retx.elapsed_time(now + Duration::from_millis(1234)), 123);
        assert_eq!(retx.elapsed_time(now + Duration::from_secs(700)), u16::MAX);
        // stays saturated even if asked about an earlier time
        assert_eq!(retx.elapsed_time(now + Duration::from_secs(1)), u16::MAX);
    }
}
