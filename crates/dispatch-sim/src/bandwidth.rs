use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use peer_dispatcher::BandwidthPolicy;

/// A single upload limit. Uploads are accounted after they happened, so a denied upload puts the
/// limit into debt: it counts as exceeded until the limiter would have allowed those bytes.
pub struct UploadLimit {
    limiter: DefaultDirectRateLimiter,
    bytes_per_sec: NonZeroU32,
    exceeded_until: Option<Instant>,
    exceeded: bool,
}

impl UploadLimit {
    /// Allows bursts of up to two seconds worth of bytes. A limit of 0 means unlimited.
    pub fn new(bytes_per_sec: u64) -> Option<Self> {
        let bytes_per_sec = NonZeroU32::new(u32::try_from(bytes_per_sec).unwrap_or(u32::MAX))?;
        let burst = bytes_per_sec.saturating_add(bytes_per_sec.get());

        Some(UploadLimit {
            limiter: RateLimiter::direct(Quota::per_second(bytes_per_sec).allow_burst(burst)),
            bytes_per_sec,
            exceeded_until: None,
            exceeded: false,
        })
    }

    pub fn advance(&mut self, now: Instant) {
        self.exceeded = self.exceeded_until.is_some_and(|until| now < until);
    }

    pub fn record_upload(&mut self, bytes: usize, now: Instant) {
        let Some(cells) = NonZeroU32::new(u32::try_from(bytes).unwrap_or(u32::MAX)) else {
            return;
        };

        let wait = match self.limiter.check_n(cells) {
            Ok(Ok(())) => return,
            Ok(Err(not_until)) => not_until.wait_time_from(DefaultClock::default().now()),
            // More than a whole burst at once
            Err(_) => Duration::from_secs_f64(f64::from(cells.get()) / f64::from(self.bytes_per_sec.get())),
        };

        // Debts add up
        let since = self.exceeded_until.map_or(now, |until| until.max(now));
        self.exceeded_until = Some(since + wait);
        self.exceeded = true;
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }
}

impl std::fmt::Debug for UploadLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadLimit")
            .field("bytes_per_sec", &self.bytes_per_sec)
            .field("exceeded_until", &self.exceeded_until)
            .field("exceeded", &self.exceeded)
            .finish_non_exhaustive()
    }
}

/// Upload limits of the simulated client: one for this torrent and one for the whole process
#[derive(Debug)]
pub struct UploadLimiter {
    overall: Option<UploadLimit>,
    torrent: Option<UploadLimit>,
}

impl UploadLimiter {
    pub fn new(torrent_limit: u64, overall_limit: u64) -> Self {
        UploadLimiter {
            overall: UploadLimit::new(overall_limit),
            torrent: UploadLimit::new(torrent_limit),
        }
    }

    pub fn advance(&mut self, now: Instant) {
        self.limits_mut().for_each(|limit| limit.advance(now));
    }

    pub fn record_upload(&mut self, bytes: usize, now: Instant) {
        self.limits_mut().for_each(|limit| limit.record_upload(bytes, now));
    }

    fn limits_mut(&mut self) -> impl Iterator<Item = &mut UploadLimit> {
        self.overall.iter_mut().chain(self.torrent.iter_mut())
    }
}

impl BandwidthPolicy for UploadLimiter {
    fn does_overall_upload_speed_exceed(&self) -> bool {
        self.overall.as_ref().is_some_and(UploadLimit::is_exceeded)
    }

    fn does_upload_speed_exceed(&self) -> bool {
        self.torrent.as_ref().is_some_and(UploadLimit::is_exceeded)
    }
}
