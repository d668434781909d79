use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

use crate::metrics::TRACKED_CLIENTS;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);

// Source of "now" for the limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// only moves when told to
#[cfg(test)]
pub struct ManualClock {
    base: Instant,
    offset_ms: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, since_start: Duration) {
        self.offset_ms
            .store(since_start.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset_ms.load(std::sync::atomic::Ordering::SeqCst);
        self.base + Duration::from_millis(offset)
    }
}

// who is calling; unknown callers share the anonymous bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    Anonymous,
}

#[cfg(test)]
impl ClientKey {
    // accepts "1.2.3.4", "::1" or "1.2.3.4:5678"
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        raw.parse::<IpAddr>()
            .or_else(|_| raw.parse::<SocketAddr>().map(|addr| addr.ip()))
            .map(ClientKey::Ip)
            .unwrap_or(ClientKey::Anonymous)
    }
}

impl From<SocketAddr> for ClientKey {
    fn from(addr: SocketAddr) -> Self {
        ClientKey::Ip(addr.ip())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Ip(ip) => write!(f, "{}", ip),
            ClientKey::Anonymous => f.write_str("anonymous"),
        }
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientKey::from(*addr))
            .unwrap_or(ClientKey::Anonymous))
    }
}

// Each class keeps its own counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Chat,
    // same ceilings as chat, separate counter
    MemorySearch,
    MemoryDelete,
    Health,
    Root,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Chat => "chat",
            EndpointClass::MemorySearch => "memory_search",
            EndpointClass::MemoryDelete => "memory_delete",
            EndpointClass::Health => "health",
            EndpointClass::Root => "root",
        }
    }
}

// None = no ceiling in that window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
}

impl WindowLimits {
    pub const fn new(per_minute: Option<u32>, per_hour: Option<u32>) -> Self {
        Self { per_minute, per_hour }
    }

    // How far back a counter has to remember
    fn horizon(&self) -> Duration {
        if self.per_hour.is_some() { HOUR } else { MINUTE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub chat: WindowLimits,
    pub memory_delete: WindowLimits,
    pub health: WindowLimits,
    pub root: WindowLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat: WindowLimits::new(Some(20), Some(100)),
            memory_delete: WindowLimits::new(Some(10), Some(30)),
            health: WindowLimits::new(Some(60), None),
            root: WindowLimits::new(Some(30), None),
        }
    }
}

impl RateLimitConfig {
    pub fn limits_for(&self, class: EndpointClass) -> WindowLimits {
        match class {
            EndpointClass::Chat | EndpointClass::MemorySearch => self.chat,
            EndpointClass::MemoryDelete => self.memory_delete,
            EndpointClass::Health => self.health,
            EndpointClass::Root => self.root,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Minute,
    Hour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected {
        retry_after: Duration,
        window: LimitWindow,
    },
}

#[cfg(test)]
impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

// accepted request timestamps, oldest first
#[derive(Debug, Default)]
pub struct ClientWindowCounter {
    hits: VecDeque<Instant>,
}

impl ClientWindowCounter {
    fn prune(&mut self, now: Instant, horizon: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= horizon {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self, now: Instant, window: Duration) -> impl Iterator<Item = &Instant> {
        self.hits
            .iter()
            .skip_while(move |&&t| now.saturating_duration_since(t) >= window)
    }

    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.in_window(now, window).count()
    }

    // None when there is room, otherwise time until a slot frees up
    fn wait_for_slot(&self, now: Instant, window: Duration, ceiling: u32) -> Option<Duration> {
        let ceiling = ceiling as usize;
        let count = self.count_within(now, window);
        if count < ceiling {
            return None;
        }
        if ceiling == 0 {
            return Some(window);
        }
        // the request that has to expire before count drops below the ceiling
        let blocking = self.in_window(now, window).nth(count - ceiling)?;
        Some((*blocking + window).saturating_duration_since(now))
    }

    fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

struct RateLimiterInner {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    counters: DashMap<(ClientKey, EndpointClass), ClientWindowCounter>,
}

// clones share the same counters
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                config,
                clock,
                counters: DashMap::new(),
            }),
        }
    }

    pub fn with_system_clock(config: RateLimitConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    // entry lock is held across prune/count/record
    pub fn check(&self, client: &ClientKey, class: EndpointClass) -> Decision {
        let limits = self.inner.config.limits_for(class);
        let now = self.inner.clock.now();

        let mut counter = self.inner.counters.entry((*client, class)).or_default();
        counter.prune(now, limits.horizon());

        let mut rejection: Option<(Duration, LimitWindow)> = None;
        let windows = [
            (MINUTE, limits.per_minute, LimitWindow::Minute),
            (HOUR, limits.per_hour, LimitWindow::Hour),
        ];
        for (span, ceiling, window) in windows {
            let Some(ceiling) = ceiling else { continue };
            if let Some(wait) = counter.wait_for_slot(now, span, ceiling) {
                match rejection {
                    Some((longest, _)) if longest >= wait => {}
                    _ => rejection = Some((wait, window)),
                }
            }
        }

        match rejection {
            Some((retry_after, window)) => Decision::Rejected { retry_after, window },
            None => {
                counter.hits.push_back(now);
                Decision::Allowed
            }
        }
    }

    // prune everything, evict idle clients
    pub fn sweep(&self) -> usize {
        let now = self.inner.clock.now();
        let before = self.inner.counters.len();
        let config = &self.inner.config;
        self.inner.counters.retain(|(_, class), counter| {
            counter.prune(now, config.limits_for(*class).horizon());
            !counter.is_empty()
        });
        before.saturating_sub(self.inner.counters.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.counters.len()
    }
}

// Periodic sweep - keeps memory bounded under address churn
pub fn spawn_sweeper(limiter: RateLimiter, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        tracing::info!(interval = ?every, "rate limit sweeper started");
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep();
            TRACKED_CLIENTS.set(limiter.tracked_clients() as f64);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = limiter.tracked_clients(), "evicted idle rate limit entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client(last: u8) -> ClientKey {
        ClientKey::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    fn limiter_with(limits: WindowLimits) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            chat: limits,
            ..RateLimitConfig::default()
        };
        (RateLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn allows_up_to_minute_ceiling() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(5), None));
        for _ in 0..5 {
            assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
            clock.advance(Duration::from_secs(1));
        }
    }

    #[test]
    fn request_past_ceiling_is_rejected_with_bounded_retry() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(3), None));
        for _ in 0..3 {
            assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
            clock.advance(Duration::from_secs(2));
        }
        match limiter.check(&client(1), EndpointClass::Chat) {
            Decision::Rejected { retry_after, window } => {
                assert_eq!(window, LimitWindow::Minute);
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= MINUTE);
            }
            Decision::Allowed => panic!("fourth request should be rejected"),
        }
    }

    #[test]
    fn minute_window_scenario() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(2), None));
        let a = client(1);

        assert!(limiter.check(&a, EndpointClass::Chat).is_allowed());
        clock.set(Duration::from_secs(10));
        assert!(limiter.check(&a, EndpointClass::Chat).is_allowed());

        clock.set(Duration::from_secs(20));
        assert_eq!(
            limiter.check(&a, EndpointClass::Chat),
            Decision::Rejected {
                retry_after: Duration::from_secs(40),
                window: LimitWindow::Minute,
            }
        );

        clock.set(Duration::from_secs(61));
        assert!(limiter.check(&a, EndpointClass::Chat).is_allowed());
    }

    #[test]
    fn rejected_requests_are_not_counted() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(1), None));
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        for _ in 0..10 {
            clock.advance(Duration::from_secs(5));
            assert!(!limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        }
        // only the first request occupies the window
        clock.set(Duration::from_secs(60));
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
    }

    #[test]
    fn clients_do_not_interfere() {
        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(4), Some(10)));
        for _ in 0..4 {
            assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
            assert!(limiter.check(&client(2), EndpointClass::Chat).is_allowed());
        }
        assert!(!limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        assert!(!limiter.check(&client(2), EndpointClass::Chat).is_allowed());
    }

    #[test]
    fn hour_ceiling_blocks_while_under_minute_ceiling() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(5), Some(6)));
        for _ in 0..6 {
            assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
            clock.advance(Duration::from_secs(61));
        }
        match limiter.check(&client(1), EndpointClass::Chat) {
            Decision::Rejected { retry_after, window } => {
                assert_eq!(window, LimitWindow::Hour);
                // first request was 6 * 61s ago
                assert_eq!(retry_after, HOUR - Duration::from_secs(6 * 61));
            }
            Decision::Allowed => panic!("hour ceiling should apply"),
        }
    }

    #[test]
    fn minute_ceiling_blocks_while_under_hour_ceiling() {
        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(2), Some(100)));
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        assert!(matches!(
            limiter.check(&client(1), EndpointClass::Chat),
            Decision::Rejected { window: LimitWindow::Minute, .. }
        ));
    }

    #[test]
    fn endpoint_classes_have_separate_counters() {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            chat: WindowLimits::new(Some(1), None),
            memory_delete: WindowLimits::new(Some(1), None),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config, clock);
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        assert!(limiter.check(&client(1), EndpointClass::MemoryDelete).is_allowed());
        assert!(!limiter.check(&client(1), EndpointClass::Chat).is_allowed());
    }

    #[test]
    fn chat_and_search_share_ceilings_not_counters() {
        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(1), Some(10)));
        assert!(limiter.check(&client(1), EndpointClass::Chat).is_allowed());
        assert!(!limiter.check(&client(1), EndpointClass::Chat).is_allowed());

        // chat at its ceiling, search still has its own slot
        assert!(limiter.check(&client(1), EndpointClass::MemorySearch).is_allowed());
        assert!(!limiter.check(&client(1), EndpointClass::MemorySearch).is_allowed());
    }

    #[test]
    fn zero_ceiling_rejects_everything() {
        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(0), None));
        assert_eq!(
            limiter.check(&client(1), EndpointClass::Chat),
            Decision::Rejected {
                retry_after: MINUTE,
                window: LimitWindow::Minute,
            }
        );
    }

    #[test]
    fn sweep_evicts_idle_clients() {
        let (limiter, clock) = limiter_with(WindowLimits::new(Some(10), Some(100)));
        limiter.check(&client(1), EndpointClass::Chat);
        limiter.check(&client(2), EndpointClass::Health);
        assert_eq!(limiter.tracked_clients(), 2);

        // health only remembers a minute, chat an hour
        clock.advance(Duration::from_secs(120));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        clock.advance(HOUR);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn malformed_identifiers_share_anonymous_bucket() {
        assert_eq!(ClientKey::parse("not-an-ip"), ClientKey::Anonymous);
        assert_eq!(ClientKey::parse(""), ClientKey::Anonymous);
        assert_eq!(ClientKey::parse("10.0.0.1:4000"), client(1));
        assert_eq!(ClientKey::parse(" 10.0.0.1 "), client(1));

        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(1), None));
        assert!(limiter.check(&ClientKey::parse("garbage"), EndpointClass::Chat).is_allowed());
        assert!(!limiter.check(&ClientKey::parse("???"), EndpointClass::Chat).is_allowed());
    }

    #[test]
    fn concurrent_checks_never_exceed_ceiling() {
        let (limiter, _clock) = limiter_with(WindowLimits::new(Some(20), None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check(&client(7), EndpointClass::Chat).is_allowed())
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 20);
    }

    #[test]
    fn default_ceilings() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limits_for(EndpointClass::Chat), WindowLimits::new(Some(20), Some(100)));
        assert_eq!(config.limits_for(EndpointClass::MemoryDelete), WindowLimits::new(Some(10), Some(30)));
        assert_eq!(config.limits_for(EndpointClass::Health), WindowLimits::new(Some(60), None));
        assert_eq!(config.limits_for(EndpointClass::Root), WindowLimits::new(Some(30), None));
    }
}
