use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

/// Atomic fixed-window count: INCR, first-caller EXPIRE, return count + TTL.
/// Single round trip, so no watch/retry loop is needed.
const WINDOW_SCRIPT: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('TTL', KEYS[1])
return {current, ttl}
";

/// Distributed sliding-window limiter with local fallback.
///
/// The shared Redis counter is keyed on `⌊now/period⌋` so all workers
/// draw from one budget. When Redis becomes unreachable the handle
/// degrades to a per-process token regenerator honouring the same
/// rate; aggregate throughput is then at worst `workers × rate`.
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    redis_available: AtomicBool,
    script: Script,
    max_calls: u32,
    period: u32,
    counter_prefix: String,
    block_key: String,
    local: Mutex<LocalState>,
}

struct LocalState {
    allowance: f64,
    last_check: Instant,
    block_until: Option<Instant>,
}

impl RateLimiter {
    /// `redis = None` runs local-only from the start (used when the
    /// shared store cannot be reached at boot).
    pub fn new(
        redis: Option<ConnectionManager>,
        max_calls: u32,
        period: u32,
        namespace: &str,
    ) -> Self {
        let max_calls = max_calls.max(1);
        let period = period.max(1);
        let namespace = namespace.trim_end_matches(':');
        let available = redis.is_some();
        Self {
            redis,
            redis_available: AtomicBool::new(available),
            script: Script::new(WINDOW_SCRIPT),
            max_calls,
            period,
            counter_prefix: format!("{namespace}:counter"),
            block_key: format!("{namespace}:blocked_until"),
            local: Mutex::new(LocalState {
                allowance: max_calls as f64,
                last_check: Instant::now(),
                block_until: None,
            }),
        }
    }

    /// Connect the shared store, degrading to local-only on failure.
    pub async fn connect(url: &str, max_calls: u32, period: u32, namespace: &str) -> Self {
        let redis = match redis::Client::open(url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!("Redis unavailable for rate limiter, running local-only: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Invalid Redis URL for rate limiter, running local-only: {e}");
                None
            }
        };
        Self::new(redis, max_calls, period, namespace)
    }

    /// Block until a call token is available.
    pub async fn acquire(&self) {
        if self.redis_available.load(Ordering::Relaxed) {
            if let Some(conn) = self.redis.clone() {
                match self.acquire_distributed(conn).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("Redis rate limiter unavailable, falling back to local limiter: {e}");
                        self.redis_available.store(false, Ordering::Relaxed);
                    }
                }
            }
        }
        self.acquire_local().await;
    }

    /// Record a service-imposed cool-off (e.g. Retry-After): all
    /// subsequent `acquire` calls wait it out, across workers when the
    /// shared store is reachable.
    pub async fn block_for(&self, seconds: f64) {
        let wait_for = seconds.floor().max(0.0) as u64;
        if wait_for == 0 {
            return;
        }

        let unblock_at = Instant::now() + Duration::from_secs(wait_for);
        {
            let mut local = self.local.lock().expect("limiter mutex poisoned");
            local.block_until = Some(match local.block_until {
                Some(existing) => existing.max(unblock_at),
                None => unblock_at,
            });
        }

        if !self.redis_available.load(Ordering::Relaxed) {
            return;
        }
        if let Some(mut conn) = self.redis.clone() {
            let blocked_until = unix_now() + wait_for;
            let result: redis::RedisResult<()> = redis::cmd("SET")
                .arg(&self.block_key)
                .arg(blocked_until)
                .arg("EX")
                .arg(wait_for)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                debug!("Unable to persist distributed block window: {e}");
                self.redis_available.store(false, Ordering::Relaxed);
            }
        }
    }

    async fn acquire_distributed(&self, mut conn: ConnectionManager) -> redis::RedisResult<()> {
        self.respect_distributed_block(&mut conn).await?;
        loop {
            let window = unix_now() / u64::from(self.period);
            let key = format!("{}:{}", self.counter_prefix, window);
            let (count, ttl): (u64, i64) = self
                .script
                .key(&key)
                .arg(self.period + 1)
                .invoke_async(&mut conn)
                .await?;

            if count <= u64::from(self.max_calls) {
                return Ok(());
            }

            let wait_for = if ttl > 0 { ttl as u64 } else { u64::from(self.period) };
            debug!("rate window exhausted, sleeping {wait_for}s");
            sleep(Duration::from_secs(wait_for)).await;
        }
    }

    async fn respect_distributed_block(
        &self,
        conn: &mut ConnectionManager,
    ) -> redis::RedisResult<()> {
        let blocked_raw: Option<u64> = redis::cmd("GET")
            .arg(&self.block_key)
            .query_async(conn)
            .await?;

        if let Some(blocked_until) = blocked_raw {
            let now = unix_now();
            if blocked_until > now {
                let wait_for = blocked_until - now;
                debug!("waiting {wait_for}s for distributed block to clear");
                sleep(Duration::from_secs(wait_for)).await;
            }
        }
        self.wait_local_block().await;
        Ok(())
    }

    async fn wait_local_block(&self) {
        let wait_for = {
            let local = self.local.lock().expect("limiter mutex poisoned");
            local
                .block_until
                .and_then(|until| until.checked_duration_since(Instant::now()))
        };
        if let Some(wait_for) = wait_for {
            debug!("waiting {:?} for local block to clear", wait_for);
            sleep(wait_for).await;
        }
    }

    /// Token-regeneration fallback: allowance refills at
    /// `max_calls / period` up to a ceiling of `max_calls`; a deficit
    /// waits proportionally to the shortfall.
    async fn acquire_local(&self) {
        loop {
            let wait_for = {
                let mut local = self.local.lock().expect("limiter mutex poisoned");
                let now = Instant::now();

                if let Some(until) = local.block_until {
                    if now < until {
                        until - now
                    } else {
                        local.block_until = None;
                        self.regenerate_and_take(&mut local, now)
                    }
                } else {
                    self.regenerate_and_take(&mut local, now)
                }
            };

            if wait_for.is_zero() {
                return;
            }
            sleep(wait_for).await;
        }
    }

    fn regenerate_and_take(&self, local: &mut LocalState, now: Instant) -> Duration {
        let elapsed = now.duration_since(local.last_check).as_secs_f64();
        local.last_check = now;
        let rate = f64::from(self.max_calls) / f64::from(self.period);
        local.allowance = (local.allowance + elapsed * rate).min(f64::from(self.max_calls));

        if local.allowance >= 1.0 {
            local.allowance -= 1.0;
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - local.allowance) / rate)
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_limiter(max_calls: u32, period: u32) -> RateLimiter {
        RateLimiter::new(None, max_calls, period, "test:rate")
    }

    #[tokio::test(start_paused = true)]
    async fn local_burst_up_to_capacity_is_immediate() {
        let limiter = local_limiter(3, 60);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn local_rate_never_exceeds_capacity_over_period() {
        let limiter = local_limiter(2, 10);
        let start = Instant::now();
        // Two immediate, third must wait one token interval (period/capacity).
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs_f64(4.9));
        assert!(elapsed <= Duration::from_secs_f64(5.5));
    }

    #[tokio::test(start_paused = true)]
    async fn block_for_delays_local_acquire() {
        let limiter = local_limiter(10, 60);
        limiter.block_for(30.0).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn block_for_keeps_the_later_deadline() {
        let limiter = local_limiter(10, 60);
        limiter.block_for(30.0).await;
        limiter.block_for(5.0).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_block_is_a_no_op() {
        let limiter = local_limiter(10, 60);
        limiter.block_for(0.0).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }
}
