//! Per-provider call budgets.
//!
//! Every outbound call to a rate-limited authority consults the guard first.
//! Exhaustion is a typed, recoverable failure carrying the limit's name and
//! a retry-after hint; callers delay the next attempt instead of treating
//! it like a transport error.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::core::{EngineError, EngineResult, NamedLimit};
use crate::models::ProviderId;

/// Consumes one unit from every named limit of a provider, or fails with
/// [`EngineError::RateLimited`] naming the first exhausted limit.
#[async_trait]
pub trait RateLimitGuard: Send + Sync {
    async fn acquire(&self, provider: ProviderId) -> EngineResult<()>;
}

/// A guard that never refuses. For providers without published quotas and
/// for tests that target other behavior.
pub struct UnlimitedGuard;

#[async_trait]
impl RateLimitGuard for UnlimitedGuard {
    async fn acquire(&self, _provider: ProviderId) -> EngineResult<()> {
        Ok(())
    }
}

/// In-process guard: one GCRA limiter per (provider, limit name).
///
/// Suitable for single-worker deployments; multi-worker fleets share their
/// budget through [`RedisRateLimitGuard`] instead.
pub struct GovernorRateLimitGuard {
    limiters: HashMap<(ProviderId, String), DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl GovernorRateLimitGuard {
    pub fn new(limits: &HashMap<ProviderId, Vec<NamedLimit>>) -> EngineResult<Self> {
        let mut limiters = HashMap::new();
        for (provider, provider_limits) in limits {
            for limit in provider_limits {
                let burst = NonZeroU32::new(limit.max_requests).ok_or_else(|| {
                    EngineError::Config(format!(
                        "limit '{}' for {} must allow at least one request",
                        limit.name, provider
                    ))
                })?;
                let quota = Quota::with_period(limit.window / limit.max_requests)
                    .ok_or_else(|| {
                        EngineError::Config(format!(
                            "limit '{}' for {} has a zero-length window",
                            limit.name, provider
                        ))
                    })?
                    .allow_burst(burst);
                limiters.insert(
                    (*provider, limit.name.clone()),
                    RateLimiter::direct(quota),
                );
            }
        }
        Ok(GovernorRateLimitGuard {
            limiters,
            clock: DefaultClock::default(),
        })
    }
}

#[async_trait]
impl RateLimitGuard for GovernorRateLimitGuard {
    async fn acquire(&self, provider: ProviderId) -> EngineResult<()> {
        for ((owner, name), limiter) in &self.limiters {
            if *owner != provider {
                continue;
            }
            if let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(self.clock.now());
                crate::metrics::RATE_LIMITED_TOTAL
                    .with_label_values(&[provider.as_str(), name.as_str()])
                    .inc();
                return Err(EngineError::RateLimited {
                    limit: name.clone(),
                    retry_after_secs: (wait.as_secs_f64().ceil() as u64).max(1),
                });
            }
        }
        Ok(())
    }
}

/// Cross-worker guard: fixed windows on shared Redis counters.
///
/// The increment-and-check is a single atomic pipeline, so concurrent
/// workers can never oversubscribe a budget by racing a read-then-write.
pub struct RedisRateLimitGuard {
    conn: redis::aio::ConnectionManager,
    limits: HashMap<ProviderId, Vec<NamedLimit>>,
}

impl RedisRateLimitGuard {
    pub fn new(
        conn: redis::aio::ConnectionManager,
        limits: HashMap<ProviderId, Vec<NamedLimit>>,
    ) -> Self {
        RedisRateLimitGuard { conn, limits }
    }
}

#[async_trait]
impl RateLimitGuard for RedisRateLimitGuard {
    async fn acquire(&self, provider: ProviderId) -> EngineResult<()> {
        let Some(limits) = self.limits.get(&provider) else {
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp() as u64;

        for limit in limits {
            let window_secs = limit.window.as_secs().max(1);
            let bucket = now / window_secs;
            let key = format!("einvoice:rl:{}:{}:{}", provider, limit.name, bucket);

            let mut conn = self.conn.clone();
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .incr(&key, 1u64)
                .expire(&key, window_secs as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| EngineError::Transport(format!("rate limit store: {e}")))?;

            if count > limit.max_requests as u64 {
                let window_end = (bucket + 1) * window_secs;
                crate::metrics::RATE_LIMITED_TOTAL
                    .with_label_values(&[provider.as_str(), limit.name.as_str()])
                    .inc();
                return Err(EngineError::RateLimited {
                    limit: limit.name.clone(),
                    retry_after_secs: window_end.saturating_sub(now).max(1),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(provider: ProviderId, specs: &[(&str, u32, u64)]) -> HashMap<ProviderId, Vec<NamedLimit>> {
        let mut map = HashMap::new();
        map.insert(
            provider,
            specs
                .iter()
                .map(|(name, max, secs)| NamedLimit::new(*name, *max, Duration::from_secs(*secs)))
                .collect(),
        );
        map
    }

    #[tokio::test]
    async fn exhaustion_reports_limit_name_and_retry_after() {
        let guard =
            GovernorRateLimitGuard::new(&limits(ProviderId::EFactura, &[("per-minute", 2, 60)]))
                .unwrap();

        guard.acquire(ProviderId::EFactura).await.unwrap();
        guard.acquire(ProviderId::EFactura).await.unwrap();

        match guard.acquire(ProviderId::EFactura).await {
            Err(EngineError::RateLimited {
                limit,
                retry_after_secs,
            }) => {
                assert_eq!(limit, "per-minute");
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected rate limit exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tightest_of_multiple_named_limits_wins() {
        let guard = GovernorRateLimitGuard::new(&limits(
            ProviderId::EFactura,
            &[("per-minute", 100, 60), ("per-day", 1, 86_400)],
        ))
        .unwrap();

        guard.acquire(ProviderId::EFactura).await.unwrap();
        match guard.acquire(ProviderId::EFactura).await {
            Err(EngineError::RateLimited { limit, .. }) => assert_eq!(limit, "per-day"),
            other => panic!("expected rate limit exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn providers_do_not_share_budgets() {
        let guard =
            GovernorRateLimitGuard::new(&limits(ProviderId::EFactura, &[("per-minute", 1, 60)]))
                .unwrap();

        guard.acquire(ProviderId::EFactura).await.unwrap();
        // No limits registered for this provider at all.
        guard.acquire(ProviderId::XRechnung).await.unwrap();
        assert!(guard.acquire(ProviderId::EFactura).await.is_err());
    }

    #[test]
    fn zero_budget_is_a_configuration_error() {
        let result =
            GovernorRateLimitGuard::new(&limits(ProviderId::EFactura, &[("per-minute", 0, 60)]));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
