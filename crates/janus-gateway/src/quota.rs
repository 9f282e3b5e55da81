//! Per-tenant quota enforcement on the query path.
//!
//! Minute and second windows use token-bucket semantics with continuous
//! refill; monthly windows use fixed UTC calendar boundaries. Concurrent
//! admits on the same tenant are serialized; a write that would exceed a
//! limit is rejected atomically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use janus_core::{AdmissionControl, Error, QuotaLimits, QuotaResource, Result};

/// Continuously refilling token bucket.
#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Whether one token is available right now (after refill).
    fn available(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    /// Consume one token. Callers check `available` first.
    fn take(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// Time until one token becomes available.
    fn retry_after(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
    }
}

/// Calendar-month counter with UTC boundaries.
#[derive(Debug, Clone)]
struct MonthlyCounter {
    year: i32,
    month: u32,
    count: i64,
}

impl MonthlyCounter {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            year: now.year(),
            month: now.month(),
            count: 0,
        }
    }

    /// Reset the counter when the calendar month rolled over.
    fn roll(&mut self, now: DateTime<Utc>) {
        if now.year() != self.year || now.month() != self.month {
            self.year = now.year();
            self.month = now.month();
            self.count = 0;
        }
    }

    fn next_reset(&self) -> DateTime<Utc> {
        let start_of_month = Utc
            .with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        start_of_month
            .checked_add_months(Months::new(1))
            .unwrap_or(start_of_month)
    }
}

struct TenantState {
    limits: QuotaLimits,
    query_bucket: TokenBucket,
    api_bucket: TokenBucket,
    monthly_queries: MonthlyCounter,
    monthly_api_calls: MonthlyCounter,
    concepts_used: i64,
    storage_used: i64,
}

impl TenantState {
    fn new(limits: QuotaLimits) -> Self {
        let now_i = Instant::now();
        let now_u = Utc::now();
        Self {
            query_bucket: TokenBucket::new(
                limits.queries_per_minute,
                Duration::from_secs(60),
                now_i,
            ),
            api_bucket: TokenBucket::new(
                limits.api_calls_per_second,
                Duration::from_secs(1),
                now_i,
            ),
            monthly_queries: MonthlyCounter::new(now_u),
            monthly_api_calls: MonthlyCounter::new(now_u),
            concepts_used: 0,
            storage_used: 0,
            limits,
        }
    }
}

/// Per-tenant quota gate.
pub struct QuotaGate {
    tenants: Mutex<HashMap<String, TenantState>>,
}

impl QuotaGate {
    pub fn new() -> Self {
        Self {
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tenant with explicit limits.
    pub async fn register(&self, tenant: impl Into<String>, limits: QuotaLimits) {
        self.tenants
            .lock()
            .await
            .insert(tenant.into(), TenantState::new(limits));
    }

    /// Register a tenant on the free tier.
    pub async fn register_default(&self, tenant: impl Into<String>) {
        self.register(tenant, QuotaLimits::free()).await;
    }

    /// Limits for a tenant.
    pub async fn limits(&self, tenant: &str) -> Result<QuotaLimits> {
        self.tenants
            .lock()
            .await
            .get(tenant)
            .map(|state| state.limits.clone())
            .ok_or_else(|| Error::UnknownTenant(tenant.to_string()))
    }

    /// Capacity check for bulk resources (`concepts`, `storage`).
    pub async fn check_capacity(
        &self,
        tenant: &str,
        resource: QuotaResource,
        delta: i64,
    ) -> Result<()> {
        let tenants = self.tenants.lock().await;
        let state = tenants
            .get(tenant)
            .ok_or_else(|| Error::UnknownTenant(tenant.to_string()))?;

        let (current, limit, name) = match resource {
            QuotaResource::Concepts => {
                (state.concepts_used, state.limits.max_concepts, "concepts")
            }
            QuotaResource::Storage => (
                state.storage_used,
                state.limits.max_storage_bytes,
                "storage",
            ),
            other => {
                return Err(Error::InvalidInput(format!(
                    "{} is not a capacity resource",
                    other
                )))
            }
        };

        if current + delta > limit {
            return Err(Error::QuotaExceeded {
                resource: name.to_string(),
                reset_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Record consumption of a bulk resource (negative delta frees it).
    pub async fn record_capacity(
        &self,
        tenant: &str,
        resource: QuotaResource,
        delta: i64,
    ) -> Result<()> {
        let mut tenants = self.tenants.lock().await;
        let state = tenants
            .get_mut(tenant)
            .ok_or_else(|| Error::UnknownTenant(tenant.to_string()))?;
        match resource {
            QuotaResource::Concepts => {
                state.concepts_used = (state.concepts_used + delta).max(0);
            }
            QuotaResource::Storage => {
                state.storage_used = (state.storage_used + delta).max(0);
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "{} is not a capacity resource",
                    other
                )))
            }
        }
        Ok(())
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdmissionControl for QuotaGate {
    async fn admit(&self, tenant: &str, resource: QuotaResource) -> Result<()> {
        let mut tenants = self.tenants.lock().await;
        let state = tenants
            .get_mut(tenant)
            .ok_or_else(|| Error::UnknownTenant(tenant.to_string()))?;

        let now_i = Instant::now();
        let now_u = Utc::now();

        let (bucket, monthly, monthly_limit, window_name, month_name) = match resource {
            QuotaResource::Queries => (
                &mut state.query_bucket,
                &mut state.monthly_queries,
                state.limits.max_queries_per_month,
                "queries_per_minute",
                "queries_per_month",
            ),
            QuotaResource::ApiCalls => (
                &mut state.api_bucket,
                &mut state.monthly_api_calls,
                state.limits.max_api_calls_per_month,
                "api_calls_per_second",
                "api_calls_per_month",
            ),
            other => {
                return Err(Error::InvalidInput(format!(
                    "{} is not an admission resource",
                    other
                )))
            }
        };

        // Check both windows before consuming either, so refusal leaves the
        // counters untouched.
        if !bucket.available(now_i) {
            let reset_at = now_u
                + chrono::Duration::from_std(bucket.retry_after())
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            debug!(tenant, resource = window_name, "Admission refused");
            return Err(Error::QuotaExceeded {
                resource: window_name.to_string(),
                reset_at,
            });
        }

        monthly.roll(now_u);
        if monthly.count >= monthly_limit {
            debug!(tenant, resource = month_name, "Admission refused");
            return Err(Error::QuotaExceeded {
                resource: month_name.to_string(),
                reset_at: monthly.next_reset(),
            });
        }

        bucket.take();
        monthly.count += 1;
        Ok(())
    }
}
