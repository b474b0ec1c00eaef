//! Reference-data access and short-TTL caches
//!
//! The only process-lifetime state in the engine: a canonical stock/sector
//! snapshot and a trading-calendar snapshot. Both are read-heavy, refreshed
//! by atomic `Arc` swap, and never mutated in place. Readers clone the
//! current `Arc`; a refresh in progress never blocks a read.

use crate::error::{EngineError, Result};
use crate::models::{SectorRecord, StockRecord};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Read-only accessor for the canonical (name, code, type) tuples.
/// Backed by an external reference store; the engine never writes to it.
#[async_trait::async_trait]
pub trait ReferenceDataSource: Send + Sync {
    async fn load_stocks(&self) -> Result<Vec<StockRecord>>;
    async fn load_sectors(&self) -> Result<Vec<SectorRecord>>;
    /// As-of timestamp of the store contents, for cache-validity checks.
    async fn as_of(&self) -> Result<DateTime<Utc>>;
}

/// Source of trading sessions, ascending. Sessions are dates the reference
/// market was open and has data for.
#[async_trait::async_trait]
pub trait CalendarSource: Send + Sync {
    async fn load_sessions(&self) -> Result<Vec<NaiveDate>>;
}

//
// ================= Snapshots =================
//

/// Immutable view of the canonical entity tables.
#[derive(Debug, Default)]
pub struct ReferenceSnapshot {
    pub stocks: Vec<StockRecord>,
    pub sectors: Vec<SectorRecord>,
    stocks_by_name: HashMap<String, usize>,
    stocks_by_code: HashMap<String, usize>,
    stocks_by_bare_code: HashMap<String, usize>,
    sectors_by_name: HashMap<String, usize>,
    sectors_by_code: HashMap<String, usize>,
    pub as_of: Option<DateTime<Utc>>,
}

impl ReferenceSnapshot {
    pub fn new(
        stocks: Vec<StockRecord>,
        sectors: Vec<SectorRecord>,
        as_of: Option<DateTime<Utc>>,
    ) -> Self {
        let mut snap = Self {
            stocks,
            sectors,
            as_of,
            ..Default::default()
        };
        for (i, s) in snap.stocks.iter().enumerate() {
            snap.stocks_by_name.insert(s.name.clone(), i);
            snap.stocks_by_code.insert(s.code.clone(), i);
            if let Some(bare) = s.code.split('.').next() {
                snap.stocks_by_bare_code.insert(bare.to_string(), i);
            }
        }
        for (i, s) in snap.sectors.iter().enumerate() {
            snap.sectors_by_name.insert(s.name.clone(), i);
            snap.sectors_by_code.insert(s.code.clone(), i);
        }
        snap
    }

    pub fn stock_by_name(&self, name: &str) -> Option<&StockRecord> {
        self.stocks_by_name.get(name).map(|&i| &self.stocks[i])
    }

    pub fn stock_by_code(&self, code: &str) -> Option<&StockRecord> {
        self.stocks_by_code.get(code).map(|&i| &self.stocks[i])
    }

    pub fn stock_by_bare_code(&self, bare: &str) -> Option<&StockRecord> {
        self.stocks_by_bare_code.get(bare).map(|&i| &self.stocks[i])
    }

    pub fn sector_by_name(&self, name: &str) -> Option<&SectorRecord> {
        self.sectors_by_name.get(name).map(|&i| &self.sectors[i])
    }

    pub fn sector_by_code(&self, code: &str) -> Option<&SectorRecord> {
        self.sectors_by_code.get(code).map(|&i| &self.sectors[i])
    }

    /// All stock names containing `span`, in table order.
    pub fn stock_names_containing(&self, span: &str) -> Vec<&str> {
        self.stocks
            .iter()
            .filter(|s| s.name.contains(span))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Immutable view of the trading calendar. Sessions are sorted ascending.
#[derive(Debug, Default)]
pub struct CalendarSnapshot {
    pub sessions: Vec<NaiveDate>,
}

impl CalendarSnapshot {
    pub fn new(mut sessions: Vec<NaiveDate>) -> Self {
        sessions.sort_unstable();
        sessions.dedup();
        Self { sessions }
    }

    pub fn is_session(&self, date: NaiveDate) -> bool {
        self.sessions.binary_search(&date).is_ok()
    }

    /// Latest session on or before `date`.
    pub fn latest_on_or_before(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.sessions.binary_search(&date) {
            Ok(i) => Some(self.sessions[i]),
            Err(0) => None,
            Err(i) => Some(self.sessions[i - 1]),
        }
    }

    /// Walk `n` sessions backward from `from` (which must be a session;
    /// n = 0 returns `from` itself).
    pub fn sessions_back(&self, from: NaiveDate, n: usize) -> Option<NaiveDate> {
        let idx = self.sessions.binary_search(&from).ok()?;
        idx.checked_sub(n).map(|i| self.sessions[i])
    }

    /// First session on or after `date` (forward snap).
    pub fn next_on_or_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.sessions.binary_search(&date) {
            Ok(i) => Some(self.sessions[i]),
            Err(i) => self.sessions.get(i).copied(),
        }
    }
}

//
// ================= Caches =================
//

struct Timestamped<T> {
    value: Arc<T>,
    fetched_at: std::time::Instant,
}

/// Short-TTL cache over the reference store. Refresh swaps the whole
/// snapshot atomically; explicit invalidation forces a reload on next read.
pub struct ReferenceCache {
    source: Arc<dyn ReferenceDataSource>,
    ttl: Duration,
    current: RwLock<Option<Timestamped<ReferenceSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl ReferenceCache {
    pub fn new(source: Arc<dyn ReferenceDataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current snapshot, refreshing when the TTL elapsed. A concurrent
    /// refresh in progress never blocks this call: the stale snapshot is
    /// served until the swap lands.
    pub async fn snapshot(&self) -> Result<Arc<ReferenceSnapshot>> {
        if let Some(entry) = self.current.read().await.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
            // Stale: serve it unless we can grab the refresh lock for free.
            if self.refresh_lock.try_lock().is_err() {
                return Ok(entry.value.clone());
            }
        }
        self.refresh().await
    }

    pub async fn invalidate(&self) {
        let mut guard = self.current.write().await;
        *guard = None;
        debug!("reference cache invalidated");
    }

    async fn refresh(&self) -> Result<Arc<ReferenceSnapshot>> {
        let _guard = self.refresh_lock.lock().await;

        // Another refresher may have landed while we waited.
        if let Some(entry) = self.current.read().await.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }

        let stocks = self.source.load_stocks().await?;
        let sectors = self.source.load_sectors().await?;
        let as_of = self.source.as_of().await.ok();
        let snapshot = Arc::new(ReferenceSnapshot::new(stocks, sectors, as_of));

        debug!(
            stocks = snapshot.stocks.len(),
            sectors = snapshot.sectors.len(),
            "reference snapshot refreshed"
        );

        let mut guard = self.current.write().await;
        *guard = Some(Timestamped {
            value: snapshot.clone(),
            fetched_at: std::time::Instant::now(),
        });
        Ok(snapshot)
    }
}

/// TTL cache for the trading calendar. The latest-session value changes at
/// most once per calendar day, so staleness within the TTL is harmless.
pub struct CalendarCache {
    source: Arc<dyn CalendarSource>,
    ttl: Duration,
    current: RwLock<Option<Timestamped<CalendarSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl CalendarCache {
    pub fn new(source: Arc<dyn CalendarSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> Result<Arc<CalendarSnapshot>> {
        if let Some(entry) = self.current.read().await.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
            if self.refresh_lock.try_lock().is_err() {
                return Ok(entry.value.clone());
            }
        }
        self.refresh().await
    }

    pub async fn invalidate(&self) {
        let mut guard = self.current.write().await;
        *guard = None;
    }

    async fn refresh(&self) -> Result<Arc<CalendarSnapshot>> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(entry) = self.current.read().await.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }

        let sessions = self.source.load_sessions().await?;
        if sessions.is_empty() {
            warn!("calendar source returned no sessions");
            return Err(EngineError::ReferenceUnavailable(
                "trading calendar is empty".to_string(),
            ));
        }
        let snapshot = Arc::new(CalendarSnapshot::new(sessions));

        let mut guard = self.current.write().await;
        *guard = Some(Timestamped {
            value: snapshot.clone(),
            fetched_at: std::time::Instant::now(),
        });
        Ok(snapshot)
    }
}

//
// ================= In-memory fixtures =================
//

/// Fixed reference source for tests and the demo binary.
pub struct InMemoryReferenceSource {
    stocks: Vec<StockRecord>,
    sectors: Vec<SectorRecord>,
    as_of: DateTime<Utc>,
}

impl InMemoryReferenceSource {
    pub fn new(stocks: Vec<StockRecord>, sectors: Vec<SectorRecord>) -> Self {
        Self {
            stocks,
            sectors,
            as_of: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
impl ReferenceDataSource for InMemoryReferenceSource {
    async fn load_stocks(&self) -> Result<Vec<StockRecord>> {
        Ok(self.stocks.clone())
    }

    async fn load_sectors(&self) -> Result<Vec<SectorRecord>> {
        Ok(self.sectors.clone())
    }

    async fn as_of(&self) -> Result<DateTime<Utc>> {
        Ok(self.as_of)
    }
}

/// Fixed calendar for tests and the demo binary.
pub struct FixedCalendarSource {
    sessions: Vec<NaiveDate>,
}

impl FixedCalendarSource {
    pub fn new(sessions: Vec<NaiveDate>) -> Self {
        Self { sessions }
    }

    /// Weekday-only calendar spanning `[from, to]`, a serviceable stand-in
    /// when the real exchange calendar is not wired up.
    pub fn weekdays(from: NaiveDate, to: NaiveDate) -> Self {
        use chrono::Datelike;
        let mut sessions = Vec::new();
        let mut day = from;
        while day <= to {
            if !matches!(day.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                sessions.push(day);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl CalendarSource for FixedCalendarSource {
    async fn load_sessions(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.sessions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_calendar_snapshot_lookups() {
        let snap = CalendarSnapshot::new(vec![
            d(2025, 7, 1),
            d(2025, 7, 2),
            d(2025, 7, 3),
            d(2025, 7, 7),
        ]);

        assert!(snap.is_session(d(2025, 7, 2)));
        assert!(!snap.is_session(d(2025, 7, 5)));
        assert_eq!(snap.latest_on_or_before(d(2025, 7, 6)), Some(d(2025, 7, 3)));
        assert_eq!(snap.latest_on_or_before(d(2025, 7, 7)), Some(d(2025, 7, 7)));
        assert_eq!(snap.latest_on_or_before(d(2025, 6, 30)), None);
        assert_eq!(snap.sessions_back(d(2025, 7, 7), 1), Some(d(2025, 7, 3)));
        assert_eq!(snap.sessions_back(d(2025, 7, 7), 10), None);
        assert_eq!(snap.next_on_or_after(d(2025, 7, 5)), Some(d(2025, 7, 7)));
    }

    #[tokio::test]
    async fn test_reference_cache_swap() {
        let source = Arc::new(InMemoryReferenceSource::new(
            vec![StockRecord {
                name: "贵州茅台".to_string(),
                code: "600519.SH".to_string(),
            }],
            vec![],
        ));
        let cache = ReferenceCache::new(source, Duration::from_secs(3600));

        let snap = cache.snapshot().await.unwrap();
        assert!(snap.stock_by_name("贵州茅台").is_some());
        assert_eq!(
            snap.stock_by_bare_code("600519").unwrap().code,
            "600519.SH"
        );

        // Second read serves the same snapshot without a reload.
        let again = cache.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&snap, &again));

        cache.invalidate().await;
        let fresh = cache.snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&snap, &fresh));
    }
}
