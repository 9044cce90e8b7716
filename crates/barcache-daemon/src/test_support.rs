//! Fake vendors and fixtures shared by the unit tests.

use async_trait::async_trait;
use barcache_fetch::{BarRequest, FallbackClient, Vendor, VendorBars, VendorError};
use barcache_store::{CacheStore, SymbolRecord};
use barcache_types::{Bar, SymbolCode, TimeWindow};
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub(crate) fn code(s: &str) -> SymbolCode {
    SymbolCode::parse(s).unwrap()
}

/// Tuesday 2024-01-02, one day.
pub(crate) fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

pub(crate) fn ensure(store: &CacheStore, codes: &[&str]) -> Vec<SymbolRecord> {
    codes
        .iter()
        .map(|c| store.ensure_symbol(&code(c)).unwrap())
        .collect()
}

pub(crate) fn client(vendors: &[&Arc<FakeVendor>]) -> FallbackClient {
    FallbackClient::new(
        vendors
            .iter()
            .map(|v| Arc::clone(v) as Arc<dyn Vendor>)
            .collect(),
    )
}

/// Holds a vendor call open until the test releases it.
#[derive(Debug)]
pub(crate) struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// Waits until a call is parked at the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one parked call through.
    pub(crate) fn open(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug)]
pub(crate) struct FakeVendor {
    name: &'static str,
    bar: Option<Bar>,
    missing: HashSet<SymbolCode>,
    rate_limited: bool,
    gate: Option<Arc<Gate>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<BarRequest>>,
}

impl FakeVendor {
    /// A vendor returning one bar at the window start for every symbol.
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            bar: None,
            missing: HashSet::new(),
            rate_limited: false,
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_bar(mut self, bar: Bar) -> Self {
        self.bar = Some(bar);
        self
    }

    /// Symbols the vendor has no data for and rejects on validation.
    pub(crate) fn without(mut self, codes: &[&str]) -> Self {
        self.missing.extend(codes.iter().map(|c| code(c)));
        self
    }

    pub(crate) fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    pub(crate) fn gated(mut self, gate: &Arc<Gate>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    pub(crate) fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<BarRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vendor for FakeVendor {
    fn name(&self) -> &str {
        self.name
    }

    fn max_batch_size(&self) -> usize {
        100
    }

    async fn fetch_bars(&self, request: &BarRequest) -> Result<VendorBars, VendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if self.rate_limited {
            return Err(VendorError::RateLimited);
        }

        let bar = self
            .bar
            .unwrap_or_else(|| Bar::new(request.window.start, 1.0, 2.0, 0.5, 1.5, 100.0));
        Ok(request
            .symbols
            .iter()
            .filter(|s| !self.missing.contains(*s))
            .map(|s| (s.clone(), vec![bar]))
            .collect())
    }

    async fn validate_symbol(&self, symbol: &SymbolCode) -> Result<bool, VendorError> {
        Ok(!self.missing.contains(symbol))
    }
}
