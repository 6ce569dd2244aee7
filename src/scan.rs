use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;
use crate::hw::{Advertisement, DiscoveryEvent, RadioTransport, ScanOptions};
use crate::utils::format_hex;

/// Default time allowed to locate the DUT before a scenario starts.
pub const DEFAULT_FIND_TIMEOUT: Duration = Duration::from_secs(20);
/// Weakest signal accepted while locating the DUT, in dBm.
pub const DEFAULT_FIND_RSSI_FLOOR: i16 = -68;
/// Default time allowed for an advertisement check.
pub const DEFAULT_BEACON_SCAN_TIMEOUT: Duration = Duration::from_secs(50);
/// Weakest signal accepted for advertisement checks, in dBm.
pub const DEFAULT_BEACON_RSSI_FLOOR: i16 = -65;
/// Samples averaged per RSSI window.
pub const DEFAULT_RSSI_WINDOW_LEN: usize = 50;
/// Smallest accepted drop between two RSSI windows, in dB.
pub const DEFAULT_MIN_RSSI_DELTA_DB: f64 = 3.0;

/// Advertisement field a scan pattern is searched in.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, derive_more::Display)]
pub enum AdvertisementField {
    #[default]
    #[display("manufacturer data")]
    ManufacturerData,
    #[display("service data")]
    ServiceData,
}

/// Advertisement predicate used by scan steps.
#[derive(Debug, Clone, Default, Eq, PartialEq, Builder)]
pub struct ScanFilter {
    /// Byte sequence searched for in the selected field; empty accepts any
    /// advertisement carrying the field.
    #[builder(default, into)]
    pattern: Vec<u8>,
    #[builder(default)]
    field: AdvertisementField,
    rssi_floor: Option<i16>,
    #[builder(into)]
    peripheral_id: Option<String>,
}

impl ScanFilter {
    #[must_use]
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    #[must_use]
    pub fn field(&self) -> AdvertisementField {
        self.field
    }

    #[must_use]
    pub fn rssi_floor(&self) -> Option<i16> {
        self.rssi_floor
    }

    #[must_use]
    pub fn peripheral_id(&self) -> Option<&str> {
        self.peripheral_id.as_deref()
    }

    /// Whether `event` satisfies the filter. The RSSI floor is checked first;
    /// events without the selected field never match.
    #[must_use]
    pub fn matches(&self, event: &DiscoveryEvent) -> bool {
        if self.rssi_floor.is_some_and(|floor| event.rssi() < floor) {
            return false;
        }
        if self
            .peripheral_id
            .as_deref()
            .is_some_and(|id| id != event.peripheral_id())
        {
            return false;
        }
        self.field_matches(event.advertisement())
    }

    fn field_matches(&self, advertisement: &Advertisement) -> bool {
        match self.field {
            AdvertisementField::ManufacturerData => advertisement
                .manufacturer_data()
                .is_some_and(|data| contains_pattern(data, &self.pattern)),
            AdvertisementField::ServiceData => advertisement
                .service_data()
                .values()
                .any(|data| contains_pattern(data, &self.pattern)),
        }
    }
}

fn contains_pattern(haystack: &[u8], pattern: &[u8]) -> bool {
    pattern.is_empty()
        || haystack
            .windows(pattern.len())
            .any(|window| window == pattern)
}

/// Runs one scan until `accept` takes an event or `timeout` elapses.
///
/// The scan is always stopped before returning.
async fn scan_until<F>(
    radio: &dyn RadioTransport,
    options: ScanOptions,
    timeout: Duration,
    mut accept: F,
) -> Result<Option<DiscoveryEvent>, TransportError>
where
    F: FnMut(&DiscoveryEvent) -> bool,
{
    let mut events = radio.scan(options).await?;
    let found = tokio::time::timeout(timeout, async {
        while let Some(event) = events.next().await {
            if accept(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();
    drop(events);

    radio.stop_scan().await?;
    Ok(found)
}

/// Progress of a [`ScanMatcher`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Matched,
    TimedOut,
}

/// Watches discovery events for one advertisement pattern.
#[derive(Debug, Clone)]
pub struct ScanMatcher {
    filter: ScanFilter,
    services: Vec<String>,
    state: ScanState,
}

impl ScanMatcher {
    #[must_use]
    pub fn new(filter: ScanFilter, services: Vec<String>) -> Self {
        Self {
            filter,
            services,
            state: ScanState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    #[must_use]
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Feeds one event; returns `true` once the matcher has matched.
    pub fn observe(&mut self, event: &DiscoveryEvent) -> bool {
        if self.state == ScanState::Scanning && self.filter.matches(event) {
            debug!(
                peripheral_id = event.peripheral_id(),
                rssi = event.rssi(),
                "advertisement matched"
            );
            self.state = ScanState::Matched;
        }
        self.state == ScanState::Matched
    }

    /// Scans with duplicates allowed until a match or `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the scan cannot be started or stopped.
    #[instrument(
        skip(self, radio),
        level = "info",
        fields(
            field = %self.filter.field(),
            pattern = %format_hex(self.filter.pattern()),
            timeout_ms = timeout.as_millis()
        )
    )]
    pub async fn run(
        &mut self,
        radio: &dyn RadioTransport,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        self.state = ScanState::Scanning;
        let options = ScanOptions::builder()
            .services(self.services.clone())
            .allow_duplicates(true)
            .build();
        let found = scan_until(radio, options, timeout, |event| self.observe(event)).await;

        let matched = match found {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(error) => {
                self.state = ScanState::TimedOut;
                return Err(error);
            }
        };
        if !matched {
            info!("no matching advertisement before the deadline");
            self.state = ScanState::TimedOut;
        }
        Ok(matched)
    }

    /// Callback form of [`run`](Self::run); scan errors report `false`.
    pub fn start<F>(
        mut self,
        radio: Arc<dyn RadioTransport>,
        timeout: Duration,
        on_result: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        tokio::spawn(async move {
            let matched = match self.run(radio.as_ref(), timeout).await {
                Ok(matched) => matched,
                Err(error) => {
                    warn!(?error, "advertisement scan failed");
                    false
                }
            };
            on_result(matched);
        })
    }
}

/// A peripheral located by [`find_device`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FoundDevice {
    peripheral_id: String,
    local_name: Option<String>,
    rssi: i16,
}

impl FoundDevice {
    #[must_use]
    pub fn peripheral_id(&self) -> &str {
        &self.peripheral_id
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn rssi(&self) -> i16 {
        self.rssi
    }
}

/// Criteria for locating the DUT.
#[derive(Debug, Clone, Builder)]
pub struct DeviceQuery {
    /// Exact advertised local name; `None` accepts any name.
    #[builder(into)]
    adv_name: Option<String>,
    /// Peripheral id (the MAC address on most platforms), compared
    /// case-insensitively.
    #[builder(into)]
    address: Option<String>,
    #[builder(default)]
    services: Vec<String>,
    #[builder(default = DEFAULT_FIND_RSSI_FLOOR)]
    rssi_floor: i16,
    #[builder(default = DEFAULT_FIND_TIMEOUT)]
    timeout: Duration,
}

impl DeviceQuery {
    fn accepts(&self, event: &DiscoveryEvent) -> bool {
        if event.rssi() < self.rssi_floor {
            return false;
        }
        if let Some(address) = &self.address
            && !address.eq_ignore_ascii_case(event.peripheral_id())
        {
            return false;
        }
        match &self.adv_name {
            Some(name) => event.advertisement().local_name() == Some(name.as_str()),
            None => true,
        }
    }
}

/// Scans for the DUT and returns the first peripheral satisfying `query`.
///
/// # Errors
///
/// Returns [`TransportError`] if the scan cannot be started or stopped.
#[instrument(skip(radio, query), level = "info", fields(adv_name = ?query.adv_name, address = ?query.address))]
pub async fn find_device(
    radio: &dyn RadioTransport,
    query: &DeviceQuery,
) -> Result<Option<FoundDevice>, TransportError> {
    let options = ScanOptions::builder()
        .services(query.services.clone())
        .build();
    let found = scan_until(radio, options, query.timeout, |event| query.accepts(event)).await?;

    Ok(found.map(|event| {
        info!(
            peripheral_id = event.peripheral_id(),
            rssi = event.rssi(),
            "found device under test"
        );
        FoundDevice {
            peripheral_id: event.peripheral_id().to_string(),
            local_name: event.advertisement().local_name().map(str::to_string),
            rssi: event.rssi(),
        }
    }))
}

/// Progress of an [`RssiWindowMatcher`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum RssiWindowState {
    #[default]
    Idle,
    Accumulating { window: usize },
    Matched,
    TimedOut,
}

/// Averages RSSI over consecutive sample windows of one peripheral.
///
/// Each window is averaged on its own; nothing carries over between windows.
#[derive(Debug, Clone)]
pub struct RssiWindowMatcher {
    peripheral_id: String,
    services: Vec<String>,
    window_len: usize,
    window_count: usize,
    samples: Vec<i16>,
    averages: Vec<f64>,
    state: RssiWindowState,
}

impl RssiWindowMatcher {
    /// Two windows of [`DEFAULT_RSSI_WINDOW_LEN`] samples each.
    #[must_use]
    pub fn new(peripheral_id: impl Into<String>, services: Vec<String>) -> Self {
        Self::with_windows(peripheral_id, services, DEFAULT_RSSI_WINDOW_LEN, 2)
    }

    #[must_use]
    pub fn with_windows(
        peripheral_id: impl Into<String>,
        services: Vec<String>,
        window_len: usize,
        window_count: usize,
    ) -> Self {
        Self {
            peripheral_id: peripheral_id.into(),
            services,
            window_len: window_len.max(1),
            window_count: window_count.max(1),
            samples: Vec::new(),
            averages: Vec::new(),
            state: RssiWindowState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> RssiWindowState {
        self.state
    }

    /// Averages of the windows completed so far.
    #[must_use]
    pub fn averages(&self) -> &[f64] {
        &self.averages
    }

    /// Feeds one event; returns the window average when a window completes.
    pub fn observe(&mut self, event: &DiscoveryEvent) -> Option<f64> {
        let RssiWindowState::Accumulating { window } = self.state else {
            return None;
        };
        if event.peripheral_id() != self.peripheral_id {
            return None;
        }

        self.samples.push(event.rssi());
        if self.samples.len() < self.window_len {
            return None;
        }

        let total: f64 = self.samples.drain(..).map(f64::from).sum();
        #[allow(clippy::cast_precision_loss)]
        let average = total / self.window_len as f64;
        self.averages.push(average);
        debug!(window, average, "RSSI window complete");

        self.state = if self.averages.len() >= self.window_count {
            RssiWindowState::Matched
        } else {
            RssiWindowState::Accumulating { window: window + 1 }
        };
        Some(average)
    }

    /// Scans until the next window completes; `None` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the scan cannot be started or stopped.
    #[instrument(skip(self, radio), level = "info", fields(peripheral_id = %self.peripheral_id))]
    pub async fn run_window(
        &mut self,
        radio: &dyn RadioTransport,
        timeout: Duration,
    ) -> Result<Option<f64>, TransportError> {
        match self.state {
            RssiWindowState::Idle => {
                self.state = RssiWindowState::Accumulating { window: 0 };
            }
            RssiWindowState::Accumulating { .. } => {}
            RssiWindowState::Matched | RssiWindowState::TimedOut => return Ok(None),
        }

        let options = ScanOptions::builder()
            .services(self.services.clone())
            .allow_duplicates(true)
            .build();
        let mut average = None;
        let scanned = scan_until(radio, options, timeout, |event| {
            average = self.observe(event);
            average.is_some()
        })
        .await;

        match scanned {
            Ok(Some(_)) => Ok(average),
            Ok(None) => {
                self.samples.clear();
                self.state = RssiWindowState::TimedOut;
                Ok(None)
            }
            Err(error) => {
                self.state = RssiWindowState::TimedOut;
                Err(error)
            }
        }
    }

    /// Drop from the first window to the second, in dB.
    #[must_use]
    pub fn delta_db(&self) -> Option<f64> {
        match self.averages.as_slice() {
            [first, second, ..] => Some(first - second),
            _ => None,
        }
    }

    /// Whether the first window exceeded the second by at least
    /// `min_delta_db`.
    #[must_use]
    pub fn verdict(&self, min_delta_db: f64) -> bool {
        self.delta_db().is_some_and(|delta| delta >= min_delta_db)
    }
}
