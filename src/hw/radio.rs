use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bon::Builder;
use tokio_stream::Stream;

use crate::error::TransportError;
use crate::protocol::EndpointId;

/// Boxed event stream returned by transports.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Advertisement content as seen by the scanner.
///
/// Manufacturer data keeps the company identifier as its first two
/// little-endian bytes, matching the over-the-air layout.
#[derive(Debug, Clone, Default, Eq, PartialEq, Builder)]
pub struct Advertisement {
    manufacturer_data: Option<Vec<u8>>,
    #[builder(default)]
    service_data: HashMap<String, Vec<u8>>,
    #[builder(into)]
    local_name: Option<String>,
    #[builder(default)]
    service_uuids: Vec<String>,
}

impl Advertisement {
    #[must_use]
    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }

    #[must_use]
    pub fn service_data(&self) -> &HashMap<String, Vec<u8>> {
        &self.service_data
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn service_uuids(&self) -> &[String] {
        &self.service_uuids
    }
}

/// One discovered-peripheral event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveryEvent {
    peripheral_id: String,
    rssi: i16,
    advertisement: Advertisement,
}

impl DiscoveryEvent {
    #[must_use]
    pub fn new(peripheral_id: impl Into<String>, rssi: i16, advertisement: Advertisement) -> Self {
        Self {
            peripheral_id: peripheral_id.into(),
            rssi,
            advertisement,
        }
    }

    #[must_use]
    pub fn peripheral_id(&self) -> &str {
        &self.peripheral_id
    }

    #[must_use]
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    #[must_use]
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }
}

/// Connection state changes reported by the radio.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionEvent {
    Connected { peripheral_id: String },
    Disconnected { peripheral_id: String },
}

/// Scan parameters.
#[derive(Debug, Clone, Default, Eq, PartialEq, Builder)]
pub struct ScanOptions {
    /// Service UUIDs to narrow discovery; empty scans everything.
    #[builder(default)]
    services: Vec<String>,
    #[builder(default)]
    allow_duplicates: bool,
}

impl ScanOptions {
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    #[must_use]
    pub fn allow_duplicates(&self) -> bool {
        self.allow_duplicates
    }
}

/// BLE write mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// The one physical radio shared by every session of a run.
#[async_trait]
pub trait RadioTransport: Send + Sync + fmt::Debug {
    /// Starts scanning and returns the discovery stream.
    async fn scan(&self, options: ScanOptions)
    -> Result<EventStream<DiscoveryEvent>, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Connects to a discovered peripheral and resolves its GATT endpoints.
    async fn connect(&self, peripheral_id: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Enables notifications on `endpoint` and returns their payloads.
    async fn subscribe_notify(
        &self,
        endpoint: EndpointId,
    ) -> Result<EventStream<Vec<u8>>, TransportError>;

    /// Connection events from now on; subscribe before triggering a reset.
    fn connection_events(&self) -> EventStream<ConnectionEvent>;
}
