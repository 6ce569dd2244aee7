use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as BtleScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::radio::{
    Advertisement, ConnectionEvent, DiscoveryEvent, EventStream, RadioTransport, ScanOptions,
    WriteMode,
};
use crate::error::TransportError;
use crate::protocol::{self, EndpointId};

const CONNECTION_EVENT_CAPACITY: usize = 16;

/// Radio backed by the first `btleplug` adapter.
#[derive(Debug)]
pub(crate) struct BtleplugRadio {
    adapter: Adapter,
    connected: Mutex<Option<ConnectedPeripheral>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ConnectionEvent>,
    event_pump: JoinHandle<()>,
}

#[derive(Debug)]
struct ConnectedPeripheral {
    peripheral: Peripheral,
    characteristics: HashMap<EndpointId, Characteristic>,
}

impl BtleplugRadio {
    /// Opens the first BLE adapter and starts forwarding connection events.
    #[instrument(level = "debug")]
    pub(crate) async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let Some(adapter) = manager.adapters().await?.into_iter().next() else {
            return Err(TransportError::NoAdapters);
        };
        info!(adapter = %adapter.adapter_info().await?, "using BLE adapter");

        let (events, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        let mut central_events = adapter.events().await?;
        let forward = events.clone();
        let event_pump = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let mapped = match event {
                    CentralEvent::DeviceConnected(id) => ConnectionEvent::Connected {
                        peripheral_id: id.to_string(),
                    },
                    CentralEvent::DeviceDisconnected(id) => ConnectionEvent::Disconnected {
                        peripheral_id: id.to_string(),
                    },
                    _ => continue,
                };
                let _ = forward.send(mapped);
            }
        });

        Ok(Self {
            adapter,
            connected: Mutex::new(None),
            scan_task: Mutex::new(None),
            events,
            event_pump,
        })
    }

    async fn with_characteristic<T, F, Fut>(
        &self,
        endpoint: EndpointId,
        action: F,
    ) -> Result<T, TransportError>
    where
        F: FnOnce(Peripheral, Characteristic) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let (peripheral, characteristic) = {
            let connected = self.connected.lock().await;
            let Some(connected) = connected.as_ref() else {
                return Err(TransportError::NotConnected);
            };
            let characteristic = connected
                .characteristics
                .get(&endpoint)
                .cloned()
                .ok_or(TransportError::MissingEndpoint { endpoint })?;
            (connected.peripheral.clone(), characteristic)
        };
        action(peripheral, characteristic).await
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == peripheral_id)
            .ok_or_else(|| TransportError::UnknownPeripheral {
                id: peripheral_id.to_string(),
            })
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.event_pump.abort();
    }
}

#[async_trait]
impl RadioTransport for BtleplugRadio {
    #[instrument(skip(self, options), level = "debug", fields(services = ?options.services()))]
    async fn scan(
        &self,
        options: ScanOptions,
    ) -> Result<EventStream<DiscoveryEvent>, TransportError> {
        let services = options
            .services()
            .iter()
            .map(|value| {
                Uuid::parse_str(value).map_err(|_| TransportError::InvalidServiceUuid {
                    value: value.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut central_events = self.adapter.events().await?;
        self.adapter
            .start_scan(BtleScanFilter { services })
            .await?;

        let adapter = self.adapter.clone();
        let allow_duplicates = options.allow_duplicates();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            while let Some(event) = central_events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                if !allow_duplicates && !seen.insert(id.clone()) {
                    continue;
                }
                let Some(event) = discovery_event(&adapter, &id).await else {
                    continue;
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "info")]
    async fn connect(&self, peripheral_id: &str) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(peripheral_id).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristics = characteristics_by_endpoint(&peripheral);
        if !characteristics.contains_key(&EndpointId::ControlPoint) {
            if let Err(error) = peripheral.disconnect().await {
                debug!(?error, "failed to disconnect after endpoint validation error");
            }
            return Err(TransportError::MissingEndpoint {
                endpoint: EndpointId::ControlPoint,
            });
        }

        info!(
            %peripheral_id,
            endpoints = characteristics.len(),
            "connected to peripheral"
        );
        *self.connected.lock().await = Some(ConnectedPeripheral {
            peripheral,
            characteristics,
        });
        Ok(())
    }

    #[instrument(skip(self), level = "info")]
    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(connected) = self.connected.lock().await.take() else {
            return Ok(());
        };
        if connected.peripheral.is_connected().await? {
            connected.peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError> {
        self.with_characteristic(endpoint, |peripheral, characteristic| async move {
            Ok(peripheral.read(&characteristic).await?)
        })
        .await
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, ?mode, len = payload.len()))]
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.with_characteristic(endpoint, |peripheral, characteristic| async move {
            peripheral
                .write(&characteristic, payload, write_type)
                .await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), level = "debug", fields(%endpoint))]
    async fn subscribe_notify(
        &self,
        endpoint: EndpointId,
    ) -> Result<EventStream<Vec<u8>>, TransportError> {
        self.with_characteristic(endpoint, |peripheral, characteristic| async move {
            let notifications = peripheral.notifications().await?;
            peripheral.subscribe(&characteristic).await?;
            let uuid = characteristic.uuid;
            let stream = notifications.filter_map(move |notification| {
                (notification.uuid == uuid).then_some(notification.value)
            });
            Ok(Box::pin(stream) as EventStream<Vec<u8>>)
        })
        .await
    }

    fn connection_events(&self) -> EventStream<ConnectionEvent> {
        Box::pin(BroadcastStream::new(self.events.subscribe()).filter_map(Result::ok))
    }
}

async fn discovery_event(adapter: &Adapter, id: &PeripheralId) -> Option<DiscoveryEvent> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(error) => {
            trace!(?error, "discovered peripheral vanished");
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(error) => {
            warn!(?error, "failed to read advertisement properties");
            return None;
        }
    };
    let rssi = properties.rssi?;
    Some(DiscoveryEvent::new(
        id.to_string(),
        rssi,
        advertisement_from_properties(&properties),
    ))
}

fn advertisement_from_properties(properties: &PeripheralProperties) -> Advertisement {
    let manufacturer_data = properties
        .manufacturer_data
        .iter()
        .min_by_key(|(company_id, _)| **company_id)
        .map(|(company_id, payload)| {
            let mut data = Vec::with_capacity(payload.len() + 2);
            data.extend_from_slice(&company_id.to_le_bytes());
            data.extend_from_slice(payload);
            data
        });
    let service_data = properties
        .service_data
        .iter()
        .map(|(uuid, payload)| (uuid.to_string().to_lowercase(), payload.clone()))
        .collect();
    let service_uuids = properties
        .services
        .iter()
        .map(|uuid| uuid.to_string().to_lowercase())
        .collect();

    Advertisement::builder()
        .maybe_manufacturer_data(manufacturer_data)
        .service_data(service_data)
        .maybe_local_name(properties.local_name.clone())
        .service_uuids(service_uuids)
        .build()
}

fn characteristics_by_endpoint(peripheral: &Peripheral) -> HashMap<EndpointId, Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .filter_map(|characteristic| {
            protocol::endpoint_for_uuid(&characteristic.uuid.to_string())
                .map(|endpoint| (endpoint, characteristic))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use btleplug::api::bleuuid::uuid_from_u16;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn manufacturer_data_keeps_company_id_prefix() {
        let mut properties = PeripheralProperties::default();
        properties
            .manufacturer_data
            .insert(0x004c, vec![0x02, 0x15, 0x6d, 0x22]);
        properties
            .service_data
            .insert(uuid_from_u16(0xfeaa), vec![0x10, 0x00]);
        properties.local_name = Some("RigCom".to_string());

        let advertisement = advertisement_from_properties(&properties);

        assert_eq!(
            Some([0x4c, 0x00, 0x02, 0x15, 0x6d, 0x22].as_slice()),
            advertisement.manufacturer_data()
        );
        assert_eq!(
            Some(&vec![0x10, 0x00]),
            advertisement
                .service_data()
                .get("0000feaa-0000-1000-8000-00805f9b34fb")
        );
        assert_eq!(Some("RigCom"), advertisement.local_name());
    }
}
