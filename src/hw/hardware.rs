use std::sync::Arc;

use tracing::info;

use super::btleplug_backend::BtleplugRadio;
use super::fake_backend::{FakeRig, FakeRigConfig};
use super::radio::RadioTransport;
use super::serial::SerialTransport;
use super::serial_backend::TokioSerialTransport;
use crate::error::TransportError;

/// Runtime hardware backend selection.
#[derive(Debug, Clone)]
pub enum HardwareBackend {
    Real,
    Fake(FakeRigConfig),
}

/// The radio and serial adapters shared by every session of one run.
#[derive(Debug, Clone)]
pub struct Hardware {
    radio: Arc<dyn RadioTransport>,
    serial: Arc<dyn SerialTransport>,
}

impl Hardware {
    #[must_use]
    pub fn new(radio: Arc<dyn RadioTransport>, serial: Arc<dyn SerialTransport>) -> Self {
        Self { radio, serial }
    }

    /// Both transports backed by one simulated rig.
    #[must_use]
    pub fn simulated(rig: &FakeRig) -> Self {
        Self::new(Arc::new(rig.clone()), Arc::new(rig.clone()))
    }

    #[must_use]
    pub fn radio(&self) -> Arc<dyn RadioTransport> {
        Arc::clone(&self.radio)
    }

    #[must_use]
    pub fn serial(&self) -> Arc<dyn SerialTransport> {
        Arc::clone(&self.serial)
    }
}

/// Opens the transports for the selected backend.
///
/// # Errors
///
/// Returns [`TransportError`] if the BLE adapter cannot be opened.
pub async fn hardware_from_backend(backend: HardwareBackend) -> Result<Hardware, TransportError> {
    let hardware = match backend {
        HardwareBackend::Real => Hardware::new(
            Arc::new(BtleplugRadio::new().await?),
            Arc::new(TokioSerialTransport),
        ),
        HardwareBackend::Fake(config) => {
            info!("using simulated rig");
            Hardware::simulated(&FakeRig::new(config))
        }
    };
    Ok(hardware)
}
