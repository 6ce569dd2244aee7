use async_trait::async_trait;

use super::catalog::ScenarioId;
use super::context::{Role, ScenarioContext, TestStep};
use super::hotswap::{connect_over_ble, enter_at_mode, ensure_connected, restore_and_leave_at_mode};
use super::runner::Scenario;
use crate::protocol::{DEFAULT_BEACON_UUID, IBEACON_PREFIX};
use crate::scan::{DEFAULT_BEACON_RSSI_FLOOR, ScanFilter};
use crate::session::{Channel, Operation};

/// Major and minor the AT scenario writes; AT takes them as hex digits.
const AT_TEST_MAJOR: u16 = 0x9876;
const AT_TEST_MINOR: u16 = 0x5234;
const AT_TEST_ADV_INTERVAL: u16 = 0x70;
const AT_TEST_RSSI_CALIBRATION: (i8, i8) = (-4, -29);

/// 23 bytes: a full first part and four bytes of the second.
const CUSTOM_BEACON_DATA: [u8; 23] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
    0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd,
];

/// iBeacon manufacturer data up to the given fields.
pub(crate) fn ibeacon_pattern(uuid: &[u8; 16], trailer: &[&[u8]]) -> Vec<u8> {
    let mut pattern = IBEACON_PREFIX.to_vec();
    pattern.extend_from_slice(uuid);
    for field in trailer {
        pattern.extend_from_slice(field);
    }
    pattern
}

pub(crate) fn beacon_scan(pattern: Vec<u8>) -> TestStep {
    TestStep::scan_for(
        ScanFilter::builder()
            .pattern(pattern)
            .rssi_floor(DEFAULT_BEACON_RSSI_FLOOR)
            .build(),
    )
}

fn ble(operation: Operation) -> TestStep {
    TestStep::expect_success(Role::Target, Channel::Ble, operation)
}

fn at(operation: Operation) -> TestStep {
    TestStep::expect_success(Role::Target, Channel::Serial, operation)
}

/// Restores the beacon fields over BLE and disconnects.
async fn restore_beacon_over_ble(context: &mut ScenarioContext) {
    if !ensure_connected(context).await {
        return;
    }
    context
        .run_steps(&[
            ble(Operation::SetBeaconUuid(DEFAULT_BEACON_UUID)),
            ble(Operation::SetBeaconMajor(0)),
            ble(Operation::SetBeaconMinor(0)),
            ble(Operation::SetBeaconEnable(false)),
            TestStep::Disconnect(Role::Target),
        ])
        .await;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BeaconPayload;

#[async_trait]
impl Scenario for BeaconPayload {
    fn id(&self) -> ScenarioId {
        ScenarioId::BeaconPayload
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let test = &context.config().test;
        let (uuid, major, minor) = (
            test.test_beacon_uuid().0,
            test.test_beacon_major(),
            test.test_beacon_minor(),
        );
        let pattern = ibeacon_pattern(&uuid, &[&major.to_be_bytes(), &minor.to_be_bytes()]);
        context
            .run_steps(&[
                ble(Operation::SetBeaconUuid(uuid)),
                ble(Operation::SetBeaconMajor(major)),
                ble(Operation::SetBeaconMinor(minor)),
                ble(Operation::SetBeaconEnable(true)),
                TestStep::Disconnect(Role::Target),
                beacon_scan(pattern),
            ])
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        restore_beacon_over_ble(context).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtBeaconSettings;

#[async_trait]
impl Scenario for AtBeaconSettings {
    fn id(&self) -> ScenarioId {
        ScenarioId::AtBeaconSettings
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        enter_at_mode(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let uuid = context.config().test.test_beacon_uuid().0;
        let (power, rssi) = AT_TEST_RSSI_CALIBRATION;
        let pattern = ibeacon_pattern(
            &uuid,
            &[
                &AT_TEST_MAJOR.to_be_bytes(),
                &AT_TEST_MINOR.to_be_bytes(),
                &rssi.to_be_bytes(),
            ],
        );
        context
            .run_steps(&[
                at(Operation::ResetDefaults),
                at(Operation::SetBeaconUuid(uuid)),
                at(Operation::SetBeaconMajor(AT_TEST_MAJOR)),
                at(Operation::SetBeaconMinor(AT_TEST_MINOR)),
                at(Operation::SetBeaconAdvInterval(AT_TEST_ADV_INTERVAL)),
                at(Operation::SetRssiCalibration { power, rssi }),
                at(Operation::SetBeaconEnable(true)),
                beacon_scan(pattern),
            ])
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        restore_and_leave_at_mode(context, None).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CustomBeaconData;

#[async_trait]
impl Scenario for CustomBeaconData {
    fn id(&self) -> ScenarioId {
        ScenarioId::CustomBeaconData
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let uuid = context.config().test.test_beacon_uuid().0;
        context
            .on_target(|target| {
                Box::pin(async move {
                    let mut passed = target.set_beacon_enable(Channel::Ble, true).await;
                    passed &= target
                        .set_custom_beacon_data(Channel::Ble, &CUSTOM_BEACON_DATA)
                        .await;
                    passed &= target.save_custom_beacon_data().await;
                    passed
                })
            })
            .await;
        context
            .run_steps(&[
                TestStep::Disconnect(Role::Target),
                beacon_scan(CUSTOM_BEACON_DATA.to_vec()),
                TestStep::Connect(Role::Target),
                ble(Operation::SetBeaconUuid(uuid)),
                ble(Operation::ClearCustomBeaconData),
                TestStep::Disconnect(Role::Target),
                beacon_scan(ibeacon_pattern(&uuid, &[])),
            ])
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        if !ensure_connected(context).await {
            return;
        }
        context
            .run_steps(&[
                ble(Operation::SetBeaconEnable(false)),
                ble(Operation::ResetDefaults),
                TestStep::Disconnect(Role::Target),
            ])
            .await;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ibeacon_pattern_is_big_endian() {
        let pattern = ibeacon_pattern(
            &[0x11; 16],
            &[&0x2694_u16.to_be_bytes(), &0x1472_u16.to_be_bytes()],
        );
        assert_eq!(
            concat!("4c000215", "11111111111111111111111111111111", "2694", "1472"),
            hex::encode(pattern)
        );
    }
}
