use async_trait::async_trait;

use super::beacon::{beacon_scan, ibeacon_pattern};
use super::catalog::ScenarioId;
use super::context::{Role, ScenarioContext, TestStep};
use super::hotswap::{
    connect_over_ble, enter_at_mode, reset_defaults_over_ble, restore_and_leave_at_mode,
};
use super::runner::Scenario;
use crate::codec::StatusCode;
use crate::protocol::{AtMnemonic, TX_POWER_DEFAULT};
use crate::session::{Channel, CustomDataPart, Operation, Reply};

const BLE_PASSWORD: &str = "test";
const NEW_BLE_PASSWORD: &str = "tester";
const AT_PASSWORD: &str = "th1sisap@$$w0rd";
const UNLOCKED_MAJOR: u16 = 5489;
const FACTORY_RSSI_CALIBRATION: i8 = -63;
const AT_TEST_BAUD_RATE: u32 = 115_200;
const AT_RELOCKED_BAUD_RATE: u32 = 38_400;

/// Everything a locked device must refuse over BLE.
fn protected_ble_operations(uuid: [u8; 16]) -> Vec<Operation> {
    vec![
        Operation::SetBeaconUuid(uuid),
        Operation::SetCustomBeaconDataPart(CustomDataPart::First, vec![0x12, 0x34]),
        Operation::SetCustomBeaconDataPart(CustomDataPart::Second, vec![0x12, 0x34]),
        Operation::SaveCustomBeaconData,
        Operation::ClearCustomBeaconData,
        Operation::SetRssiCalibration {
            power: TX_POWER_DEFAULT,
            rssi: FACTORY_RSSI_CALIBRATION,
        },
        Operation::GetRssiCalibration,
        Operation::SetPassword(BLE_PASSWORD.to_string()),
        Operation::EnterBootloader,
    ]
}

/// Factory getter values after `at$defaults` and a 115200 baud rate; AT
/// getters answer while the device is locked.
const LOCKED_GETTERS: [(AtMnemonic, &str); 12] = [
    (AtMnemonic::UartBaudRate, "0001c200"),
    (AtMnemonic::UartFlowControl, "00"),
    (AtMnemonic::UartEnable, "00"),
    (AtMnemonic::UartParity, "00"),
    (AtMnemonic::BeaconMajor, "0000"),
    (AtMnemonic::BeaconMinor, "0000"),
    (AtMnemonic::BeaconUuid, "00112233445566778899AABBCCDDEEFF"),
    (AtMnemonic::BeaconTxPower, "fc"),
    (AtMnemonic::BeaconAdvInterval, "0064"),
    (AtMnemonic::ConnectableTxPower, "fc"),
    (AtMnemonic::BeaconEnable, "00"),
    (AtMnemonic::RssiCalibration, "fc c1"),
];

/// Sets `password` from factory settings and reconnects so the lock takes
/// effect.
async fn lock_with(context: &mut ScenarioContext, password: &'static str) -> bool {
    let locked = context
        .on_target(move |target| {
            Box::pin(async move {
                let mut locked = target.reset_defaults(Channel::Ble).await;
                locked &= target.set_password(Channel::Ble, password).await;
                locked
            })
        })
        .await;
    let reconnected = context
        .run_steps(&[
            TestStep::Disconnect(Role::Target),
            TestStep::Connect(Role::Target),
        ])
        .await;
    locked && reconnected
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LockUnlock;

#[async_trait]
impl Scenario for LockUnlock {
    fn id(&self) -> ScenarioId {
        ScenarioId::LockUnlock
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let uuid = context.config().test.test_beacon_uuid().0;
        lock_with(context, BLE_PASSWORD).await;
        context
            .on_target(move |target| {
                Box::pin(async move {
                    target
                        .lockout_check(Channel::Ble, &protected_ble_operations(uuid))
                        .await
                })
            })
            .await;
        let ble = |operation| TestStep::expect_success(Role::Target, Channel::Ble, operation);
        context
            .run_steps(&[
                ble(Operation::Unlock(BLE_PASSWORD.to_string())),
                ble(Operation::SetBeaconUuid(uuid)),
                ble(Operation::SetBeaconMajor(UNLOCKED_MAJOR)),
                ble(Operation::SetBeaconEnable(true)),
                TestStep::Disconnect(Role::Target),
                beacon_scan(ibeacon_pattern(&uuid, &[&UNLOCKED_MAJOR.to_be_bytes()])),
            ])
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        reset_defaults_over_ble(context).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordChange;

#[async_trait]
impl Scenario for PasswordChange {
    fn id(&self) -> ScenarioId {
        ScenarioId::PasswordChange
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        lock_with(context, BLE_PASSWORD).await;
        let unlock = |password: &str, reply| TestStep::SendAndExpect {
            role: Role::Target,
            channel: Channel::Ble,
            operation: Operation::Unlock(password.to_string()),
            reply,
        };
        context
            .on_target(|target| {
                Box::pin(async move {
                    target
                        .lockout_check(
                            Channel::Ble,
                            &[
                                Operation::SetCustomBeaconDataPart(CustomDataPart::First, vec![0x12]),
                                Operation::SetCustomBeaconDataPart(CustomDataPart::Second, vec![0x34]),
                                Operation::SaveCustomBeaconData,
                                Operation::ClearCustomBeaconData,
                            ],
                        )
                        .await
                })
            })
            .await;
        context
            .run_steps(&[
                unlock(BLE_PASSWORD, Reply::success()),
                TestStep::expect_success(
                    Role::Target,
                    Channel::Ble,
                    Operation::SetPassword(NEW_BLE_PASSWORD.to_string()),
                ),
                unlock(BLE_PASSWORD, Reply::Status(StatusCode::UnlockFailed)),
                unlock(NEW_BLE_PASSWORD, Reply::success()),
                TestStep::Disconnect(Role::Target),
            ])
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        reset_defaults_over_ble(context).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtLockUnlock;

#[async_trait]
impl Scenario for AtLockUnlock {
    fn id(&self) -> ScenarioId {
        ScenarioId::AtLockUnlock
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        enter_at_mode(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let at = |operation, reply| TestStep::SendAndExpect {
            role: Role::Target,
            channel: Channel::Serial,
            operation,
            reply,
        };
        context
            .run_steps(&[
                at(Operation::ResetDefaults, Reply::success()),
                at(Operation::SetPassword(AT_PASSWORD.to_string()), Reply::success()),
                at(Operation::SetUartBaudRate(AT_TEST_BAUD_RATE), Reply::locked()),
                at(Operation::Unlock(AT_PASSWORD.to_string()), Reply::success()),
                at(Operation::SetUartBaudRate(AT_TEST_BAUD_RATE), Reply::success()),
                at(Operation::SetUartBaudRate(AT_RELOCKED_BAUD_RATE), Reply::locked()),
            ])
            .await;
        context
            .on_target(|target| {
                Box::pin(async move {
                    let mut all_read = true;
                    for (mnemonic, expected) in LOCKED_GETTERS {
                        all_read &= target.get(mnemonic, expected).await;
                    }
                    all_read
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        restore_and_leave_at_mode(context, Some(AT_PASSWORD)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protected_operation_is_encodable_over_ble() {
        for operation in protected_ble_operations([0; 16]) {
            assert!(operation.command(Channel::Ble).is_ok(), "{}", operation.name());
        }
    }
}
