use async_trait::async_trait;

use super::catalog::ScenarioId;
use super::context::{Role, ScenarioContext, TestStep};
use super::hotswap::{ensure_connected, enter_at_mode, release_at_strap};
use super::runner::Scenario;
use crate::codec::Framing;
use crate::hw::DEFAULT_BAUD_RATE;
use crate::protocol::{EndpointId, TX_POWER_HIGH};
use crate::session::{AtMode, Channel, DEFAULT_RESET_SETTLE, Operation, Reply};

const AT_TEST_BAUD_RATE: u32 = 115_200;

/// Every byte value once.
fn passthrough_payload() -> Vec<u8> {
    (0..=u8::MAX).collect()
}

/// 256 bytes through the UART bridge in each direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct UartPassthrough;

#[async_trait]
impl Scenario for UartPassthrough {
    fn id(&self) -> ScenarioId {
        ScenarioId::UartPassthrough
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        if context.open_target(Some(Framing::Raw)).await {
            context.connect_target().await;
        }
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let baud_rate = context.config().test.baudrate().unwrap_or(DEFAULT_BAUD_RATE);
        let ble = Channel::Ble;
        context
            .on_target(move |target| {
                Box::pin(async move {
                    let data = passthrough_payload();
                    let mut passed = target.set_connectable_tx_power(ble, TX_POWER_HIGH).await;
                    passed &= target.set_uart_enable(ble, false).await;
                    passed &= target.set_uart_parity(ble, false).await;
                    passed &= target.set_uart_flow_control(ble, false).await;
                    passed &= target.set_uart_baud_rate(ble, baud_rate).await;
                    passed &= target.set_uart_enable(ble, true).await;
                    passed &= target.passthrough(Channel::Ble, &data).await;
                    passed &= target.passthrough(Channel::Serial, &data).await;
                    passed
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        if !ensure_connected(context).await {
            return;
        }
        context
            .run_steps(&[
                TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetUartEnable(false)),
                TestStep::Disconnect(Role::Target),
            ])
            .await;
    }
}

/// UART settings written over AT survive a reboot and read back over BLE.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtUartSettings;

#[async_trait]
impl Scenario for AtUartSettings {
    fn id(&self) -> ScenarioId {
        ScenarioId::AtUartSettings
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        enter_at_mode(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let at = |operation| TestStep::expect_success(Role::Target, Channel::Serial, operation);
        let read = |endpoint, value: Vec<u8>| TestStep::SendAndExpect {
            role: Role::Target,
            channel: Channel::Ble,
            operation: Operation::Read(endpoint),
            reply: Reply::Value(value),
        };

        context
            .run_steps(&[
                at(Operation::SetUartBaudRate(AT_TEST_BAUD_RATE)),
                at(Operation::SetUartFlowControl(true)),
                at(Operation::SetUartParity(true)),
                at(Operation::SetUartEnable(true)),
            ])
            .await;
        if !release_at_strap(context).await {
            return;
        }
        context
            .run_steps(&[
                TestStep::Reset {
                    role: Role::Target,
                    channel: Channel::Serial,
                    settle: DEFAULT_RESET_SETTLE,
                },
                TestStep::Connect(Role::Target),
                read(
                    EndpointId::UartBaudRate,
                    AT_TEST_BAUD_RATE.to_le_bytes().to_vec(),
                ),
                read(EndpointId::UartFlowControl, vec![1]),
                read(EndpointId::UartParity, vec![1]),
                read(EndpointId::UartEnable, vec![1]),
                TestStep::expect_success(Role::Target, Channel::Ble, Operation::ResetDefaults),
                TestStep::Disconnect(Role::Target),
            ])
            .await;
    }

    /// The body normally rebooted the target out of AT mode already.
    async fn teardown(&self, context: &mut ScenarioContext) {
        if !release_at_strap(context).await {
            return;
        }
        let still_in_at_mode = context
            .session(Role::Target)
            .is_some_and(|target| target.at_mode() == AtMode::Enabled);
        if still_in_at_mode {
            context
                .on_target(|target| Box::pin(target.reset(Channel::Serial, DEFAULT_RESET_SETTLE)))
                .await;
        }
        if !ensure_connected(context).await {
            return;
        }
        context
            .run_steps(&[
                TestStep::expect_success(Role::Target, Channel::Ble, Operation::ResetDefaults),
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
    fn payload_covers_every_byte_once() {
        let payload = passthrough_payload();
        assert_eq!(256, payload.len());
        assert_eq!(Some(&0xff), payload.last());
    }
}
