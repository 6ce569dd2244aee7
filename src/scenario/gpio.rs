use async_trait::async_trait;

use super::catalog::ScenarioId;
use super::context::ScenarioContext;
use super::hotswap::{
    connect_over_ble, enter_at_mode, reset_defaults_over_ble, restore_and_leave_at_mode,
};
use super::runner::Scenario;
use crate::protocol::{Direction, GpioPin, Level, Pull};
use crate::session::{Channel, DEFAULT_RESET_SETTLE};

const CONFIGURED_PIN: GpioPin = GpioPin(0x07);
const SECOND_CONFIGURED_PIN: GpioPin = GpioPin(0x01);
const UNCONFIGURED_PIN: GpioPin = GpioPin(0x08);
const STATUS_PIN: GpioPin = GpioPin(0x09);

#[derive(Debug, Clone, Copy, Default)]
pub struct GpioConfig;

#[async_trait]
impl Scenario for GpioConfig {
    fn id(&self) -> ScenarioId {
        ScenarioId::GpioConfig
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let channel = Channel::Ble;
        context
            .on_target(move |target| {
                Box::pin(async move {
                    let mut passed = target
                        .set_gpio_config(channel, CONFIGURED_PIN, Direction::In, Pull::Down)
                        .await;
                    passed &= target
                        .get_gpio_config(channel, CONFIGURED_PIN, Direction::In, Pull::Down)
                        .await;
                    passed &= target
                        .set_gpio_config(channel, SECOND_CONFIGURED_PIN, Direction::In, Pull::None)
                        .await;
                    passed &= target
                        .get_gpio_config(channel, UNCONFIGURED_PIN, Direction::In, Pull::None)
                        .await;
                    passed
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        reset_defaults_over_ble(context).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GpioStatusPin;

#[async_trait]
impl Scenario for GpioStatusPin {
    fn id(&self) -> ScenarioId {
        ScenarioId::GpioStatusPin
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        context
            .on_target(|target| {
                Box::pin(async move {
                    let mut passed = target.configure_status_pin(STATUS_PIN, Level::Low).await;
                    passed &= target.get_status_pin_config(STATUS_PIN, Level::Low).await;
                    passed &= target.read_status_pin(true).await;
                    passed &= target.deconfigure_status_pin().await;
                    passed &= target
                        .get_gpio_config(Channel::Ble, STATUS_PIN, Direction::In, Pull::None)
                        .await;
                    passed
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        reset_defaults_over_ble(context).await;
    }
}

/// Drives the first looped-back output and checks its input over AT.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtGpioConfig;

#[async_trait]
impl Scenario for AtGpioConfig {
    fn id(&self) -> ScenarioId {
        ScenarioId::AtGpioConfig
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        enter_at_mode(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let Some(pins) = context.pin_map() else {
            return;
        };
        let (output, input) = match pins.first_loopback() {
            Ok(pair) => pair,
            Err(error) => {
                context.abort(error.to_string());
                return;
            }
        };
        let at = Channel::Serial;
        context
            .on_target(move |target| {
                Box::pin(async move {
                    let mut passed = target.set_gpio_config(at, output, Direction::Out, Pull::None).await;
                    passed &= target.get_gpio_config(at, output, Direction::Out, Pull::None).await;
                    passed &= target.set_gpio_config(at, input, Direction::In, Pull::None).await;
                    passed &= target.get_gpio_config(at, input, Direction::In, Pull::None).await;
                    for level in [Level::High, Level::Low] {
                        passed &= target.write_gpio(at, output, level).await;
                        passed &= target.read_gpio(at, input, level).await;
                    }
                    // Release the line so the pulls decide the input level.
                    passed &= target.set_gpio_config(at, output, Direction::In, Pull::None).await;
                    for (pull, level) in [(Pull::Up, Level::High), (Pull::Down, Level::Low)] {
                        passed &= target.set_gpio_config(at, input, Direction::In, pull).await;
                        passed &= target.get_gpio_config(at, input, Direction::In, pull).await;
                        passed &= target.read_gpio(at, input, level).await;
                    }
                    passed
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        restore_and_leave_at_mode(context, None).await;
    }
}

/// A reset over AT forgets the pin configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtDeviceReset;

#[async_trait]
impl Scenario for AtDeviceReset {
    fn id(&self) -> ScenarioId {
        ScenarioId::AtDeviceReset
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        enter_at_mode(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let Some(pins) = context.pin_map() else {
            return;
        };
        let Some(&pin) = pins.output_pins().first() else {
            context.abort("No output pin configured");
            return;
        };
        let at = Channel::Serial;
        context
            .on_target(move |target| {
                Box::pin(async move {
                    let mut passed = target.set_gpio_config(at, pin, Direction::Out, Pull::Up).await;
                    passed &= target.get_gpio_config(at, pin, Direction::Out, Pull::Up).await;
                    passed &= target.reset(at, DEFAULT_RESET_SETTLE).await;
                    passed &= target.get_gpio_config(at, pin, Direction::In, Pull::None).await;
                    passed
                })
            })
            .await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        restore_and_leave_at_mode(context, None).await;
    }
}
