//! Moving the target in and out of AT mode with the setup board's straps.
//!
//! The setup board drives two lines of the target: the AT-mode select line
//! (low selects AT mode) and the beacon-only line (high keeps the connectable
//! advertising on). Both are sampled when the target boots, so every change
//! ends with a reset of the target.

use tracing::{debug, info};

use super::context::{Role, ScenarioContext, TestStep};
use crate::codec::Framing;
use crate::protocol::{Direction, Level, Pull};
use crate::session::{Channel, ConnectionState, DEFAULT_RESET_SETTLE, Operation};

/// Opens the target over BLE only and connects to it.
pub(crate) async fn connect_over_ble(context: &mut ScenarioContext) -> bool {
    context.open_target(None).await && context.connect_target().await
}

/// Reconnects to the target unless the link is still up.
pub(crate) async fn ensure_connected(context: &mut ScenarioContext) -> bool {
    let connected = context
        .session(Role::Target)
        .is_some_and(|target| target.connection_state() == ConnectionState::Connected);
    connected || context.connect_target().await
}

/// Restores factory settings over BLE and drops the link.
pub(crate) async fn reset_defaults_over_ble(context: &mut ScenarioContext) {
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

/// Puts the target in AT mode and leaves both UARTs open.
///
/// The setup board must already be in AT mode; its hardware variant selects
/// the pin map. A target that boots into AT mode already is left alone,
/// otherwise it is reset over BLE so it samples the driven strap.
pub(crate) async fn enter_at_mode(context: &mut ScenarioContext) -> bool {
    if !context.open_setup().await {
        return false;
    }
    let Some(setup) = context.session_mut(Role::Setup) else {
        return false;
    };
    let alive = setup.enter_at_mode().await;
    let variant = setup.hardware_variant();
    if !context.require(
        "setup board in AT mode",
        alive,
        "AT mode not enabled on setup board!",
    ) {
        return false;
    }
    context.set_variant(variant);
    let Some(pins) = context.pin_map() else {
        return false;
    };

    if !context.open_target(Some(Framing::default())).await {
        return false;
    }
    let Some(target) = context.session_mut(Role::Target) else {
        return false;
    };
    let already_in_at_mode = target.verify_at_mode().await;
    debug!(already_in_at_mode, "target AT mode before strapping");

    let (at_ctrl, beacon_only) = (pins.at_ctrl_pin(), pins.beacon_only_pin());
    let strapped = context
        .on_or_abort(Role::Setup, move |setup| {
            Box::pin(async move {
                setup.set_connectable_adv_enable(false).await
                    && setup
                        .set_gpio_config(Channel::Serial, at_ctrl, Direction::Out, Pull::None)
                        .await
                    && setup.write_gpio(Channel::Serial, at_ctrl, Level::Low).await
                    && setup
                        .set_gpio_config(Channel::Serial, beacon_only, Direction::Out, Pull::None)
                        .await
                    && setup.write_gpio(Channel::Serial, beacon_only, Level::High).await
            })
        })
        .await;
    if !strapped {
        return false;
    }
    if already_in_at_mode {
        return true;
    }

    if !context.connect_target().await {
        return false;
    }
    let rebooted = context
        .on_or_abort(Role::Target, |target| {
            Box::pin(target.reset(Channel::Ble, DEFAULT_RESET_SETTLE))
        })
        .await;
    if !rebooted {
        return false;
    }
    let Some(target) = context.session_mut(Role::Target) else {
        return false;
    };
    let entered = target.verify_at_mode().await;
    info!(entered, "target strapped into AT mode");
    context.require("target in AT mode", entered, "Target did not enter AT mode")
}

/// Drives the AT strap high so the target boots as a normal peripheral.
pub(crate) async fn release_at_strap(context: &mut ScenarioContext) -> bool {
    let Some(pins) = context.pin_map() else {
        return false;
    };
    let at_ctrl = pins.at_ctrl_pin();
    context
        .on_or_abort(Role::Setup, move |setup| {
            Box::pin(setup.write_gpio(Channel::Serial, at_ctrl, Level::High))
        })
        .await
}

/// Releases the AT strap and resets the target over AT so it leaves AT
/// mode.
pub(crate) async fn leave_at_mode(context: &mut ScenarioContext) -> bool {
    release_at_strap(context).await
        && context
            .on_target(|target| Box::pin(target.reset(Channel::Serial, DEFAULT_RESET_SETTLE)))
            .await
}

/// Restores the target's factory settings over AT, then leaves AT mode.
///
/// `password` unlocks the target first when a scenario left it locked.
pub(crate) async fn restore_and_leave_at_mode(
    context: &mut ScenarioContext,
    password: Option<&str>,
) {
    if let Some(password) = password {
        let password = password.to_string();
        context
            .on_target(move |target| {
                Box::pin(async move { target.unlock_device(Channel::Serial, &password).await })
            })
            .await;
    }
    context
        .on_target(|target| Box::pin(target.reset_defaults(Channel::Serial)))
        .await;
    leave_at_mode(context).await;
}
