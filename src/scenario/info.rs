use async_trait::async_trait;
use tracing::info;

use super::catalog::ScenarioId;
use super::context::{Role, ScenarioContext, TestStep};
use super::hotswap::{connect_over_ble, ensure_connected};
use super::runner::Scenario;
use crate::protocol::{TX_POWER_DEFAULT, TX_POWER_HIGH, TX_POWER_LOW, bmdware_service_uuids};
use crate::scan::{DEFAULT_FIND_TIMEOUT, DEFAULT_MIN_RSSI_DELTA_DB, RssiWindowMatcher};
use crate::session::{Channel, Operation};

/// Sets the connectable TX power over BLE and drops the link so the target
/// advertises again.
async fn advertise_at(context: &mut ScenarioContext, power: i8) -> bool {
    ensure_connected(context).await
        && context
            .run_steps(&[
                TestStep::expect_success(
                    Role::Target,
                    Channel::Ble,
                    Operation::SetConnectableTxPower(power),
                ),
                TestStep::Disconnect(Role::Target),
            ])
            .await
}

/// Averages the target's RSSI at high then low connectable TX power.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectableTxPower;

impl ConnectableTxPower {
    async fn window(
        context: &mut ScenarioContext,
        matcher: &mut RssiWindowMatcher,
        label: &str,
    ) -> bool {
        let radio = context.hardware().radio();
        let average = match matcher.run_window(radio.as_ref(), DEFAULT_FIND_TIMEOUT).await {
            Ok(average) => average,
            Err(error) => {
                context.abort(format!("Scan failed: {error}"));
                return false;
            }
        };
        info!(label, ?average, "RSSI window complete");
        context.check(
            label,
            average.is_some(),
            format!("{label}: not enough advertisements"),
        )
    }
}

#[async_trait]
impl Scenario for ConnectableTxPower {
    fn id(&self) -> ScenarioId {
        ScenarioId::ConnectableTxPower
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let Some(peripheral_id) = context
            .session(Role::Target)
            .and_then(|target| target.peripheral_id())
            .map(str::to_string)
        else {
            context.abort("Target is not connected");
            return;
        };
        let mut matcher = RssiWindowMatcher::new(peripheral_id, bmdware_service_uuids());

        advertise_at(context, TX_POWER_HIGH).await;
        let high = Self::window(context, &mut matcher, "RSSI at high TX power").await;
        advertise_at(context, TX_POWER_LOW).await;
        let low = Self::window(context, &mut matcher, "RSSI at low TX power").await;
        if !high || !low {
            return;
        }

        let delta = matcher.delta_db().unwrap_or_default();
        context.check(
            "connectable RSSI drop",
            matcher.verdict(DEFAULT_MIN_RSSI_DELTA_DB),
            format!("RSSI dropped by {delta:.1} dB, expected at least {DEFAULT_MIN_RSSI_DELTA_DB} dB"),
        );
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        advertise_at(context, TX_POWER_DEFAULT).await;
    }
}

/// Reads the device information characteristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo;

#[async_trait]
impl Scenario for DeviceInfo {
    fn id(&self) -> ScenarioId {
        ScenarioId::DeviceInfo
    }

    async fn setup(&self, context: &mut ScenarioContext) {
        connect_over_ble(context).await;
    }

    async fn body(&self, context: &mut ScenarioContext) {
        let version = context
            .config()
            .test
            .version_under_test()
            .map(str::to_string);
        context
            .on_target(move |target| {
                Box::pin(async move { target.read_device_info(version.as_deref()).await })
            })
            .await;
        context.run_step(&TestStep::Disconnect(Role::Target)).await;
    }

    async fn teardown(&self, context: &mut ScenarioContext) {
        context.disconnect_target().await;
    }
}
