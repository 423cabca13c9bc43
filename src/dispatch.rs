use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    api,
    core::{sequencer::Transition, soc::SocPlan},
    prelude::*,
    settings::{ChargeWindow, DispatchSettings, LoadSettings},
};

/// Inverter-facing side of the dispatcher.
#[async_trait]
pub trait InverterControl {
    async fn set_charge_target(&self, target: u8, window: &ChargeWindow) -> Result;
}

#[async_trait]
impl InverterControl for api::inverter::Api {
    async fn set_charge_target(&self, target: u8, window: &ChargeWindow) -> Result {
        self.write_charge_target(target, window).await
    }
}

/// Switch-hub-facing side of the dispatcher.
#[async_trait]
pub trait SwitchHub {
    /// Idempotent at the hub: commanding the current state is a no-op.
    async fn set_load_state(&self, load: &str, on: bool) -> Result;
}

/// The physical switch modules, one per configured load.
pub struct SwitchRoster(HashMap<String, api::shelly::Switch>);

impl SwitchRoster {
    pub fn try_new(loads: &[LoadSettings]) -> Result<Self> {
        let mut switches = HashMap::new();
        for load in loads {
            switches.insert(load.id.clone(), api::shelly::Switch::try_new(&load.switch_url)?);
        }
        Ok(Self(switches))
    }
}

#[async_trait]
impl SwitchHub for SwitchRoster {
    async fn set_load_state(&self, load: &str, on: bool) -> Result {
        let switch = self.0.get(load).with_context(|| format!("unknown load `{load}`"))?;
        switch.set(on).await
    }
}

/// Turns computed plans and load transitions into collaborator writes.
///
/// Writes are retried a bounded number of times with a linear backoff. An
/// exhausted budget is an error for the caller to log: the computed value is
/// never lost, the next cycle simply tries again.
pub struct Dispatcher<I, H> {
    inverter: I,
    hub: H,
    settings: DispatchSettings,
    dry_run: bool,
}

impl<I: InverterControl, H: SwitchHub> Dispatcher<I, H> {
    pub const fn new(inverter: I, hub: H, settings: DispatchSettings, dry_run: bool) -> Self {
        Self { inverter, hub, settings, dry_run }
    }

    #[instrument(skip_all, fields(soc_target = plan.target))]
    pub async fn dispatch_plan(&self, plan: &SocPlan, window: &ChargeWindow) -> Result {
        if self.dry_run {
            info!("dry run, not writing the charge target");
            return Ok(());
        }
        self.retrying("charge target", || self.inverter.set_charge_target(plan.target, window))
            .await
    }

    #[instrument(skip_all, fields(n_transitions = transitions.len()))]
    pub async fn dispatch_transitions(&self, transitions: &[Transition]) -> Result {
        if self.dry_run {
            for transition in transitions {
                info!(load = %transition.load, to = ?transition.to, "dry run, not switching");
            }
            return Ok(());
        }
        let mut failed = 0_usize;
        for transition in transitions {
            let result = self
                .retrying("load state", || {
                    self.hub.set_load_state(&transition.load, transition.to.is_on())
                })
                .await;
            if let Err(error) = result {
                error!(load = %transition.load, "failed to switch: {error:#}");
                failed += 1;
            }
        }
        ensure!(failed == 0, "{failed} load command(s) failed");
        Ok(())
    }

    async fn retrying<T, F, Fut>(&self, what: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.settings.attempts => {
                    let pause =
                        Duration::from_secs(self.settings.backoff_seconds * u64::from(attempt));
                    warn!(what, attempt, "write failed, retrying in {pause:?}: {error:#}");
                    sleep(pause).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("{what}: giving up after {attempt} attempts"));
                }
            }
        }
    }
}
