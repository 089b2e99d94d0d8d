// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VM power/boot controller: maps semantic IPMI chassis-control
//! commands onto hypervisor operations for a single named VM.
//!
//! A BMC front end decodes wire-level IPMI requests and drives the
//! [`ChassisControl`] trait. The controller resolves the VM afresh for
//! every command, performs the operation through an exclusive hypervisor
//! session, and reports either success or a [`ControllerError`] whose
//! completion code the front end puts on the IPMI response.
//!
//! Mutating commands never propagate raw hypervisor failures to the wire:
//! the cause is logged, kept as the error's source, and the client is told
//! the node is busy so it can resend the request. Read-only queries are
//! stricter: an unclassifiable failure surfaces as
//! [`ControllerError::Unexpected`] with the VM name and cause attached.

use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, info, o, warn, Logger};
use thiserror::Error;

use vbmc_api_types::{
    BootDevice, PowerState, IPMI_COMMAND_NODE_BUSY, IPMI_INVALID_DATA,
};

use crate::config::BmcConfig;
use crate::hypervisor::{
    boot_device_from, device_kind_for, DeviceKind, Hypervisor,
    HypervisorError, Machine, Session, SessionState, BOOT_SLOTS,
};
use crate::poll::{self, PollPolicy, WaitError};

/// The known boot devices in their canonical relative order. A set-boot-
/// device request moves the requested device to the front; the others keep
/// this order behind it.
const SELECTABLE_DEVICES: [BootDevice; 3] =
    [BootDevice::Network, BootDevice::HardDisk, BootDevice::Optical];

/// Underlying cause of a retryable command failure.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// Failures surfaced to the BMC front end.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A mutating command failed; the IPMI client may resend the request.
    #[error("command for VM {vm:?} failed but may be retried")]
    Retryable {
        vm: String,
        #[source]
        source: CommandFailure,
    },

    /// The request named a boot device this adapter cannot select.
    #[error("unsupported boot device in request: {requested}")]
    InvalidRequest { requested: BootDevice },

    /// A read-only query failed in a way the controller cannot classify.
    #[error("unexpected hypervisor failure for VM {vm:?}")]
    Unexpected {
        vm: String,
        #[source]
        source: HypervisorError,
    },
}

impl ControllerError {
    /// The IPMI completion code a front end should put on the response.
    pub fn completion_code(&self) -> u8 {
        match self {
            ControllerError::Retryable { .. }
            | ControllerError::Unexpected { .. } => IPMI_COMMAND_NODE_BUSY,
            ControllerError::InvalidRequest { .. } => IPMI_INVALID_DATA,
        }
    }
}

/// The command surface a BMC front end drives in response to decoded IPMI
/// chassis-control and boot-device requests.
#[async_trait]
pub trait ChassisControl: Send + Sync {
    async fn get_power_state(&self) -> Result<PowerState, ControllerError>;
    async fn power_on(&self) -> Result<(), ControllerError>;
    async fn power_off(&self) -> Result<(), ControllerError>;
    async fn power_shutdown(&self) -> Result<(), ControllerError>;
    async fn power_reset(&self) -> Result<(), ControllerError>;
    async fn get_boot_device(&self) -> Result<BootDevice, ControllerError>;
    async fn set_boot_device(
        &self,
        requested: BootDevice,
    ) -> Result<(), ControllerError>;
}

/// Power/boot controller for one hypervisor-managed VM.
pub struct PowerController {
    config: BmcConfig,
    hypervisor: Arc<dyn Hypervisor>,
    poll: PollPolicy,
    log: Logger,
}

impl PowerController {
    /// Creates a controller for the VM named in `config`.
    ///
    /// The VM need not exist yet; it is resolved anew on every operation,
    /// so machines created, destroyed, or renamed after construction are
    /// picked up automatically.
    pub fn new(
        config: BmcConfig,
        hypervisor: Arc<dyn Hypervisor>,
        poll: PollPolicy,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("vm" => config.vm_name.clone()));
        Self { config, hypervisor, poll, log }
    }

    /// BMC-side settings (credentials, bind address) for the front end
    /// embedding this controller.
    pub fn config(&self) -> &BmcConfig {
        &self.config
    }

    pub fn vm_name(&self) -> &str {
        &self.config.vm_name
    }

    async fn machine(&self) -> Result<Box<dyn Machine>, HypervisorError> {
        self.hypervisor.find_machine(&self.config.vm_name).await
    }

    fn retryable(&self, source: CommandFailure) -> ControllerError {
        warn!(self.log, "command failed, telling client to retry";
              "error" => %source);
        ControllerError::Retryable { vm: self.vm_name().to_string(), source }
    }

    fn unexpected(&self, source: HypervisorError) -> ControllerError {
        ControllerError::Unexpected {
            vm: self.vm_name().to_string(),
            source,
        }
    }

    /// Reports whether the VM is running. A VM the hypervisor cannot find
    /// is reported as powered off, not as an error, so that BMCs may be
    /// registered ahead of the machines they will manage.
    pub async fn get_power_state(
        &self,
    ) -> Result<PowerState, ControllerError> {
        debug!(self.log, "get power state requested");
        let machine = match self.machine().await {
            Ok(machine) => machine,
            Err(HypervisorError::MachineNotFound(_)) => {
                return Ok(PowerState::Off)
            }
            Err(e) => return Err(self.unexpected(e)),
        };
        let state = machine.state().await.map_err(|e| self.unexpected(e))?;
        Ok(if state.is_running() { PowerState::On } else { PowerState::Off })
    }

    pub async fn power_on(&self) -> Result<(), ControllerError> {
        debug!(self.log, "power on requested");
        self.start_vm().await.map_err(|e| self.retryable(e))
    }

    pub async fn power_off(&self) -> Result<(), ControllerError> {
        debug!(self.log, "power off requested");
        self.stop_vm(StopMode::Hard)
            .await
            .map_err(|e| self.retryable(e.into()))
    }

    pub async fn power_shutdown(&self) -> Result<(), ControllerError> {
        debug!(self.log, "soft shutdown requested");
        self.stop_vm(StopMode::Acpi)
            .await
            .map_err(|e| self.retryable(e.into()))
    }

    pub async fn power_reset(&self) -> Result<(), ControllerError> {
        debug!(self.log, "reset requested");
        self.reset_vm().await.map_err(|e| self.retryable(e.into()))
    }

    /// Reads the device in the first boot slot, translated to the
    /// canonical set. Unmodeled devices report as [`BootDevice::None`].
    pub async fn get_boot_device(
        &self,
    ) -> Result<BootDevice, ControllerError> {
        debug!(self.log, "get boot device requested");
        let machine = self.machine().await.map_err(|e| self.unexpected(e))?;
        let order =
            machine.boot_order().await.map_err(|e| self.unexpected(e))?;
        let first = order.first().copied().unwrap_or(DeviceKind::Null);
        Ok(boot_device_from(first))
    }

    /// Rewrites the boot order so `requested` is tried first, followed by
    /// the remaining known devices in their canonical order.
    ///
    /// The new order is staged slot by slot inside one exclusive session
    /// and committed with a single save, so a failed commit leaves the
    /// previous order visible.
    pub async fn set_boot_device(
        &self,
        requested: BootDevice,
    ) -> Result<(), ControllerError> {
        if requested == BootDevice::None {
            return Err(ControllerError::InvalidRequest { requested });
        }
        info!(self.log, "set boot device requested";
              "device" => %requested);
        self.write_boot_order(requested)
            .await
            .map_err(|e| self.retryable(e.into()))
    }

    async fn start_vm(&self) -> Result<(), CommandFailure> {
        let machine = self.machine().await?;
        if machine.state().await?.is_running() {
            info!(self.log, "VM already running, power on is a no-op");
            return Ok(());
        }

        info!(self.log, "launching VM headless");
        let mut session = machine.launch_headless().await?;

        // The hypervisor starts the VM process asynchronously; the launch
        // is complete once its session fully owns the machine.
        let session_ref: &dyn Session = session.as_ref();
        let waited = poll::wait_until(
            &self.poll,
            &self.log,
            "launch session lock",
            move || async move {
                Ok(session_ref.state().await? == SessionState::Locked)
            },
        )
        .await;

        let released = session.release().await;
        waited?;
        released?;
        info!(self.log, "VM launched");
        Ok(())
    }

    async fn stop_vm(&self, mode: StopMode) -> Result<(), HypervisorError> {
        let machine = self.machine().await?;
        if !machine.state().await?.is_running() {
            info!(self.log, "VM already off, nothing to stop";
                  "mode" => ?mode);
            return Ok(());
        }

        let mut session = machine.lock().await?;
        let result = match mode {
            StopMode::Hard => session.power_down().await,
            StopMode::Acpi => session.power_button().await,
        };
        let released = session.release().await;
        result?;
        released
    }

    async fn reset_vm(&self) -> Result<(), HypervisorError> {
        let machine = self.machine().await?;

        // Cannot reset a machine that is not running; report success
        // without contacting the hypervisor.
        if !machine.state().await?.is_running() {
            info!(self.log, "VM is powered off, reset is a no-op");
            return Ok(());
        }

        let mut session = machine.lock().await?;
        let result = session.reset().await;
        let released = session.release().await;
        result?;
        released
    }

    async fn write_boot_order(
        &self,
        first: BootDevice,
    ) -> Result<(), HypervisorError> {
        let machine = self.machine().await?;
        let mut session = machine.lock().await?;
        let staged = stage_boot_order(session.as_mut(), first).await;
        let released = session.release().await;
        staged?;
        released
    }
}

#[derive(Clone, Copy, Debug)]
enum StopMode {
    Hard,
    Acpi,
}

/// Stages the full boot order into `session`: every slot cleared, the
/// requested device first, the other known devices behind it, then one
/// commit. Callers release the session afterwards regardless of outcome.
async fn stage_boot_order(
    session: &mut dyn Session,
    first: BootDevice,
) -> Result<(), HypervisorError> {
    for slot in 1..=BOOT_SLOTS {
        session.set_boot_slot(slot, DeviceKind::Null).await?;
    }

    let mut slot = 1;
    session.set_boot_slot(slot, device_kind_for(first)).await?;
    for device in SELECTABLE_DEVICES.iter().filter(|d| **d != first) {
        slot += 1;
        session.set_boot_slot(slot, device_kind_for(*device)).await?;
    }

    session.save_settings().await
}

#[async_trait]
impl ChassisControl for PowerController {
    async fn get_power_state(&self) -> Result<PowerState, ControllerError> {
        PowerController::get_power_state(self).await
    }

    async fn power_on(&self) -> Result<(), ControllerError> {
        PowerController::power_on(self).await
    }

    async fn power_off(&self) -> Result<(), ControllerError> {
        PowerController::power_off(self).await
    }

    async fn power_shutdown(&self) -> Result<(), ControllerError> {
        PowerController::power_shutdown(self).await
    }

    async fn power_reset(&self) -> Result<(), ControllerError> {
        PowerController::power_reset(self).await
    }

    async fn get_boot_device(&self) -> Result<BootDevice, ControllerError> {
        PowerController::get_boot_device(self).await
    }

    async fn set_boot_device(
        &self,
        requested: BootDevice,
    ) -> Result<(), ControllerError> {
        PowerController::set_boot_device(self, requested).await
    }
}
