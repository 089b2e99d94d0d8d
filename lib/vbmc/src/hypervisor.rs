// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hypervisor collaborator seam.
//!
//! The controller only ever talks to the hypervisor through the traits in
//! this module; an adapter over a concrete virtualization SDK implements
//! them. The shapes follow the session model common to desktop hypervisors:
//! machines are resolved by name, reads need no lock, and every mutation
//! goes through an exclusive session that must be released when the
//! operation ends. The [`crate::mock`] module provides an in-memory
//! implementation.

use async_trait::async_trait;
use thiserror::Error;

use vbmc_api_types::BootDevice;

/// Number of boot-order slots a machine exposes. Slot positions are
/// 1-based, matching the hypervisor convention.
pub const BOOT_SLOTS: u8 = 4;

/// Lifecycle state of a machine as the hypervisor reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineState {
    PoweredOff,
    Saved,
    Aborted,
    Running,
    Paused,
}

impl MachineState {
    /// Whether the machine's VM process is live and executing guest code.
    /// Every other state reports to IPMI clients as powered off.
    pub fn is_running(self) -> bool {
        matches!(self, MachineState::Running)
    }
}

/// Lock state of a hypervisor session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unlocked,
    Locking,
    Locked,
}

/// Device kinds in the hypervisor's own vocabulary, as they appear in boot
/// slots. `Null` is an empty slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Null,
    Network,
    Disk,
    Dvd,
}

/// Translates a canonical boot device into the hypervisor's vocabulary.
/// [`BootDevice::None`] clears a slot.
pub fn device_kind_for(device: BootDevice) -> DeviceKind {
    match device {
        BootDevice::Network => DeviceKind::Network,
        BootDevice::HardDisk => DeviceKind::Disk,
        BootDevice::Optical => DeviceKind::Dvd,
        BootDevice::None => DeviceKind::Null,
    }
}

/// Translates a boot slot report back into the canonical set. Kinds this
/// adapter does not model report as [`BootDevice::None`].
pub fn boot_device_from(kind: DeviceKind) -> BootDevice {
    match kind {
        DeviceKind::Network => BootDevice::Network,
        DeviceKind::Disk => BootDevice::HardDisk,
        DeviceKind::Dvd => BootDevice::Optical,
        DeviceKind::Null => BootDevice::None,
    }
}

/// Failures reported by the hypervisor collaborator.
#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("no machine named {0:?} is registered")]
    MachineNotFound(String),

    #[error("machine is locked by another session")]
    AlreadyLocked,

    #[error("operation requires a locked session")]
    SessionNotLocked,

    #[error("boot slot {0} is out of range (1..={BOOT_SLOTS})")]
    BadBootSlot(u8),

    /// Opaque SDK or environment failure (driver not loaded, daemon gone,
    /// and the like). These are the errors the controller treats as
    /// transient.
    #[error("hypervisor driver error: {0}")]
    Driver(String),
}

/// Entry point to the hypervisor's automation API.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Resolves a machine by name.
    ///
    /// Resolution happens on every controller operation; callers must not
    /// cache the returned handle across operations, so that machines may be
    /// created, destroyed, or migrated between calls.
    async fn find_machine(
        &self,
        name: &str,
    ) -> Result<Box<dyn Machine>, HypervisorError>;
}

/// A resolved machine handle, valid for the duration of one operation.
#[async_trait]
pub trait Machine: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Reads the machine's current lifecycle state.
    async fn state(&self) -> Result<MachineState, HypervisorError>;

    /// Reads the configured boot order, one entry per slot, slot 1 first.
    async fn boot_order(&self) -> Result<Vec<DeviceKind>, HypervisorError>;

    /// Starts the machine's VM process with no display attached and returns
    /// the session that is acquiring ownership of it. The session may still
    /// be [`SessionState::Locking`] on return; callers poll until `Locked`.
    async fn launch_headless(
        &self,
    ) -> Result<Box<dyn Session>, HypervisorError>;

    /// Acquires an exclusive session on the machine. Only one session may
    /// hold a machine at a time.
    async fn lock(&self) -> Result<Box<dyn Session>, HypervisorError>;
}

/// An exclusive (or still-acquiring) session on a machine.
///
/// Implementations unlock on drop as a backstop, but callers release
/// explicitly on every exit path so that release failures are observable.
#[async_trait]
pub trait Session: std::fmt::Debug + Send + Sync {
    async fn state(&self) -> Result<SessionState, HypervisorError>;

    /// Hard power cut, no guest coordination.
    async fn power_down(&mut self) -> Result<(), HypervisorError>;

    /// Presses the ACPI power button so guest shutdown hooks run.
    async fn power_button(&mut self) -> Result<(), HypervisorError>;

    /// Cold reset of the running machine.
    async fn reset(&mut self) -> Result<(), HypervisorError>;

    /// Stages `device` into the 1-based boot `slot`. Staged slots become
    /// visible to other observers only after [`Session::save_settings`].
    async fn set_boot_slot(
        &mut self,
        slot: u8,
        device: DeviceKind,
    ) -> Result<(), HypervisorError>;

    /// Commits staged configuration changes.
    async fn save_settings(&mut self) -> Result<(), HypervisorError>;

    /// Releases the session's lock on the machine.
    async fn release(&mut self) -> Result<(), HypervisorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_counts_as_on() {
        assert!(MachineState::Running.is_running());
        for state in [
            MachineState::PoweredOff,
            MachineState::Saved,
            MachineState::Aborted,
            MachineState::Paused,
        ] {
            assert!(!state.is_running());
        }
    }

    #[test]
    fn device_translation_is_total_both_ways() {
        for dev in [
            BootDevice::Network,
            BootDevice::HardDisk,
            BootDevice::Optical,
            BootDevice::None,
        ] {
            assert_eq!(boot_device_from(device_kind_for(dev)), dev);
        }
    }
}
