// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions shared between the power/boot controller and the BMC front
//! ends that drive it: power states, the canonical boot device set, and the
//! translations between IPMI wire codes and that set.
//!
//! Front ends decode chassis-control requests off the wire and hand the
//! controller values from this crate; controller results translate back into
//! IPMI completion codes through [`IPMI_COMMAND_NODE_BUSY`] and
//! [`IPMI_INVALID_DATA`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// From the IPMI - Intelligent Platform Management Interface Specification
// Second Generation v2.0, Document Revision 1.1, Table 5-2.

/// Completion code for a command that failed but may be resent by the
/// managing client ("Node Busy").
pub const IPMI_COMMAND_NODE_BUSY: u8 = 0xC0;

/// Completion code for a request with an invalid data field.
pub const IPMI_INVALID_DATA: u8 = 0xCC;

/// Power state of the managed VM as reported to the IPMI front end.
///
/// Derived from the hypervisor on every query, never cached.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum PowerState {
    Off,
    On,
}

impl PowerState {
    /// Encoding used in the chassis status response (bit 0 of the current
    /// power state byte).
    pub const fn as_u8(self) -> u8 {
        match self {
            PowerState::Off => 0,
            PowerState::On => 1,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Off => write!(f, "off"),
            PowerState::On => write!(f, "on"),
        }
    }
}

/// Canonical boot device set understood by the controller.
///
/// `None` means "no device selected" and is never a valid target for a
/// set-boot-device request; it is, however, a valid report (boot slot left
/// empty, or a device kind this adapter does not model).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum BootDevice {
    /// Boot from the network (PXE).
    Network,
    /// Boot from the first hard disk.
    HardDisk,
    /// Boot from optical media.
    Optical,
    /// No boot device selected.
    None,
}

impl BootDevice {
    /// The boot device selector code reported to IPMI clients for this
    /// device. `None` encodes as 0, the "no override" selector.
    pub const fn ipmi_code(self) -> u8 {
        match self {
            BootDevice::Network => 0x04,
            BootDevice::HardDisk => 0x08,
            BootDevice::Optical => 0x14,
            BootDevice::None => 0x00,
        }
    }
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootDevice::Network => write!(f, "network"),
            BootDevice::HardDisk => write!(f, "hd"),
            BootDevice::Optical => write!(f, "optical"),
            BootDevice::None => write!(f, "none"),
        }
    }
}

/// An IPMI boot device selector code with no mapping in this adapter.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("unrecognized boot device selector {0:#04x}")]
pub struct UnknownBootDevice(pub u8);

impl TryFrom<u8> for BootDevice {
    type Error = UnknownBootDevice;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(BootDevice::None),
            0x04 => Ok(BootDevice::Network),
            0x08 => Ok(BootDevice::HardDisk),
            0x14 => Ok(BootDevice::Optical),
            other => Err(UnknownBootDevice(other)),
        }
    }
}

/// A boot device token with no mapping in this adapter.
///
/// Front ends that deal in device names rather than selector codes (the
/// common case for BMC emulation libraries) parse through [`FromStr`] and
/// surface this as an invalid-data completion.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized boot device token {0:?}")]
pub struct UnknownBootDeviceToken(pub String);

impl FromStr for BootDevice {
    type Err = UnknownBootDeviceToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(BootDevice::Network),
            "hd" => Ok(BootDevice::HardDisk),
            // "cdrom" is the token some front ends report back for optical
            // media; accept both spellings on input.
            "optical" | "cdrom" => Ok(BootDevice::Optical),
            other => Err(UnknownBootDeviceToken(other.to_string())),
        }
    }
}
