// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Power and boot-device control for a hypervisor-managed VM, presented
//! the way a server's baseboard management controller presents it.
//!
//! An external BMC emulation front end owns the IPMI wire protocol and
//! calls into a [`controller::PowerController`] (through the
//! [`controller::ChassisControl`] trait) for the semantic commands: query
//! power state, power on/off, soft shutdown, reset, and get/set the boot
//! device. The controller translates each command into calls against a
//! hypervisor automation API, reached only through the traits in
//! [`hypervisor`], and reports outcomes that map directly onto IPMI
//! completion codes.
//!
//! Nothing here owns a socket, a wire format, or a log drain: transport
//! and authentication belong to the front end, VM execution belongs to
//! the hypervisor, and logging arrives as an injected [`slog::Logger`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vbmc::config::BmcConfig;
//! use vbmc::controller::PowerController;
//! use vbmc::hypervisor::MachineState;
//! use vbmc::mock::MockHypervisor;
//! use vbmc::poll::PollPolicy;
//!
//! # async fn example(log: slog::Logger) -> Result<(), vbmc::controller::ControllerError> {
//! let hypervisor = Arc::new(MockHypervisor::new());
//! hypervisor.add_machine("node-1", MachineState::PoweredOff);
//!
//! let controller = PowerController::new(
//!     BmcConfig::new("node-1"),
//!     hypervisor,
//!     PollPolicy::default(),
//!     &log,
//! );
//!
//! controller.power_on().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod hypervisor;
pub mod mock;
pub mod poll;

pub use config::BmcConfig;
pub use controller::{ChassisControl, ControllerError, PowerController};
pub use hypervisor::{Hypervisor, HypervisorError};
pub use poll::PollPolicy;
