// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives the controller the way a BMC front end would: through the
//! `ChassisControl` trait object, checking the IPMI-visible outcomes.

use std::sync::Arc;

use slog::Logger;

use vbmc::config::BmcConfig;
use vbmc::controller::{ChassisControl, PowerController};
use vbmc::hypervisor::{DeviceKind, MachineState};
use vbmc::mock::{MockHypervisor, MockMachine};
use vbmc::poll::PollPolicy;
use vbmc_api_types::{
    BootDevice, PowerState, IPMI_COMMAND_NODE_BUSY, IPMI_INVALID_DATA,
};

fn test_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

fn chassis(
    hypervisor: &Arc<MockHypervisor>,
    vm_name: &str,
) -> Box<dyn ChassisControl> {
    Box::new(PowerController::new(
        BmcConfig::new(vm_name),
        hypervisor.clone(),
        PollPolicy { max_attempts: 5, ..PollPolicy::default() },
        &test_logger(),
    ))
}

fn powered_off_vm() -> (Arc<MockHypervisor>, MockMachine, Box<dyn ChassisControl>)
{
    let hypervisor = Arc::new(MockHypervisor::new());
    let machine = hypervisor.add_machine("node-1", MachineState::PoweredOff);
    let bmc = chassis(&hypervisor, "node-1");
    (hypervisor, machine, bmc)
}

#[tokio::test(start_paused = true)]
async fn full_power_cycle_as_seen_by_an_ipmi_client() {
    let (_hypervisor, machine, bmc) = powered_off_vm();

    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::Off);

    bmc.power_on().await.unwrap();
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::On);

    // A second power-on must read as success, not an error.
    bmc.power_on().await.unwrap();
    assert_eq!(machine.ops().launches, 1);

    bmc.power_reset().await.unwrap();
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::On);

    bmc.power_shutdown().await.unwrap();
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::Off);

    // Powering off an already-off machine is also a success.
    bmc.power_off().await.unwrap();
    assert_eq!(machine.ops().power_downs, 0);
}

#[tokio::test]
async fn chassis_commands_work_for_a_vm_created_after_the_bmc() {
    let hypervisor = Arc::new(MockHypervisor::new());
    let bmc = chassis(&hypervisor, "late-vm");

    // The VM does not exist yet; the BMC still answers state queries.
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::Off);

    let machine = hypervisor.add_machine("late-vm", MachineState::Running);
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::On);

    // And stops answering usefully if the VM goes away again.
    hypervisor.remove_machine("late-vm");
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::Off);
    drop(machine);
}

#[tokio::test]
async fn boot_device_selection_round_trips() {
    let (_hypervisor, machine, bmc) = powered_off_vm();

    bmc.set_boot_device(BootDevice::Network).await.unwrap();
    let selected = bmc.get_boot_device().await.unwrap();
    assert_eq!(selected, BootDevice::Network);
    assert_eq!(selected.ipmi_code(), 0x04);

    // Exactly one copy of each known device, requested one first, no
    // stale slots.
    assert_eq!(
        machine.boot_order(),
        [
            DeviceKind::Network,
            DeviceKind::Disk,
            DeviceKind::Dvd,
            DeviceKind::Null,
        ]
    );

    bmc.set_boot_device(BootDevice::HardDisk).await.unwrap();
    assert_eq!(bmc.get_boot_device().await.unwrap(), BootDevice::HardDisk);
    assert_eq!(
        machine.boot_order(),
        [
            DeviceKind::Disk,
            DeviceKind::Network,
            DeviceKind::Dvd,
            DeviceKind::Null,
        ]
    );
}

#[tokio::test]
async fn invalid_boot_device_maps_to_invalid_data() {
    let (_hypervisor, machine, bmc) = powered_off_vm();
    let before = machine.boot_order();

    let err = bmc.set_boot_device(BootDevice::None).await.unwrap_err();
    assert_eq!(err.completion_code(), IPMI_INVALID_DATA);
    assert_eq!(machine.boot_order(), before);

    // Tokens a front end fails to translate never reach the controller;
    // the translation error itself carries the invalid-data outcome.
    assert!("bogus".parse::<BootDevice>().is_err());
}

#[tokio::test]
async fn hypervisor_failures_map_to_node_busy() {
    let (_hypervisor, machine, bmc) = powered_off_vm();
    machine.set_state(MachineState::Running);
    machine.fail_next_power_down();

    let err = bmc.power_off().await.unwrap_err();
    assert_eq!(err.completion_code(), IPMI_COMMAND_NODE_BUSY);

    // The machine survives and the next attempt goes through.
    bmc.power_off().await.unwrap();
    assert_eq!(bmc.get_power_state().await.unwrap(), PowerState::Off);
}
