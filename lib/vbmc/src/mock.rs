// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory [`Hypervisor`] implementation.
//!
//! Simulates the pieces of a desktop hypervisor the controller relies on:
//! machines resolved by name, an exclusive session lock per machine, a
//! launch path whose session takes a configurable number of polls to
//! finish acquiring the machine, and boot-order writes that stay invisible
//! until the session saves. Tests use the [`MockMachine`] handle to inject
//! failures and observe what the controller actually did; front ends can
//! also wire it up to run without a real hypervisor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::hypervisor::{
    DeviceKind, Hypervisor, HypervisorError, Machine, MachineState, Session,
    SessionState, BOOT_SLOTS,
};

/// Calls the controller has made against a mock machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub launches: u32,
    pub power_downs: u32,
    pub power_buttons: u32,
    pub resets: u32,
    pub saves: u32,
}

#[derive(Debug)]
struct Core {
    state: MachineState,
    boot_order: [DeviceKind; BOOT_SLOTS as usize],
    locked: bool,
    /// Number of session-state polls a launch session answers with
    /// `Locking` before reporting `Locked`.
    launch_polls: u32,
    fail_power_down: bool,
    fail_save: bool,
    fail_state: bool,
    ops: OpCounts,
}

#[derive(Debug)]
struct MachineInner {
    name: String,
    core: Mutex<Core>,
}

/// Simulated hypervisor holding any number of named machines.
#[derive(Default)]
pub struct MockHypervisor {
    machines: Mutex<BTreeMap<String, Arc<MachineInner>>>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a machine and returns a handle for configuring it and
    /// asserting on what happened to it.
    pub fn add_machine(
        &self,
        name: &str,
        state: MachineState,
    ) -> MockMachine {
        let inner = Arc::new(MachineInner {
            name: name.to_string(),
            core: Mutex::new(Core {
                state,
                boot_order: [
                    DeviceKind::Disk,
                    DeviceKind::Dvd,
                    DeviceKind::Null,
                    DeviceKind::Null,
                ],
                locked: false,
                launch_polls: 0,
                fail_power_down: false,
                fail_save: false,
                fail_state: false,
                ops: OpCounts::default(),
            }),
        });
        self.machines
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&inner));
        MockMachine { inner }
    }

    /// Removes a machine, simulating deletion out from under a controller.
    pub fn remove_machine(&self, name: &str) {
        self.machines.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn find_machine(
        &self,
        name: &str,
    ) -> Result<Box<dyn Machine>, HypervisorError> {
        let machines = self.machines.lock().unwrap();
        match machines.get(name) {
            Some(inner) => {
                Ok(Box::new(MockMachine { inner: Arc::clone(inner) }))
            }
            None => Err(HypervisorError::MachineNotFound(name.to_string())),
        }
    }
}

/// Handle to one mock machine. Clones share the same underlying state, so
/// a test can keep a handle while the controller resolves its own.
#[derive(Clone, Debug)]
pub struct MockMachine {
    inner: Arc<MachineInner>,
}

impl MockMachine {
    pub fn state(&self) -> MachineState {
        self.inner.core.lock().unwrap().state
    }

    pub fn set_state(&self, state: MachineState) {
        self.inner.core.lock().unwrap().state = state;
    }

    pub fn boot_order(&self) -> [DeviceKind; BOOT_SLOTS as usize] {
        self.inner.core.lock().unwrap().boot_order
    }

    pub fn set_boot_order(
        &self,
        order: [DeviceKind; BOOT_SLOTS as usize],
    ) {
        self.inner.core.lock().unwrap().boot_order = order;
    }

    pub fn is_locked(&self) -> bool {
        self.inner.core.lock().unwrap().locked
    }

    pub fn ops(&self) -> OpCounts {
        self.inner.core.lock().unwrap().ops
    }

    /// Makes launch sessions answer `Locking` for `polls` state queries
    /// before reporting `Locked`.
    pub fn set_launch_polls(&self, polls: u32) {
        self.inner.core.lock().unwrap().launch_polls = polls;
    }

    pub fn fail_next_power_down(&self) {
        self.inner.core.lock().unwrap().fail_power_down = true;
    }

    pub fn fail_next_save(&self) {
        self.inner.core.lock().unwrap().fail_save = true;
    }

    pub fn fail_next_state_query(&self) {
        self.inner.core.lock().unwrap().fail_state = true;
    }
}

#[async_trait]
impl Machine for MockMachine {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn state(&self) -> Result<MachineState, HypervisorError> {
        let mut core = self.inner.core.lock().unwrap();
        if core.fail_state {
            core.fail_state = false;
            return Err(HypervisorError::Driver(
                "injected state query failure".to_string(),
            ));
        }
        Ok(core.state)
    }

    async fn boot_order(&self) -> Result<Vec<DeviceKind>, HypervisorError> {
        Ok(self.inner.core.lock().unwrap().boot_order.to_vec())
    }

    async fn launch_headless(
        &self,
    ) -> Result<Box<dyn Session>, HypervisorError> {
        let mut core = self.inner.core.lock().unwrap();
        if core.locked {
            return Err(HypervisorError::AlreadyLocked);
        }
        core.locked = true;
        core.ops.launches += 1;
        let staged = core.boot_order;
        let polls = core.launch_polls;
        Ok(Box::new(MockSession {
            machine: Arc::clone(&self.inner),
            staged,
            launching: true,
            polls_remaining: AtomicU32::new(polls),
            released: false,
        }))
    }

    async fn lock(&self) -> Result<Box<dyn Session>, HypervisorError> {
        let mut core = self.inner.core.lock().unwrap();
        if core.locked {
            return Err(HypervisorError::AlreadyLocked);
        }
        core.locked = true;
        let staged = core.boot_order;
        Ok(Box::new(MockSession {
            machine: Arc::clone(&self.inner),
            staged,
            launching: false,
            polls_remaining: AtomicU32::new(0),
            released: false,
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    machine: Arc<MachineInner>,
    staged: [DeviceKind; BOOT_SLOTS as usize],
    launching: bool,
    polls_remaining: AtomicU32,
    released: bool,
}

impl MockSession {
    fn ensure_locked(&self) -> Result<(), HypervisorError> {
        if self.released {
            return Err(HypervisorError::SessionNotLocked);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn state(&self) -> Result<SessionState, HypervisorError> {
        if self.released {
            return Ok(SessionState::Unlocked);
        }
        if !self.launching {
            return Ok(SessionState::Locked);
        }

        let remaining = self.polls_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.polls_remaining.store(remaining - 1, Ordering::SeqCst);
            return Ok(SessionState::Locking);
        }

        // The launch finished acquiring the machine; the VM process is now
        // running.
        self.machine.core.lock().unwrap().state = MachineState::Running;
        Ok(SessionState::Locked)
    }

    async fn power_down(&mut self) -> Result<(), HypervisorError> {
        self.ensure_locked()?;
        let mut core = self.machine.core.lock().unwrap();
        if core.fail_power_down {
            core.fail_power_down = false;
            return Err(HypervisorError::Driver(
                "injected power down failure".to_string(),
            ));
        }
        core.state = MachineState::PoweredOff;
        core.ops.power_downs += 1;
        Ok(())
    }

    async fn power_button(&mut self) -> Result<(), HypervisorError> {
        self.ensure_locked()?;
        let mut core = self.machine.core.lock().unwrap();
        // The simulated guest always honors the button press.
        core.state = MachineState::PoweredOff;
        core.ops.power_buttons += 1;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), HypervisorError> {
        self.ensure_locked()?;
        let mut core = self.machine.core.lock().unwrap();
        core.ops.resets += 1;
        Ok(())
    }

    async fn set_boot_slot(
        &mut self,
        slot: u8,
        device: DeviceKind,
    ) -> Result<(), HypervisorError> {
        self.ensure_locked()?;
        if slot == 0 || slot > BOOT_SLOTS {
            return Err(HypervisorError::BadBootSlot(slot));
        }
        self.staged[usize::from(slot - 1)] = device;
        Ok(())
    }

    async fn save_settings(&mut self) -> Result<(), HypervisorError> {
        self.ensure_locked()?;
        let mut core = self.machine.core.lock().unwrap();
        if core.fail_save {
            core.fail_save = false;
            return Err(HypervisorError::Driver(
                "injected settings save failure".to_string(),
            ));
        }
        core.boot_order = self.staged;
        core.ops.saves += 1;
        Ok(())
    }

    async fn release(&mut self) -> Result<(), HypervisorError> {
        if !self.released {
            self.released = true;
            self.machine.core.lock().unwrap().locked = false;
        }
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        // Backstop for callers that drop a session without releasing it.
        if !self.released {
            self.machine.core.lock().unwrap().locked = false;
        }
    }
}
