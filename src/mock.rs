//! Test doubles for the device seams.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Mutex;
use std::vec;
use std::vec::Vec;

#[cfg(feature = "async")]
use alloc::boxed::Box;
#[cfg(feature = "async")]
use async_trait::async_trait;

use crate::image::{PATCHRAM_BASE, PATCHRAM_SIZE, ProgramHeader};
#[cfg(feature = "async")]
use crate::io::AsyncEeprom;
use crate::io::{Eeprom, ExecutionRegion};
use crate::scheduler::{Scheduler, TaskId, TaskSpec};

/// Build an image with the given header fields, `len` bytes long, with a
/// recognisable pattern after the header.
pub fn build_image(magic: u32, sp: u32, entry: u32, link: u32, len: usize) -> Vec<u8> {
    let header = ProgramHeader {
        magic,
        stack_pointer: sp,
        entry_point: entry,
        link_base: link,
    };
    let mut image: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
    let n = len.min(ProgramHeader::size());
    image[..n].copy_from_slice(&header.to_bytes()[..n]);
    image
}

/// Heap backed execution region.
pub struct MemRegion {
    base: u32,
    mem: Vec<u8>,
}

impl MemRegion {
    pub fn new(base: u32, capacity: usize) -> Self {
        Self {
            base,
            mem: vec![0; capacity],
        }
    }

    pub fn patchram() -> Self {
        Self::new(PATCHRAM_BASE, PATCHRAM_SIZE)
    }
}

impl ExecutionRegion for MemRegion {
    fn base(&self) -> u32 {
        self.base
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.mem
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromOp {
    Unlock,
    Erase(u32),
    Write(u32, usize),
    Lock,
    Read(u32, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockEepromError;

const EEPROM_SIZE: usize = 1024 * 1024;
const ERASE_SIZE: usize = 128 * 1024;

/// In-memory flash that records every driver call.
pub struct MockEeprom {
    pub mem: Vec<u8>,
    pub ops: Vec<EepromOp>,
    pub locked: bool,
    /// Fail the first operation matching this predicate
    pub fail: Option<fn(&EepromOp) -> bool>,
}

impl MockEeprom {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFF; EEPROM_SIZE],
            ops: Vec::new(),
            locked: true,
            fail: None,
        }
    }

    fn record(&mut self, op: EepromOp) -> Result<(), MockEepromError> {
        self.ops.push(op);
        if let Some(fail) = self.fail {
            if fail(&op) {
                self.fail = None;
                return Err(MockEepromError);
            }
        }
        Ok(())
    }
}

impl Eeprom for MockEeprom {
    type Error = MockEepromError;

    fn unlock(&mut self) -> Result<(), Self::Error> {
        self.record(EepromOp::Unlock)?;
        self.locked = false;
        Ok(())
    }

    fn erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        self.record(EepromOp::Erase(addr))?;
        assert!(!self.locked, "erase while locked");
        let start = addr as usize;
        self.mem[start..start + ERASE_SIZE].fill(0xFF);
        Ok(())
    }

    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.record(EepromOp::Write(addr, data.len()))?;
        assert!(!self.locked, "write while locked");
        let start = addr as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn lock(&mut self) -> Result<(), Self::Error> {
        self.record(EepromOp::Lock)?;
        self.locked = true;
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.record(EepromOp::Read(addr, buf.len()))?;
        let start = addr as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncEeprom for MockEeprom {
    type Error = MockEepromError;

    async fn unlock(&mut self) -> Result<(), Self::Error> {
        Eeprom::unlock(self)
    }

    async fn erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        Eeprom::erase(self, addr)
    }

    async fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        Eeprom::write_block(self, addr, data)
    }

    async fn lock(&mut self) -> Result<(), Self::Error> {
        Eeprom::lock(self)
    }

    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        Eeprom::read(self, addr, buf)
    }
}

/// Drive a future that never actually waits to completion.
#[cfg(feature = "async")]
pub fn block_on<F: core::future::Future>(fut: F) -> F::Output {
    use core::task::{Context, Poll, Waker};

    let mut fut = core::pin::pin!(fut);
    let mut cx = Context::from_waker(Waker::noop());
    loop {
        if let Poll::Ready(output) = fut.as_mut().poll(&mut cx) {
            return output;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedEvent {
    Spawn(&'static str, TaskId),
    Delete(TaskId),
    Resume(TaskId),
    Suspend(TaskId),
    Notify(TaskId),
    Wait(u32),
}

#[derive(Debug)]
pub struct MockTask {
    pub id: TaskId,
    pub name: &'static str,
    pub priority: u8,
    pub stack_bytes: usize,
    pub state: TaskState,
}

#[derive(Debug, Default)]
pub struct SchedState {
    pub next_id: usize,
    pub tasks: Vec<MockTask>,
    pub events: Vec<SchedEvent>,
    pub current: Option<TaskId>,
    pub notified: bool,
    pub fail_spawn: bool,
    pub yields: usize,
    pub isr_switches: usize,
    pub free_stack: usize,
}

/// Scheduler modelling FreeRTOS task resume/suspend semantics: resuming a
/// task that is not suspended does nothing.
pub struct MockScheduler {
    pub state: Mutex<SchedState>,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedState {
                next_id: 1,
                free_stack: 4096,
                ..SchedState::default()
            }),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut SchedState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn events(&self) -> Vec<SchedEvent> {
        self.with(|s| s.events.clone())
    }

    pub fn clear_events(&self) {
        self.with(|s| s.events.clear())
    }

    pub fn task_named(&self, name: &str) -> Option<TaskId> {
        self.with(|s| s.tasks.iter().find(|t| t.name == name).map(|t| t.id))
    }

    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.with(|s| s.tasks.iter().find(|t| t.id == task).map(|t| t.state))
    }

    pub fn set_current(&self, task: TaskId) {
        self.with(|s| s.current = Some(task))
    }

    pub fn resumes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SchedEvent::Resume(_)))
            .count()
    }
}

impl Scheduler for MockScheduler {
    type Error = &'static str;

    fn spawn(&self, spec: &TaskSpec) -> Result<TaskId, Self::Error> {
        self.with(|s| {
            if s.fail_spawn {
                return Err("out of heap");
            }
            let id = TaskId(s.next_id);
            s.next_id += 1;
            s.tasks.push(MockTask {
                id,
                name: spec.name,
                priority: spec.priority,
                stack_bytes: spec.stack_bytes,
                state: TaskState::Running,
            });
            s.events.push(SchedEvent::Spawn(spec.name, id));
            Ok(id)
        })
    }

    fn delete(&self, task: TaskId) {
        self.with(|s| {
            s.tasks.retain(|t| t.id != task);
            s.events.push(SchedEvent::Delete(task));
        })
    }

    fn resume_from_isr(&self, task: TaskId) -> bool {
        self.with(|s| match s.tasks.iter_mut().find(|t| t.id == task) {
            Some(t) if t.state == TaskState::Suspended => {
                t.state = TaskState::Running;
                s.events.push(SchedEvent::Resume(task));
                true
            }
            _ => false,
        })
    }

    fn suspend_current(&self) {
        self.with(|s| {
            if let Some(current) = s.current {
                if let Some(t) = s.tasks.iter_mut().find(|t| t.id == current) {
                    t.state = TaskState::Suspended;
                }
                s.events.push(SchedEvent::Suspend(current));
            }
        })
    }

    fn yield_now(&self) {
        self.with(|s| s.yields += 1);
        std::thread::yield_now();
    }

    fn notify_from_isr(&self, task: TaskId) -> bool {
        self.with(|s| {
            s.notified = true;
            s.events.push(SchedEvent::Notify(task));
            true
        })
    }

    fn wait_notify(&self, timeout_ms: u32) -> bool {
        self.with(|s| {
            s.events.push(SchedEvent::Wait(timeout_ms));
            core::mem::take(&mut s.notified)
        })
    }

    fn yield_from_isr(&self, switch: bool) {
        if switch {
            self.with(|s| s.isr_switches += 1);
        }
    }

    fn stack_high_water_mark(&self, task: TaskId) -> Option<usize> {
        self.with(|s| {
            s.tasks
                .iter()
                .any(|t| t.id == task)
                .then_some(s.free_stack)
        })
    }

    fn task_count(&self) -> usize {
        self.with(|s| s.tasks.len())
    }
}
