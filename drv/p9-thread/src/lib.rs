// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Jobs on the second SMT thread
//!
//! Boot runs on thread 0 of core 0. Thread 1 of the same core can be woken
//! with a system reset and put to work on long-running steps (DRAM training
//! of the second memory controller, for instance) while thread 0 carries on.
//!
//! Hand-off is a single slot guarded by a spin lock. The primary thread only
//! fills the slot when it is empty and the secondary thread only empties it
//! after the job has returned, so at most one job is ever pending or running
//! and jobs run in the order they were handed off.

#![cfg_attr(target_os = "none", no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

use drv_p9_scom_api::{Chip, ChipletId, Scom, ScomError};
use ringbuf::*;
use spin::Mutex;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "powerpc64")] {
        mod ppc64;
        pub use ppc64::Power9Smt;
    }
}

#[cfg(not(target_os = "none"))]
mod fakes;
#[cfg(not(target_os = "none"))]
pub use fakes::FakeSmt;

/// Core chiplet that owns thread 1 of the boot core.
const SECOND_THREAD_CORE: ChipletId = ChipletId::EC00.offset(1);

/// Core RAS mode register. Only the interrupt fence bits are ever set here.
const C_RAS_MODEREG: u64 = 0x2001_0A9D;
/// Core direct-control register.
const C_DIRECT_CONTROLS: u64 = 0x2001_0A9C;
/// SRESET of thread 0 in [`C_DIRECT_CONTROLS`]; thread `n` is `n * 4` bits
/// to the right.
const DC_SRESET_T0: u64 = 0x0080_0000_0000_0000;

/// A job for the second thread.
#[derive(Copy, Clone, Debug)]
pub struct Task {
    pub func: fn(usize),
    pub arg: usize,
}

impl Task {
    fn run(self) {
        (self.func)(self.arg)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    TaskAssigned,
    /// The second thread is inside a job.
    Running,
    ExitRequested,
    Stopped,
}

/// Hardware hooks needed to start and park the second thread.
pub trait SmtControl {
    /// Places the system reset handler that sends the thread into
    /// [`JobThread::second_thread`].
    fn install_reset_vector(&mut self);

    /// Enters the deepest stop state, losing all thread state. Only a new
    /// system reset brings the thread back.
    fn stop_with_state_loss(&mut self) -> !;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Started,
    Assigned { arg: usize },
    Ran { arg: usize },
    ExitRequested,
    Stopped { jobs: usize },
}

ringbuf!(Trace, 16, Trace::None);

#[derive(Debug)]
struct Slot {
    task: Option<Task>,
    exit_requested: bool,
}

#[derive(Debug)]
pub struct JobThread {
    slot: Mutex<Slot>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Default for JobThread {
    fn default() -> Self {
        Self::new()
    }
}

impl JobThread {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                task: None,
                exit_requested: false,
            }),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spins until the second thread has finished its current job.
    pub fn wait_second_thread(&self) {
        while self.slot.lock().task.is_some() {
            core::hint::spin_loop();
        }
    }

    /// Hands `func(arg)` to the second thread, first waiting for any earlier
    /// job to finish.
    pub fn on_second_thread(&self, func: fn(usize), arg: usize) {
        self.wait_second_thread();

        let mut slot = self.slot.lock();
        // Only this side fills the slot, and it was seen empty above.
        debug_assert!(slot.task.is_none());
        slot.task = Some(Task { func, arg });
        ringbuf_entry!(Trace::Assigned { arg });
    }

    /// Asks the second thread to stop once it has run the pending job, if
    /// any. Does not wait for that to happen.
    pub fn stop_second_thread(&self) {
        self.slot.lock().exit_requested = true;
        ringbuf_entry!(Trace::ExitRequested);
    }

    /// Job loop of the second thread. Runs jobs until stopped and returns
    /// how many were run.
    ///
    /// A job runs with the lock held, which is what keeps
    /// [`JobThread::wait_second_thread`] spinning until it has returned.
    pub fn run_jobs(&self) -> usize {
        let mut jobs = 0;
        loop {
            let mut slot = self.slot.lock();
            if let Some(task) = slot.task {
                self.running.store(true, Ordering::Release);
                task.run();
                self.running.store(false, Ordering::Release);
                slot.task = None;
                jobs += 1;
                ringbuf_entry!(Trace::Ran { arg: task.arg });
            }
            let done = slot.exit_requested;
            drop(slot);

            if done {
                break;
            }
            core::hint::spin_loop();
        }

        self.stopped.store(true, Ordering::Release);
        ringbuf_entry!(Trace::Stopped { jobs });
        jobs
    }

    /// Current state of the slot. While a job runs the lock is held, so
    /// `Running` is read without taking it.
    pub fn state(&self) -> JobState {
        if self.stopped.load(Ordering::Acquire) {
            return JobState::Stopped;
        }
        if self.running.load(Ordering::Acquire) {
            return JobState::Running;
        }
        let slot = self.slot.lock();
        if slot.exit_requested {
            JobState::ExitRequested
        } else if slot.task.is_some() {
            JobState::TaskAssigned
        } else {
            JobState::Idle
        }
    }

    /// Entry point of the second thread, reached from the reset vector.
    pub fn second_thread(&self, hw: &mut impl SmtControl) -> ! {
        self.run_jobs();
        hw.stop_with_state_loss()
    }
}

/// Wakes thread 1 of the boot core with a system reset. It comes up in the
/// reset vector installed through `hw`.
pub fn start_second_thread(
    scom: &mut impl Scom,
    hw: &mut impl SmtControl,
) -> Result<(), ScomError> {
    hw.install_reset_vector();

    // Reading C_RAS_MODEREG corrupts SPRs, so assume no other bits are set
    // and only clear the interrupt fence.
    scom.write_for_chiplet(
        Chip::PRIMARY,
        SECOND_THREAD_CORE,
        C_RAS_MODEREG,
        0,
    )?;
    scom.write_for_chiplet(
        Chip::PRIMARY,
        SECOND_THREAD_CORE,
        C_DIRECT_CONTROLS,
        DC_SRESET_T0 >> 4,
    )?;
    ringbuf_entry!(Trace::Started);
    Ok(())
}
