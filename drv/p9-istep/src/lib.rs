// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! POWER9 isteps
//!
//! Hardware bring-up of a POWER9 system is divided into numbered steps
//! ("isteps", `major.minor`) that must run in a fixed order. Each step here
//! is a function over a [`BootCtx`]: it reports itself with
//! [`report_istep`], then performs SCOM accesses for every chip in the
//! configured chip mask, lowest chip first.
//!
//! Failures are returned as [`IstepError`] and turned into a single
//! [`FatalBootError`] by [`run_plan`]. Nothing here halts the machine; what
//! to do with a fatal error is up to the platform.

#![cfg_attr(target_os = "none", no_std)]

use core::fmt;

use drv_p9_sbe::MailboxError;
use drv_p9_scom_api::{
    Chip, ChipMask, Scom, ScomError, CHIP_ID_REG, MAX_CHIPS, MCS_PER_PROC,
};
use p9_timebase::Clock;
use ringbuf::*;

mod istep10;
mod istep13;
mod istep14;
mod istep18;
mod istep8;
mod istep9;

pub use istep10::{enable_ridi, fabric_switch_to_xscom, host_rng_bist};
pub use istep13::{
    mem_pll_initf, mem_pll_reset, mem_pll_setup, OPCG_BUDGET_US, OPCG_POLL_US,
};
pub use istep14::throttle_sync;
pub use istep18::{tod_init, tod_setup};
pub use istep8::{xbus_addr, xbus_enable_ridi};
pub use istep9::{
    fabric_iovalid, LANE_LOCK_DELAY_MS, XBUS_TRAINING_TIMEOUT_MS,
};

/// An istep number, ordered the way isteps run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IstepId {
    pub major: u8,
    pub minor: u8,
}

impl IstepId {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    const fn precedes(self, other: Self) -> bool {
        self.major < other.major
            || (self.major == other.major && self.minor < other.minor)
    }
}

impl fmt::Display for IstepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Isteps run from romstage, in order.
pub const ROMSTAGE_ISTEPS: &[IstepId] = &[
    IstepId::new(8, 11),
    IstepId::new(9, 7),
    IstepId::new(10, 1),
    IstepId::new(10, 12),
    IstepId::new(10, 13),
    IstepId::new(13, 1),
    IstepId::new(13, 2),
    IstepId::new(13, 3),
    IstepId::new(13, 4),
    IstepId::new(13, 5),
    IstepId::new(13, 7),
    IstepId::new(14, 2),
];

/// Isteps run from ramstage, in order.
pub const RAMSTAGE_ISTEPS: &[IstepId] =
    &[IstepId::new(18, 11), IstepId::new(18, 12)];

const fn strictly_ascending(plan: &[IstepId]) -> bool {
    let mut i = 1;
    while i < plan.len() {
        if !plan[i - 1].precedes(plan[i]) {
            return false;
        }
        i += 1;
    }
    true
}

static_assertions::const_assert!(strictly_ascending(ROMSTAGE_ISTEPS));
static_assertions::const_assert!(strictly_ascending(RAMSTAGE_ISTEPS));
static_assertions::const_assert!(ROMSTAGE_ISTEPS[ROMSTAGE_ISTEPS.len() - 1]
    .precedes(RAMSTAGE_ISTEPS[0]));

/// Run-time description of the machine being booted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct BootConfig {
    /// Present processors, bit `n` for chip `n`.
    pub chips: u8,
    /// DDR4 speed grade in MT/s.
    pub mem_speed_mts: u32,
    /// Functional MCS units, per chip.
    pub mcs_functional: [[bool; MCS_PER_PROC]; MAX_CHIPS as usize],
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            chips: ChipMask::PRIMARY_ONLY.0,
            mem_speed_mts: 2400,
            mcs_functional: [[true; MCS_PER_PROC]; MAX_CHIPS as usize],
        }
    }
}

impl BootConfig {
    /// The chip mask, with chips beyond [`MAX_CHIPS`] dropped.
    pub fn chip_mask(&self) -> ChipMask {
        ChipMask(self.chips & ((1 << MAX_CHIPS) - 1))
    }

    pub fn mcs_functional(&self, chip: Chip, mcs: usize) -> bool {
        self.mcs_functional
            .get(usize::from(chip.0))
            .and_then(|units| units.get(mcs))
            .copied()
            .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IstepError {
    Scom(ScomError),
    /// The secondary chip reads back all ones after the XSCOM switch.
    XscomNotWorking { chip: u8 },
    /// The XBus data link never reported both halves trained.
    XbusTrainingTimeout { chip: u8 },
    RngSelfTestFailed { chip: u8 },
    /// OPCG never signalled the end of the PLL boundary ring flush.
    OpcgDoneTimeout { chip: u8, mcs: u8 },
    UnsupportedMemorySpeed { mts: u32 },
    PllNotLocked { chip: u8, mcs: u8 },
    /// The SBE mailbox was busy when a message was about to be sent.
    SbeMailboxBusy,
    SbeResponseTimeout,
    /// SCOM of the boot chip reads back all ones at the end of romstage.
    ScomStoppedWorking,
    Unimplemented(IstepId),
}

impl From<ScomError> for IstepError {
    fn from(e: ScomError) -> Self {
        Self::Scom(e)
    }
}

impl From<MailboxError> for IstepError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::Busy => Self::SbeMailboxBusy,
            MailboxError::Timeout => Self::SbeResponseTimeout,
            MailboxError::Scom(e) => Self::Scom(e),
        }
    }
}

impl fmt::Display for IstepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Scom(ref e) => fmt::Display::fmt(e, f),
            Self::XscomNotWorking { chip } => {
                write!(f, "XSCOM doesn't work for CPU {chip}")
            }
            Self::XbusTrainingTimeout { chip } => {
                write!(f, "XBus link DL training failed on chip {chip}")
            }
            Self::RngSelfTestFailed { chip } => {
                write!(f, "RNG conditioner startup test failed on chip {chip}")
            }
            Self::OpcgDoneTimeout { chip, mcs } => write!(
                f,
                "timed out while waiting for PLL boundary ring flush \
                 (chip {chip}, MCS{mcs})"
            ),
            Self::UnsupportedMemorySpeed { mts } => {
                write!(f, "unsupported memory speed ({mts} MT/s)")
            }
            Self::PllNotLocked { chip, mcs } => {
                write!(f, "chip {chip} MCS{mcs} PLL not locked")
            }
            Self::SbeMailboxBusy => f.write_str("MBOX to SBE busy"),
            Self::SbeResponseTimeout => {
                f.write_str("timed out while waiting for SBE response")
            }
            Self::ScomStoppedWorking => {
                f.write_str("SCOM stopped working, check FIRs")
            }
            Self::Unimplemented(id) => write!(f, "istep {id} is not implemented"),
        }
    }
}

/// The error that ends a boot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FatalBootError {
    pub istep: IstepId,
    pub error: IstepError,
}

impl fmt::Display for FatalBootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "istep {}: {}", self.istep, self.error)
    }
}

#[cfg(not(target_os = "none"))]
impl std::error::Error for FatalBootError {}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Istep { major: u8, minor: u8 },
    Failed { major: u8, minor: u8, error: IstepError },
    ScomCheck { value: u64 },
}

ringbuf!(Trace, 32, Trace::None);

/// Everything an istep operates on.
pub struct BootCtx<'a, S: Scom, C: Clock> {
    pub scom: &'a mut S,
    pub clock: &'a C,
    pub config: &'a BootConfig,
    last_istep: Option<IstepId>,
}

impl<'a, S: Scom, C: Clock> BootCtx<'a, S, C> {
    pub fn new(scom: &'a mut S, clock: &'a C, config: &'a BootConfig) -> Self {
        Self {
            scom,
            clock,
            config,
            last_istep: None,
        }
    }

    pub fn chips(&self) -> ChipMask {
        self.config.chip_mask()
    }

    /// The most recently reported istep.
    pub fn last_istep(&self) -> Option<IstepId> {
        self.last_istep
    }
}

/// Records that istep `major.minor` is starting. Called by every istep
/// before it touches hardware.
pub fn report_istep<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    major: u8,
    minor: u8,
) {
    ringbuf_entry!(Trace::Istep { major, minor });
    ctx.last_istep = Some(IstepId::new(major, minor));
}

/// An istep with nothing to do on this platform.
fn no_op<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    id: IstepId,
) -> Result<(), IstepError> {
    report_istep(ctx, id.major, id.minor);
    Ok(())
}

/// Runs a single istep.
pub fn run_istep<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    id: IstepId,
) -> Result<(), IstepError> {
    match (id.major, id.minor) {
        (8, 11) => xbus_enable_ridi(ctx),
        (9, 7) => fabric_iovalid(ctx),
        (10, 1) => fabric_switch_to_xscom(ctx),
        (10, 12) => enable_ridi(ctx),
        (10, 13) => host_rng_bist(ctx),
        (13, 1) | (13, 5) | (13, 7) => no_op(ctx, id),
        (13, 2) => mem_pll_reset(ctx),
        (13, 3) => mem_pll_initf(ctx),
        (13, 4) => mem_pll_setup(ctx),
        (14, 2) => throttle_sync(ctx),
        (18, 11) => tod_setup(ctx),
        (18, 12) => tod_init(ctx),
        _ => Err(IstepError::Unimplemented(id)),
    }
}

/// Runs `plan` in order, stopping at the first failure.
pub fn run_plan<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    plan: &[IstepId],
) -> Result<(), FatalBootError> {
    for &istep in plan {
        run_istep(ctx, istep).map_err(|error| {
            ringbuf_entry!(Trace::Failed {
                major: istep.major,
                minor: istep.minor,
                error
            });
            FatalBootError { istep, error }
        })?;
    }
    Ok(())
}

/// Checks that SCOM on the boot chip still answers. A machine check or a
/// checkstop leaves every SCOM read returning all ones.
pub fn check_scom_alive<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    let value = ctx.scom.read(Chip::PRIMARY, CHIP_ID_REG)?;
    ringbuf_entry!(Trace::ScomCheck { value });
    if value == u64::MAX {
        return Err(IstepError::ScomStoppedWorking);
    }
    Ok(())
}

/// Runs the romstage isteps followed by the SCOM liveness check.
pub fn run_romstage<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), FatalBootError> {
    run_plan(ctx, ROMSTAGE_ISTEPS)?;
    check_scom_alive(ctx).map_err(|error| FatalBootError {
        istep: ROMSTAGE_ISTEPS[ROMSTAGE_ISTEPS.len() - 1],
        error,
    })
}

pub fn run_ramstage<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), FatalBootError> {
    run_plan(ctx, RAMSTAGE_ISTEPS)
}
