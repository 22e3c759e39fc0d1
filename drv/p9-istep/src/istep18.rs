// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-of-day network bring-up. Only the master topology of a single drawer
//! is supported: chip 0 is the master TOD and drives the whole network.

use drv_p9_scom_api::{Chip, Scom, ScomError};
use p9_timebase::{wait_us, Clock};
use ppc_bits::{ppc_bit, ppc_bitmask};
use ringbuf::*;

use crate::{report_istep, BootCtx, IstepError};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    MPath(u64),
    FsmRunning { us: u64 },
    FsmNotRunning,
}

ringbuf!(Trace, 8, Trace::None);

const TOD_M_PATH_CTRL: u64 = 0x0004_0000;
const TOD_PRI_PORT_0_CTRL: u64 = 0x0004_0001;
const TOD_PRI_PORT_1_CTRL: u64 = 0x0004_0002;
const TOD_SEC_PORT_0_CTRL: u64 = 0x0004_0003;
const TOD_SEC_PORT_1_CTRL: u64 = 0x0004_0004;
const TOD_S_PATH_CTRL: u64 = 0x0004_0005;
const TOD_I_PATH_CTRL: u64 = 0x0004_0006;
const TOD_PSS_MSS_CTRL: u64 = 0x0004_0007;
const TOD_CHIP_CTRL: u64 = 0x0004_0010;
const TOD_TX_TTYPE_2: u64 = 0x0004_0013;
const TOD_TX_TTYPE_4: u64 = 0x0004_0015;
const TOD_TX_TTYPE_5: u64 = 0x0004_0016;
const TOD_LOAD_TOD_MOD: u64 = 0x0004_0018;
const TOD_LOAD_TOD: u64 = 0x0004_0021;
const TOD_START_TOD: u64 = 0x0004_0022;
const TOD_FSM: u64 = 0x0004_0024;
const TOD_ERROR: u64 = 0x0004_0030;
const TOD_ERROR_MASK: u64 = 0x0004_0032;

const PERV_ROOT_CTRL8: u64 = 0x0005_0018;
const ROOT_CTRL8_TP_PLL_CLKIN_SEL9: u64 = ppc_bit(21);

const M_PATH_STEP_CREATE_DUAL_EDGE_DISABLE: u64 = ppc_bit(4);
const FSM_IS_RUNNING: u64 = ppc_bit(4);

/// Grid cycles of staging delay on the master drawer. Node link delays only
/// matter once more than one drawer takes part.
const MDMT_TOD_GRID_CYCLE_STAGING_DELAY: u64 = 6;

/// Value loaded into the TOD before it is started.
const TOD_LOAD_VALUE: u64 = 0x3FF0_0000_0000_0000;

const FSM_TIMEOUT_US: u64 = 1000;

/// 18.11 proc_tod_setup: configure the TOD of the master chip.
pub fn tod_setup<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 18, 11);

    let scom = &mut *ctx.scom;
    let chip = Chip::PRIMARY;

    scom.write(chip, TOD_S_PATH_CTRL, ppc_bitmask(27, 32))?;
    scom.write(chip, TOD_PRI_PORT_0_CTRL, MDMT_TOD_GRID_CYCLE_STAGING_DELAY)?;
    // Drawer master; a drawer slave would leave bit 1 clear.
    scom.write(
        chip,
        TOD_PSS_MSS_CTRL,
        ppc_bitmask(1, 2) | ppc_bitmask(9, 10),
    )?;
    scom.write(chip, TOD_SEC_PORT_1_CTRL, 0)?;
    scom.write(chip, TOD_PRI_PORT_1_CTRL, 0)?;

    let m_path = m_path(scom, chip)?;
    ringbuf_entry!(Trace::MPath(m_path));
    scom.write(chip, TOD_M_PATH_CTRL, m_path)?;

    scom.write(chip, TOD_SEC_PORT_0_CTRL, ppc_bitmask(38, 39))?;
    scom.write(
        chip,
        TOD_I_PATH_CTRL,
        ppc_bitmask(8, 11)
            | ppc_bitmask(14, 15)
            | ppc_bit(29)
            | ppc_bitmask(34, 36)
            | ppc_bitmask(38, 39),
    )?;
    scom.write(chip, TOD_CHIP_CTRL, ppc_bitmask(10, 15))?;
    Ok(())
}

/// Master path control: oscillator 0 selected, step checking on, dual edge
/// stepping off when the PLL input is the alternate reference clock.
fn m_path(scom: &mut impl Scom, chip: Chip) -> Result<u64, ScomError> {
    let mut value = scom.read(chip, TOD_M_PATH_CTRL)?;
    if scom.read(chip, PERV_ROOT_CTRL8)? & ROOT_CTRL8_TP_PLL_CLKIN_SEL9 != 0 {
        value |= M_PATH_STEP_CREATE_DUAL_EDGE_DISABLE;
    }

    value &= !(ppc_bit(0)
        | ppc_bit(2)
        | ppc_bitmask(5, 7)
        | ppc_bitmask(9, 11)
        | ppc_bitmask(14, 15)
        | ppc_bitmask(24, 25));
    value |= ppc_bit(1) | ppc_bit(8) | ppc_bit(13);
    Ok(value)
}

/// 18.12 proc_tod_init: load and start the TOD network from the master.
pub fn tod_init<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 18, 12);

    let scom = &mut *ctx.scom;
    let chip = Chip::PRIMARY;

    scom.write(chip, TOD_ERROR, !0)?;

    scom.write(chip, TOD_TX_TTYPE_2, ppc_bit(0))?;
    scom.write(chip, TOD_LOAD_TOD_MOD, ppc_bit(0))?;
    scom.write(chip, TOD_TX_TTYPE_5, ppc_bit(0))?;
    scom.write(chip, TOD_LOAD_TOD, TOD_LOAD_VALUE)?;
    scom.write(chip, TOD_START_TOD, ppc_bit(0))?;
    scom.write(chip, TOD_TX_TTYPE_4, ppc_bit(0))?;

    // A TOD that does not start is not fatal for the boot itself.
    let running = wait_us(ctx.clock, FSM_TIMEOUT_US, 1, || {
        Ok::<_, ScomError>(scom.read(chip, TOD_FSM)? & FSM_IS_RUNNING != 0)
    })?;
    match running {
        Some(us) => ringbuf_entry!(Trace::FsmRunning { us }),
        None => ringbuf_entry!(Trace::FsmNotRunning),
    }

    // RX TTYPE 2, 4 and 5 were just sent by ourselves.
    scom.write(chip, TOD_ERROR, ppc_bit(40) | ppc_bit(42) | ppc_bit(43))?;
    scom.write(chip, TOD_ERROR_MASK, ppc_bitmask(38, 43))?;
    Ok(())
}
