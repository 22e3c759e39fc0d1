// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_p9_scom_api::{Chip, ChipletId, Scom, CHIP_ID_REG};
use p9_timebase::Clock;
use ppc_bits::{ppc_bit, ppc_bitmask, ppc_place};
use ringbuf::*;

use crate::{report_istep, BootCtx, IstepError};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    SecondaryOnXscom { chip_id: u64 },
    RidiEnabled { chip: u8, pec: u8 },
    RngConditionerFailed { chip: u8, cfg: u64 },
}

ringbuf!(Trace, 16, Trace::None);

/// PCIe controllers (PEC) per chip, on chiplets PCI0 onwards.
const MAX_PEC_PER_PROC: u8 = 3;

const NET_CTRL0: u64 = 0x000F_0040;
const NET_CTRL0_WOR: u64 = 0x000F_0042;
const NET_CTRL0_CHIPLET_ENABLE: u64 = ppc_bit(0);
const NET_CTRL0_RIDI: u64 = ppc_bit(19) | ppc_bit(20) | ppc_bit(21);

const NX_RNG_CFG: u64 = 0x0201_10E0;
const NX_RNG_ST0: u64 = 0x0201_10E1;
const NX_RNG_ST1: u64 = 0x0201_10E2;
const NX_RNG_RDELAY: u64 = 0x0201_10E5;
const NX_RNG_ST3: u64 = 0x0201_10E8;

const RNG_CFG_COND_STARTUP_TEST_FAIL: u64 = ppc_bit(44);

/// 10.1 proc_build_smp, the part that concerns SCOM: once the fabric spans
/// both chips, the secondary chip is reached over XSCOM instead of its SBE.
///
/// Fabric configuration itself is done by the platform before this runs.
pub fn fabric_switch_to_xscom<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 10, 1);

    if !ctx.chips().has_secondary() {
        return Ok(());
    }

    ctx.scom.switch_secondary_to_xscom();

    for chip in ctx.chips().iter().filter(|c| !c.is_primary()) {
        let chip_id = ctx.scom.read(chip, CHIP_ID_REG)?;
        if chip_id == u64::MAX {
            return Err(IstepError::XscomNotWorking { chip: chip.0 });
        }
        ringbuf_entry!(Trace::SecondaryOnXscom { chip_id });

        // The bridge was last used for SBE FIFO traffic; start it clean.
        drv_p9_sbe::reset_pib2opb(ctx.scom, chip)?;
    }
    Ok(())
}

/// 10.12 proc_enable_ridi for the PCIe chiplets: enable receivers and
/// drivers of every enabled PEC.
pub fn enable_ridi<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 10, 12);

    for chip in ctx.chips().iter() {
        for pec in 0..MAX_PEC_PER_PROC {
            let chiplet = ChipletId::PCI0.offset(pec);
            let net_ctrl0 = ctx.scom.read_for_chiplet(chip, chiplet, NET_CTRL0)?;
            if net_ctrl0 & NET_CTRL0_CHIPLET_ENABLE != 0 {
                ctx.scom.write_for_chiplet(
                    chip,
                    chiplet,
                    NET_CTRL0_WOR,
                    NET_CTRL0_RIDI,
                )?;
                ringbuf_entry!(Trace::RidiEnabled { chip: chip.0, pec });
            }
        }
    }
    Ok(())
}

/// 10.13 host_rng_bist: configure and start the built-in self test of the
/// random number generator. Results are only looked at once the RNG is
/// secured, much later in boot.
pub fn host_rng_bist<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 10, 13);

    for chip in ctx.chips().iter() {
        rng_bist(ctx.scom, chip)?;
    }
    Ok(())
}

fn rng_bist(scom: &mut impl Scom, chip: Chip) -> Result<(), IstepError> {
    let n0 = ChipletId::N0;

    let cfg = scom.read_for_chiplet(chip, n0, NX_RNG_CFG)?;
    if cfg & RNG_CFG_COND_STARTUP_TEST_FAIL != 0 {
        ringbuf_entry!(Trace::RngConditionerFailed { chip: chip.0, cfg });
        return Err(IstepError::RngSelfTestFailed { chip: chip.0 });
    }

    // Repetition and adaptive proportion test thresholds: 3 repeats, 8-bit
    // samples over a 512 window, 50 matches for each RNG.
    scom.and_or_for_chiplet(
        chip,
        n0,
        NX_RNG_ST0,
        !(ppc_bitmask(0, 1) | ppc_bitmask(7, 63)),
        ppc_place(1, 0, 2)
            | ppc_place(2, 7, 2)
            | ppc_place(1, 9, 3)
            | ppc_place(0x32, 12, 12)
            | ppc_place(0x32, 24, 12)
            | ppc_place(0x32, 36, 12)
            | ppc_place(0x32, 48, 12),
    )?;

    // Soft fail threshold and 1-bit match window [100, 415].
    scom.and_or_for_chiplet(
        chip,
        n0,
        NX_RNG_ST1,
        !ppc_bitmask(0, 38),
        ppc_place(2, 0, 7) | ppc_place(100, 7, 16) | ppc_place(415, 23, 16),
    )?;

    // Sample test over a 64k window, matches in [28000, 39050].
    scom.and_or_for_chiplet(
        chip,
        n0,
        NX_RNG_ST3,
        !ppc_bitmask(0, 35),
        ppc_bit(0)
            | ppc_place(7, 1, 3)
            | ppc_place(0x6D60, 4, 16)
            | ppc_place(0x988A, 20, 16),
    )?;

    // LFSR reseed, read retry ratio 1/16.
    scom.and_or_for_chiplet(
        chip,
        n0,
        NX_RNG_RDELAY,
        !ppc_bitmask(6, 11),
        ppc_bit(6) | ppc_place(0x1D, 7, 5),
    )?;

    // ST2 reset period, all four tests on, pace rate 2000, enable.
    scom.and_or_for_chiplet(
        chip,
        n0,
        NX_RNG_CFG,
        !(ppc_bitmask(30, 37)
            | ppc_bitmask(39, 43)
            | ppc_bitmask(46, 61)
            | ppc_bit(63)),
        ppc_place(0x1B, 30, 8)
            | ppc_bitmask(40, 43)
            | ppc_place(0x07D0, 46, 16)
            | ppc_bit(63),
    )?;
    Ok(())
}
