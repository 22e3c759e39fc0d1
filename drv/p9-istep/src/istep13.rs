// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory controller PLL bring-up (isteps 13.2 to 13.4).
//!
//! The memory chiplets run asynchronously to the fabric, so each MCS has
//! its own PLL: 13.2 holds it in reset and flushes the boundary ring, 13.3
//! has the SBE scan in the ring image for the memory speed, 13.4 releases
//! the PLL and checks for lock.

use drv_p9_sbe::{PsuMailbox, PutRingRequest, RingId};
use drv_p9_scom_api::{Chip, ChipletId, Scom, MCS_IDS};
use p9_timebase::{mdelay, wait_us, Clock};
use ppc_bits::{ppc_bit, ppc_bitmask, ppc_shift};
use ringbuf::*;

use crate::{report_istep, BootCtx, IstepError};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    OpcgDone { chip: u8, mcs: u8, us: u64 },
    OpcgTimeout { chip: u8, mcs: u8 },
    PutRingDone { chip: u8, mcs: u8, ms: u64 },
    PllLock { chip: u8, mcs: u8, lock: u64 },
}

ringbuf!(Trace, 16, Trace::None);

// PCB slave of the memory chiplet.
const NET_CTRL0_WAND: u64 = 0x000F_0041;
const NET_CTRL0_WOR: u64 = 0x000F_0042;
const NET_CTRL0_PCB_EP_RESET: u32 = 1;
const NET_CTRL0_PLL_TEST_EN: u32 = 3;
const NET_CTRL0_PLL_RESET: u32 = 4;
const NET_CTRL0_PLL_BYPASS: u32 = 5;

const NET_CTRL1_WAND: u64 = 0x000F_0045;
const NET_CTRL1_WOR: u64 = 0x000F_0046;
const NET_CTRL1_CLK_DCC_BYPASS_EN: u32 = 1;
const NET_CTRL1_CLK_PDLY_BYPASS_EN: u32 = 2;

const SLAVE_CONFIG_REG: u64 = 0x000F_001E;
/// The PLL unlock bit of the error mask.
const SLAVE_CONFIG_MASK_PLL_UNLOCK: u32 = 12;
const ERROR_REG: u64 = 0x000F_001F;
const PLL_LOCK_REG: u64 = 0x000F_0019;

// Clock controller of the memory chiplet.
const SYNC_CONFIG: u64 = 0x0003_0000;
const SYNC_CONFIG_LISTEN_TO_SYNC_PULSE_DIS: u32 = 4;

const OPCG_ALIGN: u64 = 0x0003_0001;
const OPCG_ALIGN_INOP_ALIGN: u32 = 3;
const OPCG_ALIGN_SCAN_RATIO: u32 = 51;
const OPCG_ALIGN_OPCG_WAIT_CYCLES: u32 = 63;

const OPCG_REG0: u64 = 0x0003_0002;
const OPCG_RUNN_MODE: u32 = 0;
const OPCG_RUN_SCAN0: u32 = 2;

const SCAN_REGION_TYPE: u64 = 0x0003_0005;
const SCAN_REGION_UNIT10: u32 = 14;
const SCAN_TYPE_BNDY: u32 = 56;

const CLK_REGION: u64 = 0x0003_0006;
const CLOCK_REGION_UNIT10: u32 = 14;
const SEL_THOLD_SL: u32 = 48;
const SEL_THOLD_NSL: u32 = 49;
const SEL_THOLD_ARY: u32 = 50;

const CPLT_STAT0: u64 = 0x0000_0100;
const CPLT_STAT0_CC_CTRL_OPCG_DONE_DC: u32 = 8;

/// Poll interval while waiting for OPCG.
pub const OPCG_POLL_US: u64 = 16;
/// Time allowed for the boundary flush of all MCSes of one chip.
pub const OPCG_BUDGET_US: u64 = 200 * OPCG_POLL_US;

/// Time the PLL gets to lock after leaving reset.
const PLL_LOCK_DELAY_MS: u64 = 5;

/// 13.2 mem_pll_reset: put the memory PLLs in bypass and reset, then scan0
/// flush the PLL boundary ring.
pub fn mem_pll_reset<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 13, 2);

    for chip in ctx.chips().iter() {
        for mcs in MCS_IDS {
            pll_reset(ctx.scom, chip, mcs)?;
        }

        // The flushes run in parallel; wait for them in a separate loop so
        // a slow MCS doesn't cost the full budget more than once.
        let mut spent = 0;
        for (i, mcs) in MCS_IDS.into_iter().enumerate() {
            let scom = &mut *ctx.scom;
            let elapsed = wait_us(
                ctx.clock,
                OPCG_BUDGET_US.saturating_sub(spent),
                OPCG_POLL_US,
                || {
                    Ok::<_, IstepError>(
                        scom.read_for_chiplet(chip, mcs, CPLT_STAT0)?
                            & ppc_bit(CPLT_STAT0_CC_CTRL_OPCG_DONE_DC)
                            != 0,
                    )
                },
            )?;
            let Some(us) = elapsed else {
                ringbuf_entry!(Trace::OpcgTimeout {
                    chip: chip.0,
                    mcs: i as u8
                });
                return Err(IstepError::OpcgDoneTimeout {
                    chip: chip.0,
                    mcs: i as u8,
                });
            };
            ringbuf_entry!(Trace::OpcgDone {
                chip: chip.0,
                mcs: i as u8,
                us
            });
            spent += us;

            ctx.scom.write_for_chiplet(chip, mcs, CLK_REGION, 0)?;
            ctx.scom.write_for_chiplet(chip, mcs, SCAN_REGION_TYPE, 0)?;
        }
    }
    Ok(())
}

fn pll_reset(
    scom: &mut impl Scom,
    chip: Chip,
    mcs: ChipletId,
) -> Result<(), IstepError> {
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL0_WOR,
        ppc_bit(NET_CTRL0_PCB_EP_RESET),
    )?;
    scom.or_for_chiplet(
        chip,
        mcs,
        SLAVE_CONFIG_REG,
        ppc_bit(SLAVE_CONFIG_MASK_PLL_UNLOCK),
    )?;

    // Three separate writes, in this order.
    for bit in [
        NET_CTRL0_PLL_BYPASS,
        NET_CTRL0_PLL_RESET,
        NET_CTRL0_PLL_TEST_EN,
    ] {
        scom.write_for_chiplet(chip, mcs, NET_CTRL0_WOR, ppc_bit(bit))?;
    }

    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL1_WOR,
        ppc_bit(NET_CTRL1_CLK_DCC_BYPASS_EN)
            | ppc_bit(NET_CTRL1_CLK_PDLY_BYPASS_EN),
    )?;
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL0_WAND,
        !ppc_bit(NET_CTRL0_PCB_EP_RESET),
    )?;

    // Memory runs asynchronously to the nest.
    scom.or_for_chiplet(
        chip,
        mcs,
        SYNC_CONFIG,
        ppc_bit(SYNC_CONFIG_LISTEN_TO_SYNC_PULSE_DIS),
    )?;

    // INOP_ALIGN 8:1, scan ratio 1:1, 0x20 OPCG wait cycles.
    scom.write_for_chiplet(
        chip,
        mcs,
        OPCG_ALIGN,
        ppc_shift(5, OPCG_ALIGN_INOP_ALIGN)
            | ppc_shift(0x20, OPCG_ALIGN_OPCG_WAIT_CYCLES),
    )?;

    // scan0 flush of the PLL boundary ring
    scom.write_for_chiplet(
        chip,
        mcs,
        CLK_REGION,
        ppc_bit(CLOCK_REGION_UNIT10)
            | ppc_bit(SEL_THOLD_SL)
            | ppc_bit(SEL_THOLD_NSL)
            | ppc_bit(SEL_THOLD_ARY),
    )?;
    scom.write_for_chiplet(
        chip,
        mcs,
        SCAN_REGION_TYPE,
        ppc_bit(SCAN_REGION_UNIT10) | ppc_bit(SCAN_TYPE_BNDY),
    )?;
    scom.and_for_chiplet(chip, mcs, OPCG_REG0, !ppc_bit(OPCG_RUNN_MODE))?;
    scom.or_for_chiplet(chip, mcs, OPCG_REG0, ppc_bit(OPCG_RUN_SCAN0))?;
    Ok(())
}

/// 13.3 mem_pll_initf: have the SBE scan the PLL ring image for the memory
/// speed into every functional MCS.
pub fn mem_pll_initf<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 13, 3);

    let mts = ctx.config.mem_speed_mts;
    let ring = RingId::for_mem_speed(mts)
        .ok_or(IstepError::UnsupportedMemorySpeed { mts })?;

    let config = ctx.config;
    let chips = ctx.chips();
    let mut mbox = PsuMailbox::new(&mut *ctx.scom, ctx.clock);
    for chip in chips.iter() {
        for (i, chiplet) in MCS_IDS.into_iter().enumerate() {
            if !config.mcs_functional(chip, i) {
                continue;
            }
            let ms = mbox.put_ring(chip, &PutRingRequest { chiplet, ring })?;
            ringbuf_entry!(Trace::PutRingDone {
                chip: chip.0,
                mcs: i as u8,
                ms
            });
        }
    }
    Ok(())
}

/// 13.4 mem_pll_setup: take the memory PLLs out of reset and bypass and
/// check that they locked.
pub fn mem_pll_setup<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 13, 4);

    for chip in ctx.chips().iter() {
        for (i, mcs) in MCS_IDS.into_iter().enumerate() {
            pll_setup(ctx.scom, ctx.clock, chip, i as u8, mcs)?;
        }
    }
    Ok(())
}

fn pll_setup(
    scom: &mut impl Scom,
    clock: &impl Clock,
    chip: Chip,
    index: u8,
    mcs: ChipletId,
) -> Result<(), IstepError> {
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL1_WAND,
        !ppc_bit(NET_CTRL1_CLK_PDLY_BYPASS_EN),
    )?;
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL1_WAND,
        !ppc_bit(NET_CTRL1_CLK_DCC_BYPASS_EN),
    )?;
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL0_WAND,
        !ppc_bit(NET_CTRL0_PLL_TEST_EN),
    )?;
    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL0_WAND,
        !ppc_bit(NET_CTRL0_PLL_RESET),
    )?;

    // A fixed delay rather than a poll: the MCS may not answer SCOM while
    // its PLL is relocking.
    mdelay(clock, PLL_LOCK_DELAY_MS);

    let lock = scom.read_for_chiplet(chip, mcs, PLL_LOCK_REG)?;
    ringbuf_entry!(Trace::PllLock {
        chip: chip.0,
        mcs: index,
        lock
    });
    if lock & ppc_bit(0) == 0 {
        return Err(IstepError::PllNotLocked {
            chip: chip.0,
            mcs: index,
        });
    }

    scom.write_for_chiplet(
        chip,
        mcs,
        NET_CTRL0_WAND,
        !ppc_bit(NET_CTRL0_PLL_BYPASS),
    )?;

    // Scan ratio 4:1
    scom.and_or_for_chiplet(
        chip,
        mcs,
        OPCG_ALIGN,
        !ppc_bitmask(47, 51),
        ppc_shift(3, OPCG_ALIGN_SCAN_RATIO),
    )?;

    // Write 1 to clear
    scom.write_for_chiplet(chip, mcs, ERROR_REG, !0)?;
    scom.and_for_chiplet(
        chip,
        mcs,
        SLAVE_CONFIG_REG,
        !ppc_bit(SLAVE_CONFIG_MASK_PLL_UNLOCK),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootConfig;
    use drv_p9_sbe::psu::{
        PSU_HOST_DOORBELL_REG, PSU_HOST_SBE_MBOX1_REG, PSU_SBE_DOORBELL_REG,
    };
    use drv_p9_scom_api::{chiplet_addr, FakeScom};
    use p9_timebase::FakeClock;

    fn mc(addr: u64, mcs: ChipletId) -> u64 {
        chiplet_addr(addr, mcs)
    }

    fn opcg_done(scom: &mut FakeScom, chip: Chip) {
        for mcs in MCS_IDS {
            scom.set(chip, mc(CPLT_STAT0, mcs), ppc_bit(8));
        }
    }

    #[test]
    fn pll_reset_sequence() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        opcg_done(&mut scom, Chip(0));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        mem_pll_reset(&mut ctx).unwrap();

        let mc01 = ChipletId::MC01;
        assert_eq!(
            scom.writes_to(Chip(0), mc(NET_CTRL0_WOR, mc01)),
            [ppc_bit(1), ppc_bit(5), ppc_bit(4), ppc_bit(3)]
        );
        assert_eq!(
            scom.writes_to(Chip(0), mc(NET_CTRL0_WAND, mc01)),
            [!ppc_bit(1)]
        );
        assert_eq!(
            scom.writes_to(Chip(0), mc(OPCG_ALIGN, mc01)),
            [0x5000_0000_0000_0020]
        );
        assert_eq!(
            scom.writes_to(Chip(0), mc(CLK_REGION, ChipletId::MC23)),
            [0x0002_0000_0000_E000, 0]
        );
        assert_eq!(
            scom.writes_to(Chip(0), mc(SCAN_REGION_TYPE, mc01)),
            [0x0002_0000_0000_0080, 0]
        );
        assert_eq!(scom.get(Chip(0), mc(OPCG_REG0, mc01)), ppc_bit(2));
        // Nothing is waited for when OPCG is already done.
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn flush_budget_is_shared_per_chip() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        // MC01 finishes; MC23 never does.
        scom.set(Chip(0), mc(CPLT_STAT0, ChipletId::MC01), ppc_bit(8));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        assert_eq!(
            mem_pll_reset(&mut ctx),
            Err(IstepError::OpcgDoneTimeout { chip: 0, mcs: 1 })
        );
        // MC01 was charged the minimum of 1 us.
        assert_eq!(clock.now_us(), OPCG_BUDGET_US - 1);
    }

    #[test]
    fn ring_per_functional_mcs() {
        let clock = FakeClock::new();
        let mut config = BootConfig {
            chips: 0x03,
            mem_speed_mts: 2666,
            ..BootConfig::default()
        };
        config.mcs_functional[0][1] = false;
        let mut scom = FakeScom::new();
        scom.set(Chip(0), PSU_HOST_DOORBELL_REG, ppc_bit(0));
        scom.set(Chip(1), PSU_HOST_DOORBELL_REG, ppc_bit(0));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        mem_pll_initf(&mut ctx).unwrap();

        assert_eq!(
            scom.writes_to(Chip(0), PSU_HOST_SBE_MBOX1_REG),
            [0x0002_0007_006E_0004]
        );
        assert_eq!(
            scom.writes_to(Chip(1), PSU_HOST_SBE_MBOX1_REG),
            [0x0002_0007_006E_0004, 0x0002_0008_006E_0004]
        );
    }

    #[test]
    fn unsupported_speed_touches_nothing() {
        let clock = FakeClock::new();
        let config = BootConfig {
            mem_speed_mts: 3200,
            ..BootConfig::default()
        };
        let mut scom = FakeScom::new();

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        assert_eq!(
            mem_pll_initf(&mut ctx),
            Err(IstepError::UnsupportedMemorySpeed { mts: 3200 })
        );
        assert!(scom.log().is_empty());
    }

    #[test]
    fn busy_mailbox() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        scom.set(Chip(0), PSU_SBE_DOORBELL_REG, ppc_bit(0));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        assert_eq!(mem_pll_initf(&mut ctx), Err(IstepError::SbeMailboxBusy));
        assert!(scom.writes().is_empty());
    }

    #[test]
    fn unlocked_pll() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        scom.set(Chip(0), mc(PLL_LOCK_REG, ChipletId::MC01), ppc_bit(0));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        assert_eq!(
            mem_pll_setup(&mut ctx),
            Err(IstepError::PllNotLocked { chip: 0, mcs: 1 })
        );
        assert_eq!(clock.now_us(), 2 * PLL_LOCK_DELAY_MS * 1000);
    }

    #[test]
    fn pll_setup_sequence() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        let mc01 = ChipletId::MC01;
        for mcs in MCS_IDS {
            scom.set(Chip(0), mc(PLL_LOCK_REG, mcs), ppc_bit(0));
        }
        scom.set(Chip(0), mc(SLAVE_CONFIG_REG, mc01), ppc_bit(12) | 1);
        scom.set(Chip(0), mc(OPCG_ALIGN, mc01), 0x5000_0000_0000_0020);

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        mem_pll_setup(&mut ctx).unwrap();

        assert_eq!(
            scom.writes_to(Chip(0), mc(NET_CTRL1_WAND, mc01)),
            [!ppc_bit(2), !ppc_bit(1)]
        );
        assert_eq!(
            scom.writes_to(Chip(0), mc(NET_CTRL0_WAND, mc01)),
            [!ppc_bit(3), !ppc_bit(4), !ppc_bit(5)]
        );
        assert_eq!(
            scom.get(Chip(0), mc(OPCG_ALIGN, mc01)),
            0x5000_0000_0000_3020
        );
        assert_eq!(scom.get(Chip(0), mc(ERROR_REG, mc01)), !0);
        assert_eq!(scom.get(Chip(0), mc(SLAVE_CONFIG_REG, mc01)), 1);
    }
}
