// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_p9_scom_api::{Chip, Scom, ScomError};
use p9_timebase::{mdelay, wait_ms, Clock};
use ppc_bits::ppc_bit;
use ringbuf::*;

use crate::{report_istep, xbus_addr, BootCtx, IstepError};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    LinkTrained { chip: u8, ms: u64 },
    LinkNotTrained { chip: u8, fir: u64 },
    RasFirUnmasked { chip: u8 },
}

ringbuf!(Trace, 8, Trace::None);

const XBUS_LL1_IOEL_FIR_REG: u64 = 0x0601_1C00;
const DL_FIR_LINKS_TRAINED: u64 = ppc_bit(0) | ppc_bit(1);

const XB_CPLT_CONF1_OR: u64 = 0x0600_0019;
const CPLT_CONF1_IOVALID_6D: u32 = 6;

const PB_CENT_FIR_REG: u64 = 0x0501_1C00;
/// Set by the SBE once it has taken care of the link RAS FIR itself.
const PB_CENT_FIR_MASK_SPARE_13: u64 = ppc_bit(13);
const PB_CENT_EXTFIR_ACTION0: u64 = 0x0501_1C34;
const PB_CENT_EXTFIR_ACTION1: u64 = 0x0501_1C35;
const PB_CENT_EXTFIR_MASK_AND: u64 = 0x0501_1C32;

/// Lane lock settle time; stands in for the lane lock polls of DD1.0.
pub const LANE_LOCK_DELAY_MS: u64 = 100;
/// Time the data link layer gets to report both halves trained.
pub const XBUS_TRAINING_TIMEOUT_MS: u64 = 100;

/// 9.7 proc_fab_iovalid: once the XBus data link is trained, mark the link
/// valid so the fabric starts using it. Only meaningful with more than one
/// chip present.
pub fn fabric_iovalid<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 9, 7);

    let chips = ctx.chips();
    if !chips.has_secondary() {
        return Ok(());
    }

    mdelay(ctx.clock, LANE_LOCK_DELAY_MS);

    for chip in chips.iter() {
        wait_link_trained(ctx, chip)?;
        set_iovalid(ctx.scom, chip)?;
    }
    Ok(())
}

fn wait_link_trained<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    chip: Chip,
) -> Result<(), IstepError> {
    let scom = &mut *ctx.scom;
    let fir = xbus_addr(XBUS_LL1_IOEL_FIR_REG);
    let mut last = 0;
    let trained = wait_ms(ctx.clock, XBUS_TRAINING_TIMEOUT_MS, || {
        last = scom.read(chip, fir)?;
        Ok::<_, ScomError>(last & DL_FIR_LINKS_TRAINED == DL_FIR_LINKS_TRAINED)
    })?;

    match trained {
        Some(ms) => {
            ringbuf_entry!(Trace::LinkTrained { chip: chip.0, ms });
            Ok(())
        }
        None => {
            ringbuf_entry!(Trace::LinkNotTrained {
                chip: chip.0,
                fir: last
            });
            Err(IstepError::XbusTrainingTimeout { chip: chip.0 })
        }
    }
}

fn set_iovalid(scom: &mut impl Scom, chip: Chip) -> Result<(), ScomError> {
    let iovalid = ppc_bit(CPLT_CONF1_IOVALID_6D);

    if scom.read(chip, PB_CENT_FIR_REG)? & PB_CENT_FIR_MASK_SPARE_13 == 0 {
        ringbuf_entry!(Trace::RasFirUnmasked { chip: chip.0 });
        scom.and(chip, PB_CENT_EXTFIR_ACTION0, !iovalid)?;
        scom.and(chip, PB_CENT_EXTFIR_ACTION1, !iovalid)?;
        scom.write(chip, PB_CENT_EXTFIR_MASK_AND, !iovalid)?;
    }

    // Link 1 owns the two bits after IOVALID_6D.
    scom.write(
        chip,
        xbus_addr(XB_CPLT_CONF1_OR),
        iovalid | ppc_bit(CPLT_CONF1_IOVALID_6D + 1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootConfig;
    use drv_p9_scom_api::FakeScom;
    use p9_timebase::FakeClock;

    fn two_chips() -> BootConfig {
        BootConfig {
            chips: 0x03,
            ..BootConfig::default()
        }
    }

    #[test]
    fn single_chip_has_no_link() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        fabric_iovalid(&mut ctx).unwrap();
        assert_eq!(ctx.last_istep(), Some(crate::IstepId::new(9, 7)));
        drop(ctx);

        assert!(scom.log().is_empty());
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn trained_link_goes_valid() {
        let clock = FakeClock::new();
        let config = two_chips();
        let mut scom = FakeScom::new();
        for chip in [Chip(0), Chip(1)] {
            scom.set(chip, XBUS_LL1_IOEL_FIR_REG, DL_FIR_LINKS_TRAINED);
            scom.set(chip, PB_CENT_EXTFIR_ACTION0, !0);
        }
        scom.set(Chip(1), PB_CENT_FIR_REG, PB_CENT_FIR_MASK_SPARE_13);

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        fabric_iovalid(&mut ctx).unwrap();

        assert_eq!(clock.now_us(), LANE_LOCK_DELAY_MS * 1000);
        // The FIR sits in the link 1 ring already.
        assert_eq!(xbus_addr(XBUS_LL1_IOEL_FIR_REG), XBUS_LL1_IOEL_FIR_REG);
        for chip in [Chip(0), Chip(1)] {
            assert_eq!(
                scom.writes_to(chip, XB_CPLT_CONF1_OR),
                [0x0300_0000_0000_0000]
            );
        }

        // Chip 0 still had its RAS FIR to unmask, chip 1 didn't.
        assert_eq!(
            scom.get(Chip(0), PB_CENT_EXTFIR_ACTION0),
            !0x0200_0000_0000_0000
        );
        assert_eq!(
            scom.writes_to(Chip(0), PB_CENT_EXTFIR_MASK_AND),
            [!0x0200_0000_0000_0000]
        );
        assert!(scom.writes_to(Chip(1), PB_CENT_EXTFIR_MASK_AND).is_empty());
        assert_eq!(scom.get(Chip(1), PB_CENT_EXTFIR_ACTION0), !0);
    }

    #[test]
    fn half_trained_link_times_out() {
        let clock = FakeClock::new();
        let config = two_chips();
        let mut scom = FakeScom::new();
        scom.set(Chip(0), XBUS_LL1_IOEL_FIR_REG, DL_FIR_LINKS_TRAINED);
        scom.set(Chip(1), XBUS_LL1_IOEL_FIR_REG, ppc_bit(0));

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        assert_eq!(
            fabric_iovalid(&mut ctx),
            Err(IstepError::XbusTrainingTimeout { chip: 1 })
        );

        assert_eq!(
            clock.now_us(),
            (LANE_LOCK_DELAY_MS + XBUS_TRAINING_TIMEOUT_MS) * 1000
        );
        // Polled once per millisecond, deadline included.
        assert_eq!(
            scom.reads_of(Chip(1), XBUS_LL1_IOEL_FIR_REG),
            XBUS_TRAINING_TIMEOUT_MS as usize + 1
        );
        assert!(scom.writes_to(Chip(1), XB_CPLT_CONF1_OR).is_empty());
        assert_eq!(scom.writes_to(Chip(0), XB_CPLT_CONF1_OR).len(), 1);
    }
}
