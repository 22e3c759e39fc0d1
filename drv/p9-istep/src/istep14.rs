// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_p9_scom_api::{mca_addr, Chip, ChipletId, Scom, MCA_PER_MCS, MCS_IDS};
use p9_timebase::Clock;
use ppc_bits::{ppc_bit, ppc_bitmask};

use crate::{report_istep, BootCtx, IstepError};

/// MBA command arbitration, per MCA.
const MCA_MBA_FARB3Q: u64 = 0x0701_0916;
/// N-commands-per-slot, N-commands-per-port and M-window fields.
const FARB3Q_THROTTLE_FIELDS: u64 = ppc_bitmask(0, 45);
const FARB3Q_SAFE_THROTTLE: u64 = ppc_bit(10) | ppc_bit(25) | ppc_bit(37);

/// MCS mode register, on the nest chiplet; the second MCS is 0x80 up.
const MCS_MCMODE0: u64 = 0x0501_0811;
const MCMODE0_ENABLE_EMER_THROTTLE: u32 = 21;
const MCMODE0_DISABLE_MC_SYNC: u32 = 27;
const MCMODE0_DISABLE_MC_PAIR_SYNC: u32 = 28;

const MCS_MCSYNC: u64 = 0x0501_0815;
const MCSYNC_MBA_REFRESH_SYNC: u32 = 8;
const MCSYNC_SUPER_SYNC: u32 = 14;
const MCSYNC_SYNC_GO_CH0: u32 = 16;

fn mcmode0(index: usize) -> u64 {
    MCS_MCMODE0 + 0x80 * index as u64
}

/// 14.2 mss_thermal_init and throttle sync: start every port on a safe
/// throttle, then sync the throttles of all memory controllers.
pub fn throttle_sync<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 14, 2);

    for chip in ctx.chips().iter() {
        thermal_init(ctx.scom, chip)?;
        sync_throttles(ctx.scom, chip)?;
    }
    Ok(())
}

fn thermal_init(scom: &mut impl Scom, chip: Chip) -> Result<(), IstepError> {
    for (i, mcs) in MCS_IDS.into_iter().enumerate() {
        for mca in 0..MCA_PER_MCS {
            scom.and_or_for_chiplet(
                chip,
                mcs,
                mca_addr(MCA_MBA_FARB3Q, mca),
                !FARB3Q_THROTTLE_FIELDS,
                FARB3Q_SAFE_THROTTLE,
            )?;
        }

        let Some(nest) = mcs.mcs_to_nest() else {
            continue;
        };
        scom.or_for_chiplet(
            chip,
            nest,
            mcmode0(i),
            ppc_bit(MCMODE0_ENABLE_EMER_THROTTLE),
        )?;
    }
    Ok(())
}

fn sync_throttles(scom: &mut impl Scom, chip: Chip) -> Result<(), IstepError> {
    let sync_disables =
        ppc_bit(MCMODE0_DISABLE_MC_SYNC) | ppc_bit(MCMODE0_DISABLE_MC_PAIR_SYNC);
    for (i, mcs) in MCS_IDS.into_iter().enumerate() {
        let Some(nest) = mcs.mcs_to_nest() else {
            continue;
        };
        scom.and_or_for_chiplet(
            chip,
            nest,
            mcmode0(i),
            !sync_disables,
            sync_disables,
        )?;
    }

    // The sync itself is driven from the MCS behind N3.
    let n3 = ChipletId::N3;
    scom.and_for_chiplet(chip, n3, MCS_MCSYNC, !ppc_bit(MCSYNC_SYNC_GO_CH0))?;
    scom.and_or_for_chiplet(
        chip,
        n3,
        MCS_MCSYNC,
        !ppc_bit(MCSYNC_SUPER_SYNC),
        ppc_bitmask(0, 16),
    )?;
    scom.and_for_chiplet(
        chip,
        n3,
        MCS_MCSYNC,
        !ppc_bit(MCSYNC_MBA_REFRESH_SYNC),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootConfig;
    use drv_p9_scom_api::{chiplet_addr, FakeScom};
    use p9_timebase::FakeClock;

    #[test]
    fn throttle_programming() {
        let clock = FakeClock::new();
        let config = BootConfig::default();
        let mut scom = FakeScom::new();
        let mc23_port1 = chiplet_addr(0x0701_0956, ChipletId::MC23);
        scom.set(Chip(0), mc23_port1, !0);

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        throttle_sync(&mut ctx).unwrap();

        // Every port of every MCS got the safe throttle.
        for mcs in MCS_IDS {
            for port in [0x0701_0916, 0x0701_0956] {
                let addr = chiplet_addr(port, mcs);
                assert_eq!(
                    scom.writes_to(Chip(0), addr).len(),
                    1,
                    "{addr:#x}"
                );
            }
        }
        assert_eq!(scom.get(Chip(0), mc23_port1), 0x0020_0040_0403_FFFF);

        // MC01 hangs off N3, MC23 off N1.
        let mc01_mode = 0x0501_0811;
        let mc23_mode = 0x0301_0891;
        let mode = ppc_bit(21) | ppc_bit(27) | ppc_bit(28);
        assert_eq!(scom.get(Chip(0), mc01_mode), mode);
        assert_eq!(scom.get(Chip(0), mc23_mode), mode);

        assert_eq!(
            scom.writes_to(Chip(0), 0x0501_0815),
            [0, ppc_bitmask(0, 16), ppc_bitmask(0, 16) & !ppc_bit(8)]
        );
    }
}
