// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_p9_scom_api::{chiplet_of, ring_of, ChipletId, Scom};
use p9_timebase::Clock;
use ppc_bits::{ppc_bit, ppc_insert};

use crate::{report_istep, BootCtx, IstepError};

const XB_IOX_0_RING_ID: u8 = 0x3;
const XB_PBIOX_0_RING_ID: u8 = 0x6;
/// XBus links per chip.
const XBUS_COUNT: u8 = 3;
/// The one link that is wired up.
const XBUS_LINK: u8 = 1;

const XB_NET_CTRL0: u64 = 0x060F_0040;
const XB_NET_CTRL0_WOR: u64 = 0x060F_0042;

const NET_CTRL0_CHIPLET_ENABLE: u64 = ppc_bit(0);
/// RI_N, DI1_N and DI2_N: enable receivers and both driver inhibits.
const NET_CTRL0_RIDI: u64 = ppc_bit(19) | ppc_bit(20) | ppc_bit(21);

/// Points an XBus chiplet address at the link in use. Per-link register
/// groups are told apart by the ring field; other addresses are returned
/// unchanged.
pub fn xbus_addr(addr: u64) -> u64 {
    if chiplet_of(addr) != ChipletId::XB {
        return addr;
    }

    let ring = ring_of(addr);
    let mut addr = addr;
    for base in [XB_IOX_0_RING_ID, XB_PBIOX_0_RING_ID] {
        if (base..base + XBUS_COUNT).contains(&ring) {
            ppc_insert(&mut addr, u64::from(base + XBUS_LINK), 50, 4);
            break;
        }
    }
    addr
}

/// 8.11 xbus_enable_ridi: enable receivers and drivers of the XBus chiplet
/// on every chip where the chiplet is enabled.
pub fn xbus_enable_ridi<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
) -> Result<(), IstepError> {
    report_istep(ctx, 8, 11);

    for chip in ctx.chips().iter() {
        let net_ctrl0 = ctx.scom.read(chip, xbus_addr(XB_NET_CTRL0))?;
        if net_ctrl0 & NET_CTRL0_CHIPLET_ENABLE != 0 {
            ctx.scom
                .write(chip, xbus_addr(XB_NET_CTRL0_WOR), NET_CTRL0_RIDI)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootConfig;
    use drv_p9_scom_api::{Chip, FakeScom};
    use p9_timebase::FakeClock;

    #[test]
    fn link_addressing() {
        // IOX_0 ring moves to IOX_1, PBIOX_2 to PBIOX_1.
        assert_eq!(xbus_addr(0x0600_0C00), 0x0600_1000);
        assert_eq!(xbus_addr(0x0600_2000), 0x0600_1C00);
        // Ring 0 of XB and anything outside XB are left alone.
        assert_eq!(xbus_addr(XB_NET_CTRL0), XB_NET_CTRL0);
        assert_eq!(xbus_addr(0x0700_0C00), 0x0700_0C00);
    }

    #[test]
    fn only_enabled_chiplets() {
        let clock = FakeClock::new();
        let config = BootConfig {
            chips: 0x03,
            ..BootConfig::default()
        };
        let mut scom = FakeScom::new();
        scom.set(Chip(1), XB_NET_CTRL0, NET_CTRL0_CHIPLET_ENABLE);

        let mut ctx = BootCtx::new(&mut scom, &clock, &config);
        xbus_enable_ridi(&mut ctx).unwrap();

        assert_eq!(
            scom.writes(),
            [(Chip(1), XB_NET_CTRL0_WOR, 0x0000_1C00_0000_0000)]
        );
        assert_eq!(scom.reads_of(Chip(0), XB_NET_CTRL0), 1);
    }
}
