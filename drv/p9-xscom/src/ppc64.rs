// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::arch::asm;

use drv_p9_scom_api::Chip;

use crate::{Hmer, XscomBus, MMIO_GROUP0_CHIP0_SCOM_BASE_ADDR, MMIO_GROUP_SIZE};

const SPR_HMER: u32 = 0x150;

/// The XSCOM window of the running system, accessed with real-mode
/// cache-inhibited loads and stores.
///
/// Must only be used in hypervisor real mode, which is where the boot
/// firmware runs.
#[derive(Copy, Clone, Debug, Default)]
pub struct Ppc64XscomBus;

fn window(chip: Chip) -> u64 {
    MMIO_GROUP0_CHIP0_SCOM_BASE_ADDR + u64::from(chip.0) * MMIO_GROUP_SIZE
}

impl XscomBus for Ppc64XscomBus {
    fn load(&mut self, chip: Chip, addr: u64) -> u64 {
        let val: u64;
        unsafe {
            asm!(
                "ldcix {0}, {1}, {2}",
                out(reg) val,
                in(reg_nonzero) window(chip),
                in(reg) addr << 3,
                options(nostack),
            );
        }
        val
    }

    fn store(&mut self, chip: Chip, addr: u64, data: u64) {
        unsafe {
            asm!(
                "stdcix {0}, {1}, {2}",
                in(reg) data,
                in(reg_nonzero) window(chip),
                in(reg) addr << 3,
                options(nostack),
            );
        }
    }

    fn read_hmer(&mut self) -> Hmer {
        let val: u64;
        unsafe {
            asm!("mfspr {0}, {spr}", out(reg) val, spr = const SPR_HMER,
                options(nomem, nostack));
        }
        Hmer(val)
    }

    fn clear_hmer(&mut self) {
        // HMER writes AND into the register.
        unsafe {
            asm!("mtspr {spr}, {0}", in(reg) 0u64, spr = const SPR_HMER,
                options(nostack));
        }
    }

    fn eieio(&mut self) {
        unsafe {
            asm!("eieio", options(nostack));
        }
    }
}
