// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::arch::asm;

use crate::Clock;

/// The POWER9 timebase runs at a fixed 512 MHz.
const TB_TICKS_PER_US: u64 = 512;

/// Timebase register (SPR 268, user read).
#[derive(Copy, Clone, Debug, Default)]
pub struct Timebase;

impl Timebase {
    fn ticks() -> u64 {
        let tb: u64;
        unsafe {
            asm!("mfspr {0}, 268", out(reg) tb, options(nomem, nostack));
        }
        tb
    }
}

impl Clock for Timebase {
    fn now_us(&self) -> u64 {
        Self::ticks() / TB_TICKS_PER_US
    }

    fn delay_us(&self, us: u64) {
        let end = Self::ticks()
            .saturating_add(us.saturating_mul(TB_TICKS_PER_US));
        while Self::ticks() < end {
            core::hint::spin_loop();
        }
    }
}
