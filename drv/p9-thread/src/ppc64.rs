// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::arch::asm;

use crate::SmtControl;

/// System reset interrupt vector.
const SRESET_VECTOR: usize = 0x100;

const SPR_PSSCR: u16 = 855;
/// Stop level 15 with state loss allowed, requested and maximum.
const PSSCR_STOP15: u64 = 0x0000_0000_003F_00FF;

/// The second thread of the boot core.
pub struct Power9Smt {
    handler: &'static [u8],
}

impl Power9Smt {
    /// `handler` is the position-independent code to copy to the system
    /// reset vector. It must fit in the 256 bytes below the next vector.
    pub const fn new(handler: &'static [u8]) -> Self {
        Self { handler }
    }
}

impl SmtControl for Power9Smt {
    fn install_reset_vector(&mut self) {
        let len = self.handler.len().min(0x100);
        // SAFETY: the low vectors are identity mapped and owned by boot
        // firmware; nothing else runs out of them this early.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.handler.as_ptr(),
                SRESET_VECTOR as *mut u8,
                len,
            );
            asm!(
                "sync",
                "icbi 0, {0}",
                "sync",
                "isync",
                in(reg) SRESET_VECTOR,
                options(nostack),
            );
        }
    }

    fn stop_with_state_loss(&mut self) -> ! {
        // SAFETY: stop with state loss never returns; the thread restarts at
        // the system reset vector.
        unsafe {
            asm!(
                "mtspr {spr}, {psscr}",
                "isync",
                "stop",
                spr = const SPR_PSSCR,
                psscr = in(reg) PSSCR_STOP15,
                options(noreturn, nostack),
            );
        }
    }
}
