// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SCOM access routed per chip
//!
//! The primary chip is always reached through its own XSCOM engine. A
//! secondary chip starts out reachable only through the SBE FIFO of that
//! chip; once the SMP fabric is up (istep 10.1) its XSCOM window becomes
//! usable and [`Scom::switch_secondary_to_xscom`] moves all further
//! secondary traffic there. The switch is one-way.

#![cfg_attr(target_os = "none", no_std)]

use drv_p9_scom_api::{Chip, Scom, ScomError};
use ringbuf::*;

mod traced;
pub use traced::Traced;

/// Transport used for chips other than the primary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SecondaryPath {
    SbeIo,
    Xscom,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Switched,
}

ringbuf!(Trace, 4, Trace::None);

/// Routes each access to `xscom` or `sbe` depending on the target chip.
pub struct Dispatcher<X: Scom, Q: Scom> {
    xscom: X,
    sbe: Q,
    secondary: SecondaryPath,
}

impl<X: Scom, Q: Scom> Dispatcher<X, Q> {
    pub fn new(xscom: X, sbe: Q) -> Self {
        Self {
            xscom,
            sbe,
            secondary: SecondaryPath::SbeIo,
        }
    }

    pub fn secondary_path(&self) -> SecondaryPath {
        self.secondary
    }

    pub fn xscom(&mut self) -> &mut X {
        &mut self.xscom
    }

    pub fn sbe(&mut self) -> &mut Q {
        &mut self.sbe
    }

    fn route(&mut self, chip: Chip) -> &mut dyn Scom {
        if chip.is_primary() {
            return &mut self.xscom;
        }
        match self.secondary {
            SecondaryPath::SbeIo => &mut self.sbe,
            SecondaryPath::Xscom => &mut self.xscom,
        }
    }
}

impl<X: Scom, Q: Scom> Scom for Dispatcher<X, Q> {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        self.route(chip).read(chip, addr)
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        self.route(chip).write(chip, addr, data)
    }

    fn switch_secondary_to_xscom(&mut self) {
        if self.secondary != SecondaryPath::Xscom {
            ringbuf_entry!(Trace::Switched);
            self.secondary = SecondaryPath::Xscom;
        }
    }
}
