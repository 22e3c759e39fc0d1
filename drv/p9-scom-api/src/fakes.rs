// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use crate::{Chip, Scom, ScomError};

/// One access seen by a [`FakeScom`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read { chip: Chip, addr: u64, value: u64 },
    Write { chip: Chip, addr: u64, data: u64 },
}

/// Plain register file: reads return whatever was last written or preset
/// (0 for untouched registers), and every access is logged in order.
#[derive(Debug, Default)]
pub struct FakeScom {
    regs: BTreeMap<(Chip, u64), u64>,
    log: Vec<Access>,
    pub switched_to_xscom: bool,
}

impl FakeScom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presets a register without logging an access.
    pub fn set(&mut self, chip: Chip, addr: u64, value: u64) {
        self.regs.insert((chip, addr), value);
    }

    /// Peeks at a register without logging an access.
    pub fn get(&self, chip: Chip, addr: u64) -> u64 {
        self.regs.get(&(chip, addr)).copied().unwrap_or(0)
    }

    pub fn log(&self) -> &[Access] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// All writes, in issue order.
    pub fn writes(&self) -> Vec<(Chip, u64, u64)> {
        self.log
            .iter()
            .filter_map(|a| match *a {
                Access::Write { chip, addr, data } => Some((chip, addr, data)),
                Access::Read { .. } => None,
            })
            .collect()
    }

    /// Values written to `addr` on `chip`, in issue order.
    pub fn writes_to(&self, chip: Chip, addr: u64) -> Vec<u64> {
        self.writes()
            .into_iter()
            .filter(|&(c, a, _)| c == chip && a == addr)
            .map(|(_, _, d)| d)
            .collect()
    }

    pub fn reads_of(&self, chip: Chip, addr: u64) -> usize {
        self.log
            .iter()
            .filter(|a| {
                matches!(a, Access::Read { chip: c, addr: r, .. }
                    if *c == chip && *r == addr)
            })
            .count()
    }
}

impl Scom for FakeScom {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        let value = self.get(chip, addr);
        self.log.push(Access::Read { chip, addr, value });
        Ok(value)
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        self.log.push(Access::Write { chip, addr, data });
        self.regs.insert((chip, addr), data);
        Ok(())
    }

    fn switch_secondary_to_xscom(&mut self) {
        self.switched_to_xscom = true;
    }
}
