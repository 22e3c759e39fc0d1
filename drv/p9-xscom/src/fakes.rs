// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, VecDeque};

use drv_p9_scom_api::Chip;
use ppc_bits::ppc_place;

use crate::{
    Hmer, XscomBus, XSCOM_ADDR_IND_ADDR, XSCOM_ADDR_IND_DATA,
    XSCOM_DATA_IND_COMPLETE, XSCOM_DATA_IND_READ,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Load(Chip, u64),
    Store(Chip, u64, u64),
    ReadHmer,
    ClearHmer,
    Eieio,
}

/// Base register of an emulated indirect access port.
#[derive(Debug)]
struct IndirectPort {
    /// Polls after a request until COMPLETE shows up; `None` for never.
    complete_after: Option<u32>,
    err: u8,
    polls: u32,
    request: u64,
    regs: BTreeMap<u64, u64>,
}

/// An XSCOM window backed by a register file, with scripted HMER results
/// and emulated indirect ports.
#[derive(Debug, Default)]
pub struct FakeXscomBus {
    regs: BTreeMap<(Chip, u64), u64>,
    ports: BTreeMap<(Chip, u64), IndirectPort>,
    hmer_script: VecDeque<Hmer>,
    always_occupied: bool,
    hmer: Hmer,
    events: Vec<BusEvent>,
}

impl FakeXscomBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, chip: Chip, addr: u64, value: u64) {
        self.regs.insert((chip, addr), value);
    }

    pub fn get(&self, chip: Chip, addr: u64) -> u64 {
        self.regs.get(&(chip, addr)).copied().unwrap_or(0)
    }

    /// The HMER value observed after the next not-yet-scripted access.
    /// Accesses past the end of the script complete cleanly.
    pub fn queue_hmer(&mut self, hmer: Hmer) {
        self.hmer_script.push_back(hmer);
    }

    pub fn always_occupied(&mut self, on: bool) {
        self.always_occupied = on;
    }

    pub fn add_indirect_port(
        &mut self,
        chip: Chip,
        base: u64,
        complete_after: Option<u32>,
        err: u8,
    ) {
        self.ports.insert(
            (chip, base),
            IndirectPort {
                complete_after,
                err,
                polls: 0,
                request: 0,
                regs: BTreeMap::new(),
            },
        );
    }

    pub fn set_indirect_value(
        &mut self,
        chip: Chip,
        base: u64,
        addr: u64,
        value: u64,
    ) {
        if let Some(port) = self.ports.get_mut(&(chip, base)) {
            port.regs.insert(addr & XSCOM_ADDR_IND_ADDR, value);
        }
    }

    pub fn indirect_value(&self, chip: Chip, base: u64, addr: u64) -> u64 {
        self.ports
            .get(&(chip, base))
            .and_then(|p| p.regs.get(&(addr & XSCOM_ADDR_IND_ADDR)))
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    pub fn stores_to(&self, chip: Chip, addr: u64) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                BusEvent::Store(c, a, d) if c == chip && a == addr => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn loads_of(&self, chip: Chip, addr: u64) -> usize {
        self.events
            .iter()
            .filter(|e| **e == BusEvent::Load(chip, addr))
            .count()
    }

    fn settle_hmer(&mut self) {
        self.hmer = if self.always_occupied {
            Hmer(Hmer::XSCOM_OCCUPIED)
        } else {
            self.hmer_script
                .pop_front()
                .unwrap_or(Hmer(Hmer::XSCOM_DONE))
        };
    }

    fn hmer_ok(&self) -> bool {
        self.hmer.xscom_status() == 0
    }
}

impl XscomBus for FakeXscomBus {
    fn load(&mut self, chip: Chip, addr: u64) -> u64 {
        self.events.push(BusEvent::Load(chip, addr));
        self.settle_hmer();
        if !self.hmer_ok() {
            return u64::MAX;
        }

        if let Some(port) = self.ports.get_mut(&(chip, addr)) {
            port.polls += 1;
            let done = port.complete_after.is_some_and(|n| port.polls >= n);
            if !done {
                return 0;
            }
            let mut status =
                XSCOM_DATA_IND_COMPLETE | ppc_place(port.err.into(), 33, 3);
            if port.request & XSCOM_DATA_IND_READ != 0 {
                let key = port.request & XSCOM_ADDR_IND_ADDR;
                status |= port.regs.get(&key).copied().unwrap_or(0)
                    & XSCOM_ADDR_IND_DATA;
            }
            return status;
        }
        self.get(chip, addr)
    }

    fn store(&mut self, chip: Chip, addr: u64, data: u64) {
        self.events.push(BusEvent::Store(chip, addr, data));
        self.settle_hmer();
        if !self.hmer_ok() {
            return;
        }

        if let Some(port) = self.ports.get_mut(&(chip, addr)) {
            port.polls = 0;
            port.request = data;
            if data & XSCOM_DATA_IND_READ == 0 {
                port.regs.insert(
                    data & XSCOM_ADDR_IND_ADDR,
                    data & XSCOM_ADDR_IND_DATA,
                );
            }
            return;
        }
        self.regs.insert((chip, addr), data);
    }

    fn read_hmer(&mut self) -> Hmer {
        self.events.push(BusEvent::ReadHmer);
        self.hmer
    }

    fn clear_hmer(&mut self) {
        self.events.push(BusEvent::ClearHmer);
        self.hmer = Hmer::default();
    }

    fn eieio(&mut self) {
        self.events.push(BusEvent::Eieio);
    }
}
