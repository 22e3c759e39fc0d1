// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, VecDeque};

use drv_p9_scom_api::{Chip, ScomError};

use crate::fifo::*;
use crate::fsi::Fsi;

/// Ways a [`FakeSbe`] can misbehave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SbeFault {
    /// The upstream FIFO never has room.
    UpstreamFull,
    /// Requests are accepted but never answered.
    NoResponse,
    /// Responses carry a failing status.
    Status { primary: u16, secondary: u16 },
    /// Responses lack the second status header word.
    Truncated,
    /// Responses carry this status header offset.
    Offset(u32),
    /// Responses never end.
    Flood,
}

/// The FSI side of an SBE that serves SCOM requests from a register file.
#[derive(Debug, Default)]
pub struct FakeSbe {
    fault: Option<SbeFault>,
    regs: BTreeMap<(Chip, u64), u64>,
    upstream: Vec<u32>,
    downstream: VecDeque<u32>,
    eot_pending: bool,
    requests: Vec<Vec<u32>>,
    eot_acks: usize,
}

impl FakeSbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(fault: SbeFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    pub fn set(&mut self, chip: Chip, addr: u64, value: u64) {
        self.regs.insert((chip, addr), value);
    }

    pub fn get(&self, chip: Chip, addr: u64) -> u64 {
        self.regs.get(&(chip, addr)).copied().unwrap_or(0)
    }

    /// Every request received, as the words pushed upstream.
    pub fn requests(&self) -> &[Vec<u32>] {
        &self.requests
    }

    pub fn eot_acks(&self) -> usize {
        self.eot_acks
    }

    fn respond(&mut self, chip: Chip) {
        let request = std::mem::take(&mut self.upstream);
        self.requests.push(request.clone());

        if self.fault == Some(SbeFault::NoResponse) {
            return;
        }
        if self.fault == Some(SbeFault::Flood) {
            self.downstream
                .extend(std::iter::repeat(0).take(MSG_BUFFER_SIZE + 1));
            self.eot_pending = true;
            return;
        }

        let word = |i: usize| request.get(i).copied().unwrap_or(0);
        let cmd = (word(1) & 0xFF) as u8;
        let addr = (u64::from(word(2)) << 32) | u64::from(word(3));
        match cmd {
            SBE_FIFO_CMD_GET_SCOM => {
                let data = self.get(chip, addr);
                self.downstream.push_back((data >> 32) as u32);
                self.downstream.push_back(data as u32);
            }
            SBE_FIFO_CMD_PUT_SCOM => {
                let data = (u64::from(word(4)) << 32) | u64::from(word(5));
                self.set(chip, addr, data);
            }
            _ => {}
        }

        let (primary, secondary) = match self.fault {
            Some(SbeFault::Status { primary, secondary }) => (primary, secondary),
            _ => (0, 0),
        };
        let hdr0 = (u32::from(FIFO_STATUS_MAGIC) << 16)
            | (u32::from(SBE_FIFO_CLASS_SCOM_ACCESS) << 8)
            | u32::from(cmd);
        let hdr1 = (u32::from(primary) << 16) | u32::from(secondary);
        let offset = match self.fault {
            Some(SbeFault::Offset(o)) => o,
            _ => 3,
        };

        self.downstream.push_back(hdr0);
        if self.fault != Some(SbeFault::Truncated) {
            self.downstream.push_back(hdr1);
        }
        self.downstream.push_back(offset);
        // Trailing word popped along with the end of transfer.
        self.downstream.push_back(0);
        self.eot_pending = true;
    }
}

impl Fsi for FakeSbe {
    fn read_fsi(&mut self, _chip: Chip, addr: u32) -> Result<u32, ScomError> {
        Ok(match addr {
            SBE_FIFO_UPFIFO_STATUS => {
                if self.fault == Some(SbeFault::UpstreamFull) {
                    UPFIFO_STATUS_FIFO_FULL
                } else {
                    0
                }
            }
            SBE_FIFO_DNFIFO_STATUS => {
                if !self.downstream.is_empty() {
                    0
                } else if self.eot_pending {
                    DNFIFO_STATUS_DEQUEUED_EOT_FLAG
                } else {
                    DNFIFO_STATUS_FIFO_EMPTY
                }
            }
            SBE_FIFO_DNFIFO_DATA_OUT => self.downstream.pop_front().unwrap_or(0),
            _ => 0,
        })
    }

    fn write_fsi(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError> {
        match addr {
            SBE_FIFO_UPFIFO_DATA_IN => self.upstream.push(data),
            SBE_FIFO_UPFIFO_SIG_EOT => self.respond(chip),
            SBE_FIFO_DNFIFO_ACK_EOT => {
                self.eot_acks += 1;
                self.eot_pending = false;
                self.downstream.clear();
            }
            _ => {}
        }
        Ok(())
    }
}
