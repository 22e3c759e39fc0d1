// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FSI access through the FSI2OPB bridge of the primary chip.
//!
//! The primary chip is FSI master for itself and, through MFSI port 1, for
//! the secondary chip. Every FSI access is a command written to the OPB
//! bridge over SCOM followed by polling the bridge status.

use drv_p9_scom_api::{Chip, ChipMask, Scom, ScomError};
use p9_timebase::Clock;
use ppc_bits::{ppc_bit, ppc_place};
use ringbuf::*;

/// A 32-bit FSI address space per chip.
pub trait Fsi {
    fn read_fsi(&mut self, chip: Chip, addr: u32) -> Result<u32, ScomError>;

    fn write_fsi(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError>;

    fn read_cfam(&mut self, chip: Chip, addr: u32) -> Result<u32, ScomError> {
        self.read_fsi(chip, cfam_addr_to_fsi(addr))
    }

    fn write_cfam(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError> {
        self.write_fsi(chip, cfam_addr_to_fsi(addr), data)
    }
}

impl<F: Fsi + ?Sized> Fsi for &mut F {
    fn read_fsi(&mut self, chip: Chip, addr: u32) -> Result<u32, ScomError> {
        (**self).read_fsi(chip, addr)
    }

    fn write_fsi(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError> {
        (**self).write_fsi(chip, addr, data)
    }
}

/// CFAM addresses count words within 512-word engines; FSI addresses count
/// bytes.
pub const fn cfam_addr_to_fsi(cfam: u32) -> u32 {
    ((cfam & 0x1FF) * 4) | (cfam & 0xFE00)
}

const FSI2OPB_OFFSET_0: u64 = 0x0002_0000;
const OPB_REG_CMD: u64 = FSI2OPB_OFFSET_0 | 0x0000;
const OPB_REG_STAT: u64 = FSI2OPB_OFFSET_0 | 0x0001;
const OPB_REG_RES: u64 = FSI2OPB_OFFSET_0 | 0x0004;

/// Clears error state of the OPB bridge of `chip`.
pub fn reset_pib2opb(
    scom: &mut impl Scom,
    chip: Chip,
) -> Result<(), ScomError> {
    scom.write(chip, OPB_REG_RES, ppc_bit(0))?;
    scom.write(chip, OPB_REG_STAT, ppc_bit(0))
}

const MFSI_CONTROL_REG: u32 = 0x0000_3400;
const FSI_MLEVP0_018: u32 = 0x018;
/// FSI window of MFSI port 0; port `n` is at `(n + 1)` times this.
const MFSI_PORT_0: u32 = 0x0008_0000;

const OPB_STAT_ANYERR: u64 = 0x8000_0000_0000_0000;
const OPB_STAT_ERR_OPB: u64 = 0x7FEC_0000_0000_0000;
const OPB_STAT_ERRACK: u64 = 0x0010_0000_0000_0000;
const OPB_STAT_READ_VALID: u64 = 0x0002_0000_0000_0000;
const OPB_STAT_BUSY: u64 = 0x0001_0000_0000_0000;
const OPB_STAT_ERR_MFSI: u64 = 0x0000_00FC_0000_0000;
const OPB_STAT_NON_MFSI_ERR: u64 =
    OPB_STAT_ERR_OPB | OPB_STAT_ERRACK | OPB_STAT_ANYERR;

const OPB_CMD_WRITE_NOT_READ: u64 = ppc_bit(0);
const OPB_CMD_SIZE_4B: u64 = ppc_place(3, 1, 2);

const OPB_MAX_WAIT_LOOPS: u32 = 1000;
const OPB_TIMEOUT_STEP_US: u64 = 10;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    OpbError { chip: u8, status: u64 },
    OpbTimeout { chip: u8, status: u64 },
}

ringbuf!(Trace, 8, Trace::None);

/// FSI master built on SCOM access to the primary chip.
pub struct OpbFsi<S: Scom, C: Clock> {
    scom: S,
    clock: C,
}

impl<S: Scom, C: Clock> OpbFsi<S, C> {
    pub fn new(scom: S, clock: C) -> Self {
        Self { scom, clock }
    }

    pub fn scom(&mut self) -> &mut S {
        &mut self.scom
    }

    /// Clears error state of the OPB bridge.
    pub fn reset_pib2opb(&mut self) -> Result<(), ScomError> {
        reset_pib2opb(&mut self.scom, Chip::PRIMARY)
    }

    /// Chips that answer on FSI. The primary chip is running this code so
    /// it is always present; the secondary hangs off MFSI port 1.
    pub fn present_chips(&mut self) -> Result<ChipMask, ScomError> {
        let levels =
            self.read_fsi(Chip::PRIMARY, MFSI_CONTROL_REG | FSI_MLEVP0_018)?;
        let slaves = (levels >> 24) as u8;
        Ok(ChipMask(0x01 | ((slaves & 0x40) >> 5)))
    }

    /// Waits for the bridge to go idle, returning its final status.
    fn poll_opb(&mut self, chip: Chip) -> Result<u64, ScomError> {
        // MFSI errors only matter when going through the MFSI port.
        let err_mask = if chip.is_primary() {
            OPB_STAT_NON_MFSI_ERR
        } else {
            OPB_STAT_NON_MFSI_ERR | OPB_STAT_ERR_MFSI
        };

        let mut status = self.scom.read(Chip::PRIMARY, OPB_REG_STAT)?;
        let mut loops = 0;
        while status & OPB_STAT_BUSY != 0
            && status & err_mask == 0
            && loops < OPB_MAX_WAIT_LOOPS
        {
            self.clock.delay_us(OPB_TIMEOUT_STEP_US);
            status = self.scom.read(Chip::PRIMARY, OPB_REG_STAT)?;
            loops += 1;
        }

        if status & err_mask != 0 {
            ringbuf_entry!(Trace::OpbError {
                chip: chip.0,
                status
            });
            return Err(ScomError::FsiError {
                chip: chip.0,
                status,
            });
        }
        if loops == OPB_MAX_WAIT_LOOPS {
            ringbuf_entry!(Trace::OpbTimeout {
                chip: chip.0,
                status
            });
            return Err(ScomError::FsiTimeout {
                chip: chip.0,
                status,
            });
        }
        Ok(status)
    }

    fn op(
        &mut self,
        chip: Chip,
        mut addr: u32,
        data: u32,
        is_read: bool,
    ) -> Result<u32, ScomError> {
        if !chip.is_primary() {
            addr |= MFSI_PORT_0 * (u32::from(chip.0) + 1);
        }

        // Nothing else may be in flight.
        self.poll_opb(chip)?;

        let mut cmd = OPB_CMD_SIZE_4B
            | ppc_place(u64::from(addr), 3, 29)
            | u64::from(data);
        if !is_read {
            cmd |= OPB_CMD_WRITE_NOT_READ;
        }
        self.scom.write(Chip::PRIMARY, OPB_REG_CMD, cmd)?;

        let response = self.poll_opb(chip)?;
        if !is_read {
            return Ok(0);
        }
        if response & OPB_STAT_READ_VALID == 0 {
            return Err(ScomError::FsiReadInvalid { chip: chip.0 });
        }
        Ok(response as u32)
    }
}

impl<S: Scom, C: Clock> Fsi for OpbFsi<S, C> {
    fn read_fsi(&mut self, chip: Chip, addr: u32) -> Result<u32, ScomError> {
        self.op(chip, addr, 0, true)
    }

    fn write_fsi(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError> {
        self.op(chip, addr, data, false).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_p9_scom_api::FakeScom;
    use p9_timebase::FakeClock;

    #[test]
    fn cfam_translation() {
        assert_eq!(cfam_addr_to_fsi(0x2809), 0x2824);
        assert_eq!(cfam_addr_to_fsi(0x1006), 0x1018);
        assert_eq!(cfam_addr_to_fsi(0x0000), 0x0000);
    }

    fn idle_opb(read_data: u32) -> FakeScom {
        let mut scom = FakeScom::new();
        scom.set(
            Chip::PRIMARY,
            OPB_REG_STAT,
            OPB_STAT_READ_VALID | u64::from(read_data),
        );
        scom
    }

    #[test]
    fn secondary_write_goes_through_port_1() {
        let clock = FakeClock::new();
        let mut fsi = OpbFsi::new(idle_opb(0), &clock);
        fsi.write_fsi(Chip(1), 0x2400, 0xDEAD_BEEF).unwrap();

        let cmds = fsi.scom().writes_to(Chip::PRIMARY, OPB_REG_CMD);
        let addr = u64::from(0x2400 | MFSI_PORT_0 * 2);
        assert_eq!(
            cmds,
            [OPB_CMD_WRITE_NOT_READ
                | OPB_CMD_SIZE_4B
                | ppc_place(addr, 3, 29)
                | 0xDEAD_BEEF]
        );
    }

    #[test]
    fn read_returns_low_word() {
        let clock = FakeClock::new();
        let mut fsi = OpbFsi::new(idle_opb(0x1234_5678), &clock);
        assert_eq!(fsi.read_fsi(Chip(0), 0x2404), Ok(0x1234_5678));
    }

    #[test]
    fn busy_bridge_times_out() {
        let clock = FakeClock::new();
        let mut scom = FakeScom::new();
        scom.set(Chip::PRIMARY, OPB_REG_STAT, OPB_STAT_BUSY);
        let mut fsi = OpbFsi::new(scom, &clock);

        assert_eq!(
            fsi.read_fsi(Chip(0), 0x2404),
            Err(ScomError::FsiTimeout {
                chip: 0,
                status: OPB_STAT_BUSY
            })
        );
        assert_eq!(
            clock.now_us(),
            u64::from(OPB_MAX_WAIT_LOOPS) * OPB_TIMEOUT_STEP_US
        );
    }

    #[test]
    fn mfsi_errors_only_count_for_secondary() {
        let clock = FakeClock::new();
        let status = OPB_STAT_READ_VALID | 0x0000_0004_0000_0000 | 7;

        let mut scom = FakeScom::new();
        scom.set(Chip::PRIMARY, OPB_REG_STAT, status);
        let mut fsi = OpbFsi::new(scom, &clock);
        assert_eq!(fsi.read_fsi(Chip(0), 0), Ok(7));
        assert_eq!(
            fsi.read_fsi(Chip(1), 0),
            Err(ScomError::FsiError { chip: 1, status })
        );
    }

    #[test]
    fn bridge_reset_targets_chip() {
        let mut scom = FakeScom::new();
        reset_pib2opb(&mut scom, Chip(1)).unwrap();
        assert_eq!(
            scom.writes(),
            [
                (Chip(1), 0x0002_0004, 0x8000_0000_0000_0000),
                (Chip(1), 0x0002_0001, 0x8000_0000_0000_0000),
            ]
        );
    }

    #[test]
    fn present_chips_from_link_levels() {
        let clock = FakeClock::new();
        let mut fsi = OpbFsi::new(idle_opb(0x4000_0000), &clock);
        assert_eq!(fsi.present_chips(), Ok(ChipMask(0x03)));

        let mut fsi = OpbFsi::new(idle_opb(0), &clock);
        assert_eq!(fsi.present_chips(), Ok(ChipMask(0x01)));
    }
}
