// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! XSCOM engine driver
//!
//! Each chip exposes its SCOM registers through a window of cache-inhibited
//! MMIO, one doubleword per register (the register address shifted left by
//! three). Completion status of each access is reported in the HMER special
//! purpose register of the issuing thread rather than by the access itself,
//! so every access here is "eieio, access, eieio, look at HMER".
//!
//! Registers with MSB-0 bit 0 of their address set are *indirect*: the
//! request is written to a direct base register and the result is polled out
//! of the same register.
//!
//! Nothing in here fails loudly. A failed direct read yields 0 (callers poll
//! for set bits, and all ones would look like success), a failed access
//! resets the engine, and the indirect protocol gives up after a bounded
//! number of polls. Failures are traced and counted in [`XscomStats`].

#![cfg_attr(target_os = "none", no_std)]

use drv_p9_scom_api::{is_indirect, Chip, Scom, ScomError};
use ppc_bits::{ppc_bit, ppc_bitmask};
use ringbuf::*;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "powerpc64")] {
        mod ppc64;
        pub use ppc64::Ppc64XscomBus;
    }
}

#[cfg(not(target_os = "none"))]
mod fakes;
#[cfg(not(target_os = "none"))]
pub use fakes::{BusEvent, FakeXscomBus};

pub const MMIO_GROUP0_CHIP0_SCOM_BASE_ADDR: u64 = 0x8006_03FC_0000_0000;
pub const MMIO_GROUP_SIZE: u64 = 0x0000_2000_0000_0000;

const XSCOM_ADDR_IND_ADDR: u64 = ppc_bitmask(11, 31);
const XSCOM_ADDR_IND_DATA: u64 = ppc_bitmask(48, 63);

pub const XSCOM_DATA_IND_READ: u64 = ppc_bit(0);
pub const XSCOM_DATA_IND_COMPLETE: u64 = ppc_bit(32);
pub const XSCOM_DATA_IND_ERR: u64 = ppc_bitmask(33, 35);
pub const XSCOM_DATA_IND_DATA: u64 = ppc_bitmask(48, 63);

/// Polls of an indirect register before giving up on COMPLETE.
pub const XSCOM_IND_MAX_RETRIES: u32 = 10;

/// Re-issues of a direct access that found the engine occupied. Real
/// hardware frees up within a few tries; this only bounds a wedged engine.
pub const XSCOM_OCCUPIED_MAX_RETRIES: u32 = 1000;

pub const XSCOM_RCVED_STAT_REG: u64 = 0x0009_0018;
pub const XSCOM_LOG_REG: u64 = 0x0009_0012;
pub const XSCOM_ERR_REG: u64 = 0x0009_0013;

/// Hypervisor Maintenance Exception Register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Hmer(pub u64);

impl Hmer {
    pub const MALFUNCTION_ALERT: u64 = ppc_bit(0);
    pub const XSCOM_FAIL: u64 = ppc_bit(8);
    pub const XSCOM_DONE: u64 = ppc_bit(9);
    pub const XSCOM_STATUS: u64 = ppc_bitmask(21, 23);
    pub const XSCOM_OCCUPIED: u64 = ppc_bit(23);

    pub fn xscom_status(self) -> u64 {
        self.0 & Self::XSCOM_STATUS
    }

    /// The engine was busy and the access was not performed.
    pub fn is_occupied(self) -> bool {
        self.xscom_status() == Self::XSCOM_OCCUPIED
    }

    pub fn xscom_fail(self) -> bool {
        self.0 & Self::XSCOM_FAIL != 0
    }

    pub fn xscom_done(self) -> bool {
        self.0 & Self::XSCOM_DONE != 0
    }
}

/// Raw access to the XSCOM MMIO window and the HMER of the current thread.
pub trait XscomBus {
    /// Cache-inhibited load of register `addr` on `chip`.
    fn load(&mut self, chip: Chip, addr: u64) -> u64;

    /// Cache-inhibited store to register `addr` on `chip`.
    fn store(&mut self, chip: Chip, addr: u64, data: u64);

    fn read_hmer(&mut self) -> Hmer;

    fn clear_hmer(&mut self);

    /// I/O ordering barrier.
    fn eieio(&mut self);
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct XscomStats {
    pub resets: u32,
    pub occupied_retries: u32,
    pub indirect_errors: u32,
    pub indirect_timeouts: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    AccessFailed { chip: u8, addr: u64, hmer: u64 },
    StillOccupied { chip: u8, addr: u64 },
    IndirectWriteError { addr: u64, value: u64, status: u64 },
    IndirectReadError { addr: u64, status: u64 },
    IndirectTimeout { chip: u8, addr: u64 },
}

ringbuf!(Trace, 32, Trace::None);

pub struct Xscom<B: XscomBus> {
    bus: B,
    stats: XscomStats,
}

impl<B: XscomBus> Xscom<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            stats: XscomStats::default(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn stats(&self) -> XscomStats {
        self.stats
    }

    /// Issues one direct access, retrying while the engine reports itself
    /// occupied. HMER is only cleared before a retry: clearing it on every
    /// access slows SCOM-heavy loops down enough to matter.
    ///
    /// Returns `None` (after resetting the engine) if the access failed.
    fn direct<T>(
        &mut self,
        chip: Chip,
        addr: u64,
        mut access: impl FnMut(&mut B) -> T,
    ) -> Option<T> {
        let mut hmer = Hmer::default();
        let mut retries = 0;
        let val = loop {
            if hmer.is_occupied() {
                self.bus.clear_hmer();
            }

            self.bus.eieio();
            let val = access(&mut self.bus);
            self.bus.eieio();
            hmer = self.bus.read_hmer();

            if !hmer.is_occupied() {
                break val;
            }
            if retries == XSCOM_OCCUPIED_MAX_RETRIES {
                ringbuf_entry!(Trace::StillOccupied { chip: chip.0, addr });
                break val;
            }
            retries += 1;
            self.stats.occupied_retries += 1;
        };

        if hmer.xscom_status() != 0 {
            ringbuf_entry!(Trace::AccessFailed {
                chip: chip.0,
                addr,
                hmer: hmer.0
            });
            self.reset(chip);
            return None;
        }
        Some(val)
    }

    fn read_direct(&mut self, chip: Chip, addr: u64) -> u64 {
        self.direct(chip, addr, |bus| bus.load(chip, addr))
            .unwrap_or(0)
    }

    fn write_direct(&mut self, chip: Chip, addr: u64, data: u64) {
        // A failed write has already reset the engine; nothing else to do.
        let _ = self.direct(chip, addr, |bus| bus.store(chip, addr, data));
    }

    /// Polls the base register of an indirect access until it reports
    /// completion without error, at most [`XSCOM_IND_MAX_RETRIES`] times.
    /// Returns the last status read.
    fn poll_indirect(
        &mut self,
        chip: Chip,
        base: u64,
        mut on_error: impl FnMut(u64),
    ) -> u64 {
        let mut status = 0;
        for _ in 0..XSCOM_IND_MAX_RETRIES {
            status = self.read_direct(chip, base);
            if status & XSCOM_DATA_IND_COMPLETE != 0 {
                if status & XSCOM_DATA_IND_ERR == 0 {
                    return status;
                }
                self.stats.indirect_errors += 1;
                on_error(status);
            }
        }
        self.stats.indirect_timeouts += 1;
        ringbuf_entry!(Trace::IndirectTimeout { chip: chip.0, addr: base });
        status
    }

    fn write_indirect(&mut self, chip: Chip, addr: u64, value: u64) {
        let base = addr & 0x7FFF_FFFF;
        let data = (addr & XSCOM_ADDR_IND_ADDR) | (value & XSCOM_ADDR_IND_DATA);

        self.write_direct(chip, base, data);
        self.poll_indirect(chip, base, |status| {
            ringbuf_entry!(Trace::IndirectWriteError {
                addr,
                value,
                status
            });
        });
    }

    fn read_indirect(&mut self, chip: Chip, addr: u64) -> u64 {
        let base = addr & 0x7FFF_FFFF;
        let data = XSCOM_DATA_IND_READ | (addr & XSCOM_ADDR_IND_ADDR);

        self.write_direct(chip, base, data);
        let status = self.poll_indirect(chip, base, |status| {
            ringbuf_entry!(Trace::IndirectReadError { addr, status });
        });
        status & XSCOM_DATA_IND_DATA
    }

    /// Clears the error state of the engine after a failed access.
    ///
    /// The received-status register belongs to the issuing chip, the other
    /// two to the target. The stores go straight to the bus without looking
    /// at HMER, so a reset that itself fails cannot recurse.
    pub fn reset(&mut self, chip: Chip) {
        self.stats.resets += 1;
        self.bus.store(Chip::PRIMARY, XSCOM_RCVED_STAT_REG, 0);
        self.bus.store(chip, XSCOM_LOG_REG, 0);
        self.bus.store(chip, XSCOM_ERR_REG, 0);
        self.bus.clear_hmer();
        self.bus.eieio();
    }
}

impl<B: XscomBus> Scom for Xscom<B> {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        Ok(if is_indirect(addr) {
            self.read_indirect(chip, addr)
        } else {
            self.read_direct(chip, addr)
        })
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        if is_indirect(addr) {
            self.write_indirect(chip, addr, data);
        } else {
            self.write_direct(chip, addr, data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const IND_REG: u64 = 0x8000_0C01_0701_103F;
    const IND_BASE: u64 = 0x0701_103F;

    #[test]
    fn hmer_status_decoding() {
        assert!(Hmer(Hmer::XSCOM_OCCUPIED).is_occupied());
        assert!(!Hmer(Hmer::XSCOM_OCCUPIED | ppc_bit(21)).is_occupied());
        assert_eq!(Hmer(Hmer::XSCOM_DONE).xscom_status(), 0);
        assert!(Hmer(Hmer::XSCOM_FAIL).xscom_fail());
        assert_eq!(Hmer::XSCOM_STATUS, 0x0000_0700_0000_0000);
    }

    #[test]
    fn direct_access_is_fenced() {
        let mut x = Xscom::new(FakeXscomBus::new());
        x.write(Chip(0), 0x0102_0304, 5).unwrap();
        assert_eq!(
            x.bus().events(),
            [
                BusEvent::Eieio,
                BusEvent::Store(Chip(0), 0x0102_0304, 5),
                BusEvent::Eieio,
                BusEvent::ReadHmer,
            ]
        );
    }

    #[test]
    fn occupied_is_retried_after_clearing_hmer() {
        let mut x = Xscom::new(FakeXscomBus::new());
        x.bus_mut().set(Chip(1), 0x10, 0xABCD);
        x.bus_mut().queue_hmer(Hmer(Hmer::XSCOM_OCCUPIED));
        x.bus_mut().queue_hmer(Hmer(Hmer::XSCOM_OCCUPIED));

        assert_eq!(x.read(Chip(1), 0x10), Ok(0xABCD));
        assert_eq!(x.stats().occupied_retries, 2);
        assert_eq!(x.stats().resets, 0);

        // No HMER clear before the first attempt, one before each retry.
        let ev = x.bus().events();
        assert_eq!(ev[0], BusEvent::Eieio);
        let clears: Vec<_> = ev
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == BusEvent::ClearHmer)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(clears.len(), 2);
        for i in clears {
            assert_eq!(ev[i - 1], BusEvent::ReadHmer);
            assert_eq!(ev[i + 1], BusEvent::Eieio);
        }
    }

    #[test]
    fn failed_read_resets_and_returns_zero() {
        let mut x = Xscom::new(FakeXscomBus::new());
        x.bus_mut().set(Chip(1), 0x20, u64::MAX);
        x.bus_mut().queue_hmer(Hmer(Hmer::XSCOM_FAIL | ppc_bit(22)));

        assert_eq!(x.read(Chip(1), 0x20), Ok(0));
        assert_eq!(x.stats().resets, 1);

        let ev = x.bus().events();
        let tail = &ev[ev.len() - 5..];
        assert_eq!(
            tail,
            [
                BusEvent::Store(Chip(0), XSCOM_RCVED_STAT_REG, 0),
                BusEvent::Store(Chip(1), XSCOM_LOG_REG, 0),
                BusEvent::Store(Chip(1), XSCOM_ERR_REG, 0),
                BusEvent::ClearHmer,
                BusEvent::Eieio,
            ]
        );
        // The reset stores did not consult HMER.
        assert_eq!(
            ev.iter().filter(|e| **e == BusEvent::ReadHmer).count(),
            1
        );
    }

    #[test]
    fn wedged_engine_gives_up() {
        let mut bus = FakeXscomBus::new();
        bus.always_occupied(true);
        let mut x = Xscom::new(bus);
        assert_eq!(x.read(Chip(0), 0x30), Ok(0));
        assert_eq!(x.stats().occupied_retries, XSCOM_OCCUPIED_MAX_RETRIES);
        assert_eq!(x.stats().resets, 1);
    }

    #[test]
    fn indirect_write_encoding() {
        let mut bus = FakeXscomBus::new();
        bus.add_indirect_port(Chip(0), IND_BASE, Some(3), 0);
        let mut x = Xscom::new(bus);

        x.write(Chip(0), IND_REG, 0x1_2345).unwrap();

        // Only the 16-bit data field of the value is carried.
        assert_eq!(
            x.bus().stores_to(Chip(0), IND_BASE),
            [0x0000_0C01_0000_2345]
        );
        assert_eq!(x.bus().loads_of(Chip(0), IND_BASE), 3);
        assert_eq!(x.bus().indirect_value(Chip(0), IND_BASE, IND_REG), 0x2345);
    }

    #[test]
    fn indirect_read_returns_data_field() {
        let mut bus = FakeXscomBus::new();
        bus.add_indirect_port(Chip(0), IND_BASE, Some(1), 0);
        bus.set_indirect_value(Chip(0), IND_BASE, IND_REG, 0xBEEF);
        let mut x = Xscom::new(bus);

        assert_eq!(x.read(Chip(0), IND_REG), Ok(0xBEEF));
        assert_eq!(
            x.bus().stores_to(Chip(0), IND_BASE),
            [XSCOM_DATA_IND_READ | 0x0000_0C01_0000_0000]
        );
        assert_eq!(x.bus().loads_of(Chip(0), IND_BASE), 1);
    }

    #[test]
    fn indirect_error_keeps_polling() {
        let mut bus = FakeXscomBus::new();
        bus.add_indirect_port(Chip(0), IND_BASE, Some(1), 0b101);
        let mut x = Xscom::new(bus);

        x.write(Chip(0), IND_REG, 1).unwrap();
        assert_eq!(
            x.bus().loads_of(Chip(0), IND_BASE),
            XSCOM_IND_MAX_RETRIES as usize
        );
        assert_eq!(x.stats().indirect_errors, XSCOM_IND_MAX_RETRIES);
        assert_eq!(x.stats().indirect_timeouts, 1);
    }

    proptest! {
        #[test]
        fn direct_round_trip(
            chip in 0u8..2,
            addr in 0u64..0x8000_0000,
            v: u64,
        ) {
            let mut x = Xscom::new(FakeXscomBus::new());
            x.write(Chip(chip), addr, v).unwrap();
            prop_assert_eq!(x.read(Chip(chip), addr), Ok(v));
        }

        #[test]
        fn indirect_poll_is_bounded(
            complete_after in proptest::option::of(1u32..20),
            err in 0u8..8,
            write: bool,
            v: u64,
        ) {
            let mut bus = FakeXscomBus::new();
            bus.add_indirect_port(Chip(0), IND_BASE, complete_after, err);
            let mut x = Xscom::new(bus);

            if write {
                x.write(Chip(0), IND_REG, v).unwrap();
            } else {
                x.read(Chip(0), IND_REG).unwrap();
            }

            let polls = x.bus().loads_of(Chip(0), IND_BASE);
            prop_assert!(polls <= XSCOM_IND_MAX_RETRIES as usize);
            match complete_after {
                Some(n) if n <= XSCOM_IND_MAX_RETRIES && err == 0 => {
                    prop_assert_eq!(polls, n as usize);
                }
                _ => prop_assert_eq!(polls, XSCOM_IND_MAX_RETRIES as usize),
            }
        }
    }
}
