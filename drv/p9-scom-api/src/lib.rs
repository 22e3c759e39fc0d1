// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common API for POWER9 SCOM access
//!
//! SCOM registers are 64 bits wide and addressed by a 64-bit address whose
//! MSB-0 bits 34..39 select the chiplet. This crate holds the address and
//! topology vocabulary plus the [`Scom`] trait implemented by every access
//! path (XSCOM, SBE FIFO, the dispatcher between them, and fakes).

#![cfg_attr(target_os = "none", no_std)]

use core::fmt;

use ppc_bits::{ppc_bit, ppc_bitmask};

#[cfg(not(target_os = "none"))]
mod fakes;
#[cfg(not(target_os = "none"))]
pub use fakes::{Access, FakeScom};

/// Maximum number of processor chips on a board.
pub const MAX_CHIPS: u8 = 2;

pub const MCS_PER_PROC: usize = 2;
pub const MCA_PER_MCS: usize = 2;

/// Chiplets holding the two MCS units of a processor, indexed by MCS number.
pub const MCS_IDS: [ChipletId; MCS_PER_PROC] =
    [ChipletId::MC01, ChipletId::MC23];

/// Register holding the chip EC level, and all ones when SCOM is broken.
pub const CHIP_ID_REG: u64 = 0x0000_0000_000F_000F;

/// A processor chip, by index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chip(pub u8);

impl Chip {
    /// The chip the boot firmware runs on.
    pub const PRIMARY: Self = Self(0);

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chip {}", self.0)
    }
}

/// Bitmask of present chips: bit `n` set means chip `n` is present.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChipMask(pub u8);

impl ChipMask {
    pub const PRIMARY_ONLY: Self = Self(0x01);

    pub fn contains(self, chip: Chip) -> bool {
        chip.0 < MAX_CHIPS && self.0 & (1 << chip.0) != 0
    }

    /// Present chips, lowest index first.
    pub fn iter(self) -> impl Iterator<Item = Chip> {
        (0..MAX_CHIPS).map(Chip).filter(move |&c| self.contains(c))
    }

    /// True if any chip other than the primary is present.
    pub fn has_secondary(self) -> bool {
        self.iter().any(|c| !c.is_primary())
    }
}

/// Chiplet number within a chip (6 bits).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChipletId(pub u8);

impl ChipletId {
    pub const PIB: Self = Self(0x00);
    pub const PERV: Self = Self(0x01);
    pub const N0: Self = Self(0x02);
    pub const N1: Self = Self(0x03);
    pub const N2: Self = Self(0x04);
    pub const N3: Self = Self(0x05);
    pub const XB: Self = Self(0x06);
    pub const MC01: Self = Self(0x07);
    pub const MC23: Self = Self(0x08);
    pub const OB0: Self = Self(0x09);
    pub const OB1: Self = Self(0x0A);
    pub const OB2: Self = Self(0x0B);
    pub const OB3: Self = Self(0x0C);
    pub const PCI0: Self = Self(0x0D);
    pub const PCI1: Self = Self(0x0E);
    pub const PCI2: Self = Self(0x0F);
    pub const EP00: Self = Self(0x10);
    pub const EP05: Self = Self(0x15);
    pub const EC00: Self = Self(0x20);
    pub const EC23: Self = Self(0x37);

    /// Offsets a chiplet id, e.g. `PCI0.offset(pec)` or `EC00.offset(core)`.
    pub const fn offset(self, n: u8) -> Self {
        Self(self.0 + n)
    }

    /// Nest chiplet that hosts the MCS registers of a memory chiplet.
    pub fn mcs_to_nest(self) -> Option<Self> {
        match self {
            Self::MC01 => Some(Self::N3),
            Self::MC23 => Some(Self::N1),
            _ => None,
        }
    }
}

/// Set in addresses that go through the indirect (form 0/1) protocol.
pub const SCOM_ADDR_INDIRECT: u64 = ppc_bit(0);

const CHIPLET_FIELD: u64 = ppc_bitmask(34, 39);

pub fn is_indirect(addr: u64) -> bool {
    addr & SCOM_ADDR_INDIRECT != 0
}

/// Retargets `addr` at `chiplet`.
pub fn chiplet_addr(addr: u64, chiplet: ChipletId) -> u64 {
    (addr & !CHIPLET_FIELD) | (u64::from(chiplet.0 & 0x3F) << 24)
}

/// Address of register `addr` of MCA `mca` within its MCS chiplet.
///
/// Per-port registers are spaced 0x40 apart, except indirect and direct
/// PHY registers which are 0x400 apart.
pub fn mca_addr(addr: u64, mca: usize) -> u64 {
    let stride = if is_indirect(addr) || addr & 0xFFFF_F000 == 0x0701_1000 {
        0x400
    } else {
        0x40
    };
    addr + stride * mca as u64
}

/// Chiplet field of an address.
pub fn chiplet_of(addr: u64) -> ChipletId {
    ChipletId(((addr >> 24) & 0x3F) as u8)
}

/// Ring field of an address (MSB-0 bits 50..53).
pub fn ring_of(addr: u64) -> u8 {
    ((addr >> 10) & 0xF) as u8
}

/// Errors that a SCOM access path can report. XSCOM itself never fails an
/// access (a failed read yields 0); these come from the SBE FIFO path and
/// the FSI master underneath it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScomError {
    /// The upstream FIFO never drained enough to accept a word.
    UpstreamFifoTimeout { chip: u8 },
    /// The downstream FIFO stayed empty without an end-of-transfer.
    DownstreamFifoTimeout { chip: u8 },
    /// The response did not fit the receive buffer.
    ResponseOverflow { chip: u8 },
    ResponseTooShort { chip: u8, words: u16 },
    BadStatusOffset { chip: u8, offset: u32 },
    BadStatus {
        chip: u8,
        magic: u16,
        primary: u16,
        secondary: u16,
    },
    /// The FSI master reported an error for an access to `chip`.
    FsiError { chip: u8, status: u64 },
    /// The FSI master stayed busy.
    FsiTimeout { chip: u8, status: u64 },
    FsiReadInvalid { chip: u8 },
}

impl fmt::Display for ScomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UpstreamFifoTimeout { chip } => {
                write!(f, "timeout waiting for upstream SBE FIFO on chip {chip}")
            }
            Self::DownstreamFifoTimeout { chip } => {
                write!(f, "timeout waiting for SBE response on chip {chip}")
            }
            Self::ResponseOverflow { chip } => {
                write!(f, "SBE response from chip {chip} overflowed buffer")
            }
            Self::ResponseTooShort { chip, words } => write!(
                f,
                "SBE response from chip {chip} too short ({words} words)"
            ),
            Self::BadStatusOffset { chip, offset } => write!(
                f,
                "SBE response from chip {chip} has bad status offset {offset}"
            ),
            Self::BadStatus {
                chip,
                magic,
                primary,
                secondary,
            } => write!(
                f,
                "SBE on chip {chip} failed request: magic {magic:#06x}, \
                 status {primary:#06x}/{secondary:#06x}"
            ),
            Self::FsiError { chip, status } => {
                write!(f, "FSI error for chip {chip}: {status:#018x}")
            }
            Self::FsiTimeout { chip, status } => write!(
                f,
                "timed out polling FSI master for chip {chip}: {status:#018x}"
            ),
            Self::FsiReadInvalid { chip } => {
                write!(f, "FSI read from chip {chip} returned no data")
            }
        }
    }
}

/// A path to the SCOM registers of one or more chips.
///
/// Implementors supply raw reads and writes; the read-modify-write and
/// chiplet-relative helpers are provided on top of them.
pub trait Scom {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError>;

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError>;

    /// Moves secondary chips from SBE-IO to XSCOM. Meaningful only for
    /// access paths that route by chip; a no-op otherwise.
    fn switch_secondary_to_xscom(&mut self) {}

    fn and_or(
        &mut self,
        chip: Chip,
        addr: u64,
        and: u64,
        or: u64,
    ) -> Result<(), ScomError> {
        let v = self.read(chip, addr)?;
        self.write(chip, addr, (v & and) | or)
    }

    fn and(&mut self, chip: Chip, addr: u64, and: u64) -> Result<(), ScomError> {
        self.and_or(chip, addr, and, 0)
    }

    fn or(&mut self, chip: Chip, addr: u64, or: u64) -> Result<(), ScomError> {
        self.and_or(chip, addr, !0, or)
    }

    fn read_for_chiplet(
        &mut self,
        chip: Chip,
        chiplet: ChipletId,
        addr: u64,
    ) -> Result<u64, ScomError> {
        self.read(chip, chiplet_addr(addr, chiplet))
    }

    fn write_for_chiplet(
        &mut self,
        chip: Chip,
        chiplet: ChipletId,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        self.write(chip, chiplet_addr(addr, chiplet), data)
    }

    fn and_or_for_chiplet(
        &mut self,
        chip: Chip,
        chiplet: ChipletId,
        addr: u64,
        and: u64,
        or: u64,
    ) -> Result<(), ScomError> {
        self.and_or(chip, chiplet_addr(addr, chiplet), and, or)
    }

    fn and_for_chiplet(
        &mut self,
        chip: Chip,
        chiplet: ChipletId,
        addr: u64,
        and: u64,
    ) -> Result<(), ScomError> {
        self.and_or_for_chiplet(chip, chiplet, addr, and, 0)
    }

    fn or_for_chiplet(
        &mut self,
        chip: Chip,
        chiplet: ChipletId,
        addr: u64,
        or: u64,
    ) -> Result<(), ScomError> {
        self.and_or_for_chiplet(chip, chiplet, addr, !0, or)
    }

    /// Chip EC level, e.g. `0x22` for DD2.2.
    fn get_dd(&mut self, chip: Chip) -> Result<u8, ScomError> {
        let v = self.read(chip, CHIP_ID_REG)?;
        Ok((((v >> 52) & 0x0F) | ((v >> 56) & 0xF0)) as u8)
    }
}

impl<S: Scom + ?Sized> Scom for &mut S {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        (**self).read(chip, addr)
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        (**self).write(chip, addr, data)
    }

    fn switch_secondary_to_xscom(&mut self) {
        (**self).switch_secondary_to_xscom()
    }
}
