// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit manipulation in IBM POWER bit order.
//!
//! POWER documentation numbers the bits of a 64-bit register from the most
//! significant end: bit 0 is `1 << 63` and bit 63 is `1 << 0`. Every register
//! description in the POWER9 SCOM manuals (and every constant in the drivers
//! in this workspace) uses that numbering, so these helpers take MSB-0 bit
//! positions and do the flipping in one place.
//!
//! All of the helpers are `const fn` so register values can be assembled in
//! `const` items.

#![cfg_attr(target_os = "none", no_std)]

/// Returns a mask with only MSB-0 bit `bit` set.
pub const fn ppc_bit(bit: u32) -> u64 {
    0x8000_0000_0000_0000 >> bit
}

/// Returns a mask with MSB-0 bits `first` through `last` (inclusive) set.
pub const fn ppc_bitmask(first: u32, last: u32) -> u64 {
    (ppc_bit(first) - ppc_bit(last)) | ppc_bit(first)
}

/// Shifts `val` so that its least significant bit lands on MSB-0 bit `lsb`.
pub const fn ppc_shift(val: u64, lsb: u32) -> u64 {
    val << (63 - lsb)
}

/// Mask of the `len` low-order bits.
const fn low_mask(len: u32) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1 << len) - 1
    }
}

/// Places the low `len` bits of `val` in the field that starts at MSB-0 bit
/// `pos`. Bits of `val` above `len` are discarded.
pub const fn ppc_place(val: u64, pos: u32, len: u32) -> u64 {
    ppc_shift(val & low_mask(len), pos + len - 1)
}

/// Extracts the `len`-bit field starting at MSB-0 bit `pos`.
pub const fn ppc_extract(val: u64, pos: u32, len: u32) -> u64 {
    (val >> (63 - (pos + len - 1))) & low_mask(len)
}

/// Replaces the `len`-bit field at MSB-0 bit `pos` of `lhs` with `val`.
pub fn ppc_insert(lhs: &mut u64, val: u64, pos: u32, len: u32) {
    *lhs = (*lhs & !ppc_bitmask(pos, pos + len - 1)) | ppc_place(val, pos, len);
}

static_assertions::const_assert_eq!(
    ppc_place(0x12345, 0, 20),
    0x1234_5000_0000_0000
);
static_assertions::const_assert_eq!(
    ppc_place(0x12345, 0, 24),
    0x0123_4500_0000_0000
);
static_assertions::const_assert_eq!(
    ppc_place(0x12345, 8, 24),
    0x0001_2345_0000_0000
);
