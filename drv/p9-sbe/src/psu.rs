// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PSU mailbox between the host and the SBE.
//!
//! The host fills two mailbox registers, rings the SBE doorbell, and waits
//! for the SBE to ring the host doorbell back. There is exactly one message
//! in flight at a time; nothing is queued or cancelled.

use core::fmt;

use drv_p9_scom_api::{Chip, ChipletId, Scom, ScomError};
use p9_timebase::{wait_ms, Clock};
use ppc_bits::{ppc_bit, ppc_place};
use ringbuf::*;

pub const PSU_HOST_SBE_MBOX0_REG: u64 = 0x000D_0050;
pub const PSU_HOST_SBE_MBOX1_REG: u64 = 0x000D_0051;
pub const PSU_SBE_DOORBELL_REG: u64 = 0x000D_0060;
pub const PSU_SBE_DOORBELL_REG_WAND: u64 = 0x000D_0061;
pub const PSU_SBE_DOORBELL_REG_WOR: u64 = 0x000D_0062;
pub const PSU_HOST_DOORBELL_REG: u64 = 0x000D_0063;
pub const PSU_HOST_DOORBELL_REG_WAND: u64 = 0x000D_0064;
pub const PSU_HOST_DOORBELL_REG_WOR: u64 = 0x000D_0065;

const DOORBELL: u64 = ppc_bit(0);

/// How long the SBE gets to answer. Hostboot's value; a put-ring normally
/// completes in a few milliseconds.
pub const PSU_RESPONSE_TIMEOUT_MS: u64 = 90_000;

const CTRL_REQUIRE_RESPONSE: u64 = 0x0100;
const PSU_PUT_RING_FROM_IMAGE_CMD: u64 = 0xD3;
const CMD_CONTROL_PUTRING: u64 = 0x01;

/// Sequence id sent with every request. Hostboot numbers its messages and
/// expects the id to be unique; this driver only ever has one message in
/// flight and sends the same id each time.
pub const SEQUENCE_ID: u16 = 0;

const TARGET_TYPE_PERV: u64 = 0x0002;
const RING_MODE_SET_PULSE_NSL: u64 = 0x0004;

/// Ring image id in the SBE seeprom.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingId(pub u16);

impl RingId {
    pub const MEM_PLL_1866: Self = Self(0x6B);
    pub const MEM_PLL_2133: Self = Self(0x6C);
    pub const MEM_PLL_2400: Self = Self(0x6D);
    pub const MEM_PLL_2666: Self = Self(0x6E);

    /// The memory PLL bucket for a DDR4 speed grade in MT/s.
    pub fn for_mem_speed(mts: u32) -> Option<Self> {
        match mts {
            1866 => Some(Self::MEM_PLL_1866),
            2133 => Some(Self::MEM_PLL_2133),
            2400 => Some(Self::MEM_PLL_2400),
            2666 => Some(Self::MEM_PLL_2666),
            _ => None,
        }
    }
}

/// Scan ring `ring` of chiplet `chiplet` from the image in the SBE.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PutRingRequest {
    pub chiplet: ChipletId,
    pub ring: RingId,
}

impl PutRingRequest {
    pub fn mbox0(&self) -> u64 {
        ppc_place(CTRL_REQUIRE_RESPONSE, 16, 16)
            | ppc_place(SEQUENCE_ID.into(), 32, 16)
            | ppc_place(PSU_PUT_RING_FROM_IMAGE_CMD, 48, 8)
            | ppc_place(CMD_CONTROL_PUTRING, 56, 8)
    }

    pub fn mbox1(&self) -> u64 {
        ppc_place(TARGET_TYPE_PERV, 0, 16)
            | ppc_place(self.chiplet.0.into(), 24, 8)
            | ppc_place(self.ring.0.into(), 32, 16)
            | ppc_place(RING_MODE_SET_PULSE_NSL, 48, 16)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MailboxError {
    /// The SBE doorbell was still rung from an earlier message.
    Busy,
    /// The SBE never rang back.
    Timeout,
    Scom(ScomError),
}

impl From<ScomError> for MailboxError {
    fn from(e: ScomError) -> Self {
        Self::Scom(e)
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("MBOX to SBE busy"),
            Self::Timeout => f.write_str("timed out waiting for SBE response"),
            Self::Scom(e) => fmt::Display::fmt(e, f),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    PutRing { chip: u8, chiplet: u8, ring: u16 },
    Busy { chip: u8, doorbell: u64 },
    Timeout { chip: u8 },
    Done { chip: u8, ms: u64 },
}

ringbuf!(Trace, 16, Trace::None);

pub struct PsuMailbox<S: Scom, C: Clock> {
    scom: S,
    clock: C,
}

impl<S: Scom, C: Clock> PsuMailbox<S, C> {
    pub fn new(scom: S, clock: C) -> Self {
        Self { scom, clock }
    }

    /// Sends a put-ring request to the SBE of `chip` and waits for the
    /// response. Returns how long the SBE took, in milliseconds.
    pub fn put_ring(
        &mut self,
        chip: Chip,
        req: &PutRingRequest,
    ) -> Result<u64, MailboxError> {
        ringbuf_entry!(Trace::PutRing {
            chip: chip.0,
            chiplet: req.chiplet.0,
            ring: req.ring.0
        });

        let doorbell = self.scom.read(chip, PSU_SBE_DOORBELL_REG)?;
        if doorbell & DOORBELL != 0 {
            ringbuf_entry!(Trace::Busy {
                chip: chip.0,
                doorbell
            });
            return Err(MailboxError::Busy);
        }

        self.scom.write(chip, PSU_HOST_SBE_MBOX0_REG, req.mbox0())?;
        self.scom.write(chip, PSU_HOST_SBE_MBOX1_REG, req.mbox1())?;
        self.scom.write(chip, PSU_SBE_DOORBELL_REG_WOR, DOORBELL)?;

        let scom = &mut self.scom;
        let elapsed = wait_ms(&self.clock, PSU_RESPONSE_TIMEOUT_MS, || {
            Ok::<_, ScomError>(
                scom.read(chip, PSU_HOST_DOORBELL_REG)? & DOORBELL != 0,
            )
        })?;
        let Some(ms) = elapsed else {
            ringbuf_entry!(Trace::Timeout { chip: chip.0 });
            return Err(MailboxError::Timeout);
        };
        ringbuf_entry!(Trace::Done { chip: chip.0, ms });

        self.scom.write(chip, PSU_HOST_DOORBELL_REG_WAND, !DOORBELL)?;
        Ok(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_p9_scom_api::FakeScom;
    use p9_timebase::FakeClock;

    const REQ: PutRingRequest = PutRingRequest {
        chiplet: ChipletId::MC01,
        ring: RingId::MEM_PLL_2400,
    };

    #[test]
    fn mailbox_encoding() {
        assert_eq!(REQ.mbox0(), 0x0000_0100_0000_D301);
        assert_eq!(REQ.mbox1(), 0x0002_0007_006D_0004);
        let mc23 = PutRingRequest {
            chiplet: ChipletId::MC23,
            ring: RingId::MEM_PLL_1866,
        };
        assert_eq!(mc23.mbox1(), 0x0002_0008_006B_0004);
    }

    #[test]
    fn ring_buckets() {
        assert_eq!(RingId::for_mem_speed(2666), Some(RingId(0x6E)));
        assert_eq!(RingId::for_mem_speed(2133), Some(RingId(0x6C)));
        assert_eq!(RingId::for_mem_speed(3200), None);
    }

    #[test]
    fn busy_doorbell_sends_nothing() {
        let clock = FakeClock::new();
        let mut scom = FakeScom::new();
        scom.set(Chip(0), PSU_SBE_DOORBELL_REG, DOORBELL);

        let mut mbox = PsuMailbox::new(&mut scom, &clock);
        assert_eq!(mbox.put_ring(Chip(0), &REQ), Err(MailboxError::Busy));
        assert!(scom.writes().is_empty());
    }

    #[test]
    fn handshake_order() {
        let clock = FakeClock::new();
        let mut scom = FakeScom::new();
        scom.set(Chip(1), PSU_HOST_DOORBELL_REG, DOORBELL);

        let mut mbox = PsuMailbox::new(&mut scom, &clock);
        assert_eq!(mbox.put_ring(Chip(1), &REQ), Ok(1));
        assert_eq!(
            scom.writes(),
            [
                (Chip(1), PSU_HOST_SBE_MBOX0_REG, 0x0000_0100_0000_D301),
                (Chip(1), PSU_HOST_SBE_MBOX1_REG, 0x0002_0007_006D_0004),
                (Chip(1), PSU_SBE_DOORBELL_REG_WOR, DOORBELL),
                (Chip(1), PSU_HOST_DOORBELL_REG_WAND, !DOORBELL),
            ]
        );
    }

    #[test]
    fn silent_sbe_times_out() {
        let clock = FakeClock::new();
        let mut scom = FakeScom::new();

        let mut mbox = PsuMailbox::new(&mut scom, &clock);
        assert_eq!(mbox.put_ring(Chip(0), &REQ), Err(MailboxError::Timeout));
        assert_eq!(clock.now_us(), PSU_RESPONSE_TIMEOUT_MS * 1000);
        // The host doorbell is left alone when nothing came back.
        assert!(scom.writes_to(Chip(0), PSU_HOST_DOORBELL_REG_WAND).is_empty());
    }
}
