// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SCOM through the SBE FIFO.
//!
//! A request is a sequence of 32-bit words pushed into the upstream FIFO
//! followed by an end-of-transfer signal. The response is popped from the
//! downstream FIFO until the SBE signals end-of-transfer, and has the shape
//!
//! ```text
//! | return data (optional) | status header | FFDC (optional) |
//! | offset to status header | EOT word |
//! ```

use drv_p9_scom_api::{Chip, Scom, ScomError};
use p9_timebase::{wait_us, Clock};
use ringbuf::*;
use zerocopy::byteorder::big_endian as be;
use zerocopy::{FromBytes, IntoBytes};

use crate::fsi::Fsi;

pub const SBE_FIFO_UPFIFO_DATA_IN: u32 = 0x0000_2400;
pub const SBE_FIFO_UPFIFO_STATUS: u32 = 0x0000_2404;
pub const SBE_FIFO_UPFIFO_SIG_EOT: u32 = 0x0000_2408;
pub const SBE_FIFO_UPFIFO_REQ_RESET: u32 = 0x0000_240C;
pub const SBE_FIFO_DNFIFO_DATA_OUT: u32 = 0x0000_2440;
pub const SBE_FIFO_DNFIFO_STATUS: u32 = 0x0000_2444;
pub const SBE_FIFO_DNFIFO_RESET: u32 = 0x0000_2450;
pub const SBE_FIFO_DNFIFO_ACK_EOT: u32 = 0x0000_2454;
pub const SBE_FIFO_DNFIFO_MAX_TSFR: u32 = 0x0000_2458;

pub const UPFIFO_STATUS_FIFO_FULL: u32 = 0x0020_0000;
pub const DNFIFO_STATUS_DEQUEUED_EOT_FLAG: u32 = 0x0080_0000;
pub const DNFIFO_STATUS_FIFO_EMPTY: u32 = 0x0010_0000;

pub const SBE_FIFO_CLASS_SCOM_ACCESS: u8 = 0xA2;
pub const SBE_FIFO_CMD_GET_SCOM: u8 = 0x01;
pub const SBE_FIFO_CMD_PUT_SCOM: u8 = 0x02;

pub const FSB_FIFO_SIG_EOT: u32 = 0x8000_0000;
pub const FIFO_STATUS_MAGIC: u16 = 0xC0DE;

/// Hostboot allows 90 s; a healthy SBE answers in well under a second.
pub const MAX_FIFO_TIMEOUT_US: u64 = 2_000_000;
const FIFO_POLL_US: u64 = 10;

/// Large enough to hold FFDC.
pub const MSG_BUFFER_SIZE: usize = 2048;

const STATUS_SIZE_WORDS: usize =
    core::mem::size_of::<StatusHeader>() / core::mem::size_of::<u32>();

#[derive(zerocopy_derive::IntoBytes, zerocopy_derive::Immutable)]
#[repr(C)]
struct RequestHeader {
    word_count: be::U32,
    reserved: be::U16,
    cmd_class: u8,
    cmd: u8,
}

#[derive(zerocopy_derive::IntoBytes, zerocopy_derive::Immutable)]
#[repr(C)]
struct GetScomRequest {
    header: RequestHeader,
    addr: be::U64,
}

#[derive(zerocopy_derive::IntoBytes, zerocopy_derive::Immutable)]
#[repr(C)]
struct PutScomRequest {
    header: RequestHeader,
    addr: be::U64,
    data: be::U64,
}

/// Part of every response.
#[derive(
    Copy, Clone, zerocopy_derive::FromBytes, zerocopy_derive::Immutable,
)]
#[repr(C)]
pub struct StatusHeader {
    pub magic: be::U16,
    pub cmd_class: u8,
    pub cmd: u8,
    pub primary_status: be::U16,
    pub secondary_status: be::U16,
}

impl RequestHeader {
    fn new<R>(cmd: u8) -> Self {
        Self {
            word_count: be::U32::new(
                (core::mem::size_of::<R>() / core::mem::size_of::<u32>())
                    as u32,
            ),
            reserved: be::U16::new(0),
            cmd_class: SBE_FIFO_CLASS_SCOM_ACCESS,
            cmd,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Request { chip: u8, cmd: u8, addr: u64 },
    ResponseWords(u16),
    LastDownstreamStatus(u32),
    BadStatus { magic: u16, primary: u16, secondary: u16 },
}

ringbuf!(Trace, 16, Trace::None);

pub struct SbeFifo<F: Fsi, C: Clock> {
    fsi: F,
    clock: C,
    buffer: [u32; MSG_BUFFER_SIZE],
}

impl<F: Fsi, C: Clock> SbeFifo<F, C> {
    pub fn new(fsi: F, clock: C) -> Self {
        Self {
            fsi,
            clock,
            buffer: [0; MSG_BUFFER_SIZE],
        }
    }

    pub fn fsi(&mut self) -> &mut F {
        &mut self.fsi
    }

    fn push(
        &mut self,
        chip: Chip,
        addr: u32,
        data: u32,
    ) -> Result<(), ScomError> {
        let fsi = &mut self.fsi;
        let room = wait_us(&self.clock, MAX_FIFO_TIMEOUT_US, FIFO_POLL_US, || {
            let status = fsi.read_fsi(chip, SBE_FIFO_UPFIFO_STATUS)?;
            Ok(status & UPFIFO_STATUS_FIFO_FULL == 0)
        })?;
        if room.is_none() {
            return Err(ScomError::UpstreamFifoTimeout { chip: chip.0 });
        }
        self.fsi.write_fsi(chip, addr, data)
    }

    /// Returns `None` once the SBE has signalled the end of the response.
    fn pop(&mut self, chip: Chip) -> Result<Option<u32>, ScomError> {
        let fsi = &mut self.fsi;
        let mut status = 0;
        let ready = wait_us(&self.clock, MAX_FIFO_TIMEOUT_US, FIFO_POLL_US, || {
            status = fsi.read_fsi(chip, SBE_FIFO_DNFIFO_STATUS)?;
            Ok(status & DNFIFO_STATUS_DEQUEUED_EOT_FLAG != 0
                || status & DNFIFO_STATUS_FIFO_EMPTY == 0)
        })?;

        if ready.is_none() {
            ringbuf_entry!(Trace::LastDownstreamStatus(status));
            return Err(ScomError::DownstreamFifoTimeout { chip: chip.0 });
        }
        if status & DNFIFO_STATUS_DEQUEUED_EOT_FLAG != 0 {
            return Ok(None);
        }
        self.fsi.read_fsi(chip, SBE_FIFO_DNFIFO_DATA_OUT).map(Some)
    }

    fn write_request(
        &mut self,
        chip: Chip,
        request: &[u8],
    ) -> Result<(), ScomError> {
        // A non-zero downstream transfer counter confuses the protocol.
        self.fsi.write_fsi(chip, SBE_FIFO_DNFIFO_MAX_TSFR, 0)?;

        for word in request.chunks_exact(4) {
            let word = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            self.push(chip, SBE_FIFO_UPFIFO_DATA_IN, word)?;
        }

        self.push(chip, SBE_FIFO_UPFIFO_SIG_EOT, FSB_FIFO_SIG_EOT)
    }

    /// Reads a response, copying its leading words into `out`, and checks
    /// its status header.
    fn read_response(
        &mut self,
        chip: Chip,
        out: &mut [u32],
    ) -> Result<(), ScomError> {
        let mut len = 0;
        loop {
            if len == MSG_BUFFER_SIZE {
                return Err(ScomError::ResponseOverflow { chip: chip.0 });
            }
            let Some(word) = self.pop(chip)? else {
                break;
            };
            self.buffer[len] = word;
            if let Some(o) = out.get_mut(len) {
                *o = word;
            }
            len += 1;
        }
        ringbuf_entry!(Trace::ResponseWords(len as u16));

        self.fsi
            .write_fsi(chip, SBE_FIFO_DNFIFO_ACK_EOT, FSB_FIFO_SIG_EOT)?;

        // Smallest valid response: status header, offset, EOT word.
        if len < STATUS_SIZE_WORDS + 2 {
            return Err(ScomError::ResponseTooShort {
                chip: chip.0,
                words: len as u16,
            });
        }

        // The offset word sits just before the EOT word and counts back
        // from itself to the start of the status header.
        let offset_idx = len - 2;
        let offset = self.buffer[offset_idx] as usize;
        if offset.wrapping_sub(1) > offset_idx || offset < STATUS_SIZE_WORDS + 1
        {
            return Err(ScomError::BadStatusOffset {
                chip: chip.0,
                offset: offset as u32,
            });
        }
        let status_idx = offset_idx - (offset - 1);

        let mut raw = [0u8; 8];
        raw[..4].copy_from_slice(&self.buffer[status_idx].to_be_bytes());
        raw[4..].copy_from_slice(&self.buffer[status_idx + 1].to_be_bytes());
        let Ok(hdr) = StatusHeader::read_from_bytes(&raw[..]) else {
            return Err(ScomError::ResponseTooShort {
                chip: chip.0,
                words: len as u16,
            });
        };

        let (magic, primary, secondary) = (
            hdr.magic.get(),
            hdr.primary_status.get(),
            hdr.secondary_status.get(),
        );
        if magic != FIFO_STATUS_MAGIC || primary != 0 || secondary != 0 {
            ringbuf_entry!(Trace::BadStatus {
                magic,
                primary,
                secondary
            });
            return Err(ScomError::BadStatus {
                chip: chip.0,
                magic,
                primary,
                secondary,
            });
        }
        Ok(())
    }
}

impl<F: Fsi, C: Clock> Scom for SbeFifo<F, C> {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        ringbuf_entry!(Trace::Request {
            chip: chip.0,
            cmd: SBE_FIFO_CMD_GET_SCOM,
            addr
        });
        let request = GetScomRequest {
            header: RequestHeader::new::<GetScomRequest>(SBE_FIFO_CMD_GET_SCOM),
            addr: be::U64::new(addr),
        };
        self.write_request(chip, request.as_bytes())?;

        let mut data = [0u32; 2];
        self.read_response(chip, &mut data)?;
        Ok((u64::from(data[0]) << 32) | u64::from(data[1]))
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        ringbuf_entry!(Trace::Request {
            chip: chip.0,
            cmd: SBE_FIFO_CMD_PUT_SCOM,
            addr
        });
        let request = PutScomRequest {
            header: RequestHeader::new::<PutScomRequest>(SBE_FIFO_CMD_PUT_SCOM),
            addr: be::U64::new(addr),
            data: be::U64::new(data),
        };
        self.write_request(chip, request.as_bytes())?;
        self.read_response(chip, &mut [])
    }
}
