// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_p9_scom_api::{Chip, Scom, ScomError};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Read { chip: u8, addr: u64, value: u64 },
    Write { chip: u8, addr: u64, data: u64 },
    Failed { chip: u8, addr: u64, err: ScomError },
}

ringbuf!(SCOM_TRACE, Trace, 64, Trace::None);

/// Records every access made through `S` in a ring buffer.
pub struct Traced<S: Scom>(pub S);

impl<S: Scom> Scom for Traced<S> {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        match self.0.read(chip, addr) {
            Ok(value) => {
                ringbuf_entry!(
                    SCOM_TRACE,
                    Trace::Read {
                        chip: chip.0,
                        addr,
                        value
                    }
                );
                Ok(value)
            }
            Err(err) => {
                ringbuf_entry!(
                    SCOM_TRACE,
                    Trace::Failed {
                        chip: chip.0,
                        addr,
                        err
                    }
                );
                Err(err)
            }
        }
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        ringbuf_entry!(
            SCOM_TRACE,
            Trace::Write {
                chip: chip.0,
                addr,
                data
            }
        );
        self.0.write(chip, addr, data).inspect_err(|&err| {
            ringbuf_entry!(
                SCOM_TRACE,
                Trace::Failed {
                    chip: chip.0,
                    addr,
                    err
                }
            );
        })
    }

    fn switch_secondary_to_xscom(&mut self) {
        self.0.switch_secondary_to_xscom();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_p9_scom_api::FakeScom;

    #[test]
    fn accesses_are_recorded() {
        let mut scom = FakeScom::new();
        scom.set(Chip(1), 0x0501_0811, 0x77);
        let mut traced = Traced(&mut scom);

        traced.or(Chip(1), 0x0501_0811, 0x08).unwrap();

        let ring = SCOM_TRACE.lock();
        let tail: Vec<Trace> = ring
            .iter()
            .map(|e| e.payload)
            .filter(|p| {
                matches!(p, Trace::Read { chip: 1, .. } | Trace::Write { chip: 1, .. })
            })
            .collect();
        assert_eq!(
            tail,
            [
                Trace::Read {
                    chip: 1,
                    addr: 0x0501_0811,
                    value: 0x77
                },
                Trace::Write {
                    chip: 1,
                    addr: 0x0501_0811,
                    data: 0x7F
                },
            ]
        );
        drop(ring);

        assert_eq!(scom.get(Chip(1), 0x0501_0811), 0x7F);
    }
}
