// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-Boot Engine interfaces
//!
//! The SBE is reachable two ways from the boot firmware:
//!
//! - through its FIFO over FSI ([`fifo`]), which is how SCOM registers of a
//!   secondary chip are reached before XSCOM to that chip is set up, and
//! - through the PSU mailbox registers on the PIB ([`psu`]), which is how
//!   ring images are requested.

#![cfg_attr(target_os = "none", no_std)]

pub mod fifo;
pub mod fsi;
pub mod psu;

#[cfg(not(target_os = "none"))]
mod fakes;
#[cfg(not(target_os = "none"))]
pub use fakes::{FakeSbe, SbeFault};

pub use fifo::SbeFifo;
pub use fsi::{cfam_addr_to_fsi, reset_pib2opb, Fsi, OpbFsi};
pub use psu::{MailboxError, PsuMailbox, PutRingRequest, RingId};
