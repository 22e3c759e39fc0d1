// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::SmtControl;

/// Records what the second thread was asked to do. Stopping the thread
/// unwinds with a panic, so a host thread standing in for it ends there.
#[derive(Debug, Default)]
pub struct FakeSmt {
    reset_vector_installed: bool,
}

impl FakeSmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_vector_installed(&self) -> bool {
        self.reset_vector_installed
    }
}

impl SmtControl for FakeSmt {
    fn install_reset_vector(&mut self) {
        self.reset_vector_installed = true;
    }

    fn stop_with_state_loss(&mut self) -> ! {
        panic!("second thread entered stop 15");
    }
}
