// Copyright 2026 Summit contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide signal handling. SIGWINCH forwarding is client-specific
//! (see `client::spawn_sigwinch_handler`); this module is the shared
//! double-tap SIGTERM/SIGINT handler used by the server and mux, which
//! runs the [`cleanup`](crate::cleanup) registry before exiting.

use std::sync::{atomic::AtomicBool, Arc};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag, iterator::Signals};
use tracing::info;

use crate::cleanup;

pub struct Handler;

impl Handler {
    pub fn new() -> Self {
        Handler
    }

    /// Spawn the signal-handler thread (§5 "1 signal-handler goroutine").
    /// A single term signal runs the cleanup registry and exits 0; a
    /// second one before the first finishes exits 1 immediately.
    pub fn spawn(self) -> anyhow::Result<()> {
        info!("spawning signal handler thread");

        let term_now = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            flag::register_conditional_shutdown(*sig, 1, Arc::clone(&term_now))?;
            flag::register(*sig, Arc::clone(&term_now))?;
        }

        let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;
        std::thread::spawn(move || {
            #[allow(clippy::never_loop)]
            for signal in &mut signals {
                assert!(TERM_SIGNALS.contains(&signal));
                info!("term signal received, running cleanup");
                cleanup::run_all();
                std::process::exit(0);
            }
        });

        Ok(())
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}
