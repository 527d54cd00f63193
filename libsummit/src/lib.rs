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

//! libsummit implements the three processes that make up summit: the
//! mux state machine, the server dispatcher, and the client relay,
//! plus the ambient pieces (config, cleanup registry, tty handling,
//! signals) they all share.

use std::{fs, io, sync::Mutex};

use tracing_subscriber::fmt::format::FmtSpan;

pub mod cleanup;
pub mod client;
pub mod config;
pub mod consts;
pub mod mux;
pub mod pty;
pub mod routing;
pub mod server;
pub mod signals;
#[cfg(feature = "test_hooks")]
pub mod test_hooks;
#[cfg(not(feature = "test_hooks"))]
mod test_hooks;
pub mod tty;

/// Verbosity shared by all three binaries; each one's own `clap::Args`
/// embeds this and calls [`init_logging`] before doing anything else.
pub fn init_logging(verbose: u8, log_file: &Option<String>) {
    let trace_level = if verbose == 0 {
        tracing::Level::INFO
    } else if verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(trace_level)
        .with_thread_ids(true)
        .with_target(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    match log_file {
        Some(path) => match fs::File::create(path) {
            Ok(file) => builder.with_writer(Mutex::new(file)).init(),
            Err(e) => eprintln!("summit: failed to open log file {path}: {e}"),
        },
        // The interactive client's stderr is the user's terminal, so it
        // defaults to stderr too; callers that truly want silence can
        // redirect the fd themselves.
        None => builder.with_writer(io::stderr).init(),
    }

    #[cfg(feature = "test_hooks")]
    if let Ok(test_hook_sock) = std::env::var("SUMMIT_TEST_HOOK_SOCKET_PATH") {
        tracing::info!("spawning test hook sock at {}", test_hook_sock);
        test_hooks::TEST_HOOK_SERVER.set_socket_path(test_hook_sock);
        std::thread::spawn(|| {
            test_hooks::TEST_HOOK_SERVER.start();
        });
    }
}
