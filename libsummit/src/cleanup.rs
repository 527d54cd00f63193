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

//! A process-wide, LIFO at-exit registry.
//!
//! §5 requires that every registered cleanup function (restore
//! terminal, close sockets, stop signal notifications, remove the
//! socket file) run in LIFO order on exit, including abnormal exits
//! routed through [`die`]. Individual guard types (e.g.
//! `tty::AttachFlagsGuard`) still restore their own resource on
//! `Drop`, but also register themselves here so a `die()` called from
//! any thread still unwinds them.

use std::sync::Mutex;

use lazy_static::lazy_static;
use tracing::error;

type CleanupFn = Box<dyn FnOnce() + Send>;

lazy_static! {
    static ref REGISTRY: Mutex<Vec<CleanupFn>> = Mutex::new(Vec::new());
}

/// Register a cleanup closure to run, in LIFO order relative to other
/// registrations, when [`run_all`] or [`die`] is called.
pub fn register<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    REGISTRY.lock().unwrap().push(Box::new(f));
}

/// Run every registered cleanup function, most-recently-registered
/// first, then clear the registry. Safe to call more than once.
pub fn run_all() {
    let mut funcs = REGISTRY.lock().unwrap();
    while let Some(f) = funcs.pop() {
        f();
    }
}

/// Print `msg` to stderr, run every registered cleanup function in
/// LIFO order, then exit the process with status 1. This is the
/// "centralized Die path" of §5 / §7's fatal-startup-error handling.
pub fn die(msg: impl AsRef<str>) -> ! {
    error!("{}", msg.as_ref());
    eprintln!("summit: {}", msg.as_ref());
    run_all();
    std::process::exit(1);
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[test]
    fn runs_in_lifo_order() {
        // Since REGISTRY is process-global and shared across tests, drain
        // it first so earlier tests don't leak closures into this one.
        run_all();

        let order = Arc::new(StdMutex::new(Vec::new()));

        let o1 = order.clone();
        register(move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        register(move || o2.lock().unwrap().push(2));
        let o3 = order.clone();
        register(move || o3.lock().unwrap().push(3));

        run_all();

        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }
}
