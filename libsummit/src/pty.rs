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

//! A thin wrapper around `shpool_pty` exposing exactly the PTY surface
//! §6 names as an external collaborator: `Start(argv, env, cwd) -> fd`,
//! `Setsize(fd, Size)`, `GetsizeFull(fd) -> Size`.

use std::{process, sync::Arc, thread};

use anyhow::{anyhow, Context};
use shpool_pty::fork::Master;
use summit_protocol::Size;
use tracing::{info, instrument, span, Level};

use crate::{consts, mux::exit_notify::ExitNotifier};

/// A started child process attached to a fresh PTY.
pub struct Pty {
    fork: shpool_pty::fork::Fork,
    child_pid: libc::pid_t,
    pub exit_notifier: Arc<ExitNotifier>,
}

impl Pty {
    /// Fork a child running `argv[0] argv[1..]` with exactly the given
    /// environment (no inheritance: callers pass whatever combination
    /// of `run`'s `env` list and `config::Config::env` they want),
    /// optionally in `cwd`, attached to a fresh PTY.
    #[instrument(skip_all, fields(argv0 = argv.first().map(String::as_str).unwrap_or("")))]
    pub fn start(argv: &[String], env: &[(String, String)], cwd: Option<&str>) -> anyhow::Result<Pty> {
        if argv.is_empty() {
            return Err(anyhow!("no command to run"));
        }

        let mut cmd = process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(process::Stdio::inherit())
            .stdout(process::Stdio::inherit())
            .stderr(process::Stdio::inherit())
            .env_clear()
            .envs(env.iter().cloned());

        let mut fork = shpool_pty::fork::Fork::from_ptmx().context("forking pty")?;
        if fork.is_child().is_ok() {
            use std::os::unix::process::CommandExt as _;

            for fd in consts::STDERR_FD + 1..(nix::unistd::SysconfVar::OPEN_MAX as i32) {
                let _ = nix::unistd::close(fd);
            }
            let err = cmd.exec();
            eprintln!("summit: exec error: {err:?}");
            std::process::exit(1);
        }

        let child_pid = fork.child_pid().ok_or_else(|| anyhow!("missing child pid"))?;
        let exit_notifier = Arc::new(ExitNotifier::new());
        spawn_child_watcher(child_pid, Arc::clone(&exit_notifier));

        Ok(Pty { fork, child_pid, exit_notifier })
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child_pid
    }

    /// A cheap, `Copy` handle to the PTY master side, usable from any
    /// thread for reads/writes/ioctls.
    pub fn master(&self) -> anyhow::Result<Master> {
        self.fork.is_parent().context("internal error: executing in child fork")
    }

    pub fn set_size(&self, size: &Size) -> anyhow::Result<()> {
        let master = self.master()?;
        let fd = master.raw_fd().ok_or_else(|| anyhow!("no master fd"))?;
        crate::tty::set_fd(size, fd)
    }

    pub fn get_size_full(&self) -> anyhow::Result<Size> {
        let master = self.master()?;
        let fd = master.raw_fd().ok_or_else(|| anyhow!("no master fd"))?;
        crate::tty::size_from_fd(fd)
    }
}

fn spawn_child_watcher(pid: libc::pid_t, notifier: Arc<ExitNotifier>) {
    thread::spawn(move || {
        let _s = span!(Level::INFO, "pty_child_watcher", pid).entered();
        let mut status: libc::c_int = 0;
        loop {
            // Safety: basic ffi; pid is valid until this returns.
            unsafe {
                match libc::waitpid(pid, &mut status, 0) {
                    0 => continue,
                    -1 => {
                        notifier.notify_exit(1);
                        return;
                    }
                    _ => break,
                }
            }
        }
        let code = unsafe {
            if libc::WIFEXITED(status) {
                libc::WEXITSTATUS(status)
            } else {
                // killed by signal, or some other non-exit termination; 1 is
                // the fallback exit code per §7's PTY-start-failure taxonomy.
                1
            }
        };
        info!("child exited with status {}", code);
        notifier.notify_exit(code);
    });
}
