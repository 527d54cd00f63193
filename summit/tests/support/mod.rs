// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{
    env,
    io::{self, BufRead, Write},
    os::unix::{io::AsRawFd, net::UnixStream},
    path::{Path, PathBuf},
    process::{self, Command, Stdio},
    time,
};

use anyhow::{anyhow, Context};
use tempfile::TempDir;

mod events;
pub use events::Events;

pub fn cargo_dir() -> PathBuf {
    env::var_os("CARGO_BIN_PATH")
        .map(PathBuf::from)
        .or_else(|| {
            env::current_exe().ok().map(|mut path| {
                path.pop();
                if path.ends_with("deps") {
                    path.pop();
                }
                path
            })
        })
        .unwrap_or_else(|| panic!("CARGO_BIN_PATH wasn't set. Cannot continue running test"))
}

pub fn server_bin() -> PathBuf {
    cargo_dir().join("summit-server")
}

pub fn client_bin() -> PathBuf {
    cargo_dir().join("summit-client")
}

pub fn mux_bin() -> PathBuf {
    cargo_dir().join("summit-mux")
}

/// ServerProc is a helper handle for a `summit-server` subprocess. It
/// kills the subprocess (and its mux child, transitively) when it goes
/// out of scope.
pub struct ServerProc {
    proc: process::Child,
    tmp_dir: Option<TempDir>,
    subproc_counter: usize,
    pub events: Option<Events>,
    pub socket_path: PathBuf,
}

impl ServerProc {
    pub fn new() -> anyhow::Result<ServerProc> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("summit-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;
        let socket_path = tmp_dir.path().join("summit.socket");
        let test_hook_socket_path = tmp_dir.path().join("summit-server-test-hook.socket");
        let log_file = tmp_dir.path().join("server.log");

        let proc = Command::new(server_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("-v")
            .arg("--log-file")
            .arg(&log_file)
            .arg("--socket")
            .arg(&socket_path)
            .arg("--mux-path")
            .arg(mux_bin())
            .arg("--client-path")
            .arg(client_bin())
            .env("SUMMIT_TEST_HOOK_SOCKET_PATH", &test_hook_socket_path)
            .spawn()
            .context("spawning server process")?;

        let events = Events::new(&test_hook_socket_path)?;

        // spin until we can dial the socket successfully
        let mut sleep_dur = time::Duration::from_millis(5);
        for _ in 0..12 {
            if UnixStream::connect(&socket_path).is_ok() {
                break;
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }

        Ok(ServerProc {
            proc,
            tmp_dir: Some(tmp_dir),
            subproc_counter: 0,
            events: Some(events),
            socket_path,
        })
    }

    pub fn attach(&mut self, argv: &[&str]) -> anyhow::Result<AttachProc> {
        let tmp_dir = self.tmp_dir.as_ref().ok_or_else(|| anyhow!("missing tmp_dir"))?;
        let log_file = tmp_dir.path().join(format!("attach_{}.log", self.subproc_counter));
        self.subproc_counter += 1;

        let mut cmd = Command::new(client_bin());
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .arg("--log-file")
            .arg(&log_file)
            .arg("--socket")
            .arg(&self.socket_path);
        if !argv.is_empty() {
            cmd.arg("--").args(argv);
        }

        let proc = cmd.spawn().context("spawning attach proc")?;
        Ok(AttachProc { proc })
    }

    pub fn await_event(&mut self, event: &str) -> anyhow::Result<()> {
        match &mut self.events {
            Some(events) => events.await_event(event),
            None => Err(anyhow!("no events stream")),
        }
    }
}

impl std::ops::Drop for ServerProc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing server proc: {:?}", e);
        }
        if env::var("SUMMIT_LEAVE_TEST_LOGS").unwrap_or_default() == "true" {
            self.tmp_dir.take().map(|d| d.keep());
        }
    }
}

/// AttachProc is a handle for a `summit-client` subprocess spawned for
/// testing.
pub struct AttachProc {
    proc: process::Child,
}

const CMD_READ_TIMEOUT: time::Duration = time::Duration::from_secs(3);
const CMD_READ_SLEEP_DUR: time::Duration = time::Duration::from_millis(20);

impl AttachProc {
    pub fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        let stdin = self.proc.stdin.as_mut().ok_or_else(|| anyhow!("missing stdin"))?;
        let full_line = format!("{}\n", line);
        stdin.write_all(full_line.as_bytes()).context("writing line into attach proc")?;
        stdin.flush().context("flushing line")?;
        Ok(())
    }

    /// Create a handle for asserting about output lines.
    pub fn line_matcher(&mut self) -> anyhow::Result<LineMatcher> {
        let r = self.proc.stdout.take().ok_or_else(|| anyhow!("missing stdout"))?;

        nix::fcntl::fcntl(r.as_raw_fd(), nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK))
            .context("setting stdout nonblocking")?;

        let lines = io::BufReader::new(r).lines();
        Ok(LineMatcher { out_lines: lines })
    }

    pub fn wait(&mut self) -> anyhow::Result<i32> {
        let status = self.proc.wait().context("waiting on attach proc")?;
        Ok(status.code().unwrap_or(-1))
    }
}

pub struct LineMatcher {
    out_lines: io::Lines<io::BufReader<process::ChildStdout>>,
}

impl LineMatcher {
    pub fn match_re(&mut self, re: &str) -> anyhow::Result<()> {
        let start = time::Instant::now();
        loop {
            let line = self.out_lines.next().ok_or_else(|| anyhow!("no line"))?;
            if let Err(e) = &line {
                if e.kind() == io::ErrorKind::WouldBlock {
                    if start.elapsed() > CMD_READ_TIMEOUT {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out reading line"))?;
                    }
                    std::thread::sleep(CMD_READ_SLEEP_DUR);
                    continue;
                }
            }
            let line = line?;

            eprintln!("testing /{}/ against '{}'", re, &line);
            return if regex::Regex::new(re)?.is_match(&line) {
                Ok(())
            } else {
                Err(anyhow!("expected /{}/ to match '{}'", re, &line))
            };
        }
    }
}

impl std::ops::Drop for AttachProc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing attach proc: {:?}", e);
        }
    }
}

pub fn testdata_file<P: AsRef<Path>>(file: P) -> PathBuf {
    let mut dir = cargo_dir();
    dir.pop();
    dir.pop();
    dir.join("tests").join("data").join(file)
}
