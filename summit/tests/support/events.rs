use std::{
    io::{self, BufRead},
    os::unix::net::UnixStream,
    path::Path,
    time,
};

use anyhow::{anyhow, Context};

/// Events represents a stream of test-hook events emitted by a server
/// or mux process over its `SUMMIT_TEST_HOOK_SOCKET_PATH` socket.
pub struct Events {
    lines: io::Lines<io::BufReader<UnixStream>>,
}

impl Events {
    pub fn new<P: AsRef<Path>>(sock: P) -> anyhow::Result<Self> {
        let mut sleep_dur = time::Duration::from_millis(5);
        for _ in 0..12 {
            if let Ok(s) = UnixStream::connect(&sock) {
                return Ok(Events { lines: io::BufReader::new(s).lines() });
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }

        Err(anyhow!("timed out waiting for connection to event sock"))
    }

    /// Block until `event` shows up on the stream.
    pub fn await_event(&mut self, event: &str) -> anyhow::Result<()> {
        for line in &mut self.lines {
            let line = line.context("reading test hook event")?;
            if line == event {
                return Ok(());
            }
        }
        Err(anyhow!("event stream closed before '{}' arrived", event))
    }
}
