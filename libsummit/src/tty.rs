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

use std::{
    io,
    os::unix::io::{AsRawFd, RawFd},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use nix::{
    sys::{
        termios,
        termios::{ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg},
    },
    unistd::isatty,
};
use summit_protocol::Size as WireSize;
use tracing::error;

use crate::cleanup;

// see `man ioctl_tty` for info on these ioctl commands
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

/// Wraps `summit_protocol::Size` with fd-facing helpers. Kept as a
/// thin alias rather than a separate type so the `ts`/`run` wire
/// payload and the PTY ioctl value are always the same shape.
pub type Size = WireSize;

/// from_fd returns the terminal size for the given terminal.
pub fn size_from_fd(fd: RawFd) -> anyhow::Result<Size> {
    let mut term_size = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };

    // Safety: term_size is stack allocated and lives for the whole call.
    unsafe {
        tiocgwinsz(fd, &mut term_size).context("fetching term size")?;
    }

    Ok(Size { rows: term_size.ws_row, cols: term_size.ws_col, x: term_size.ws_xpixel, y: term_size.ws_ypixel })
}

/// set_fd sets the tty indicated by the given file descriptor to have
/// this size.
pub fn set_fd(size: &Size, fd: RawFd) -> anyhow::Result<()> {
    let term_size =
        libc::winsize { ws_row: size.rows, ws_col: size.cols, ws_xpixel: size.x, ws_ypixel: size.y };

    unsafe {
        tiocswinsz(fd, &term_size).context("setting term size")?;
    }

    Ok(())
}

pub fn disable_echo(fd: RawFd) -> anyhow::Result<()> {
    let mut term = termios::tcgetattr(fd).context("grabbing term flags")?;
    term.local_flags &= !LocalFlags::ECHO;

    termios::tcsetattr(fd, SetArg::TCSANOW, &term)?;

    Ok(())
}

/// Put local stdin into raw mode, remembering how to restore it. The
/// restore also runs via the process-wide cleanup registry, so an
/// abnormal exit anywhere in the process still un-raws the terminal.
pub fn set_attach_flags() -> anyhow::Result<AttachFlagsGuard> {
    let fd = 0;

    if !isatty(io::stdin().as_raw_fd())?
        || !isatty(io::stdout().as_raw_fd())?
        || !isatty(io::stderr().as_raw_fd())?
    {
        // We are not attached to a terminal, so don't futz with its flags.
        return Ok(AttachFlagsGuard { fd, old: None });
    }

    // grab settings from the stdin terminal
    let old = termios::tcgetattr(fd).context("grabbing term flags")?;

    // Set the input terminal to raw mode so we immediately get the input
    // chars; the pty on the other end applies its own line discipline.
    let mut new = old.clone();
    new.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IXON);
    new.output_flags &= !OutputFlags::OPOST;
    new.local_flags &= !(LocalFlags::ECHO
        | LocalFlags::ECHONL
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);
    new.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
    new.control_flags |= ControlFlags::CS8;
    termios::tcsetattr(fd, SetArg::TCSANOW, &new)?;

    let restored = Arc::new(Mutex::new(false));
    {
        let restored = restored.clone();
        let old = old.clone();
        cleanup::register(move || restore(fd, &old, &restored));
    }

    Ok(AttachFlagsGuard { fd, old: Some(old), restored })
}

fn restore(fd: RawFd, old: &termios::Termios, restored: &Mutex<bool>) {
    let mut done = restored.lock().unwrap();
    if *done {
        return;
    }
    if let Err(e) = termios::tcsetattr(fd, SetArg::TCSANOW, old) {
        error!("error restoring terminal settings: {:?}", e);
    }
    *done = true;
}

pub struct AttachFlagsGuard {
    fd: RawFd,
    old: Option<termios::Termios>,
    restored: Arc<Mutex<bool>>,
}

impl std::ops::Drop for AttachFlagsGuard {
    fn drop(&mut self) {
        if let Some(old) = &self.old {
            restore(self.fd, old, &self.restored);
        }
    }
}
