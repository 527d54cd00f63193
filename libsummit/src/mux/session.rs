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

//! A single mux session: the per-session state machine of spec §4.2.
//! Each session owns one child PTY and runs two pumps concurrently
//! (from-PTY and to-PTY) until the child exits.

use std::{io::Read, thread};

use crossbeam_channel::{Receiver, Sender};
use summit_protocol::{Command, Lexer, Message};
use tracing::{info, instrument, span, warn, Level};

use crate::{
    consts,
    mux::exit_notify::ExitNotifier,
    pty::Pty,
    routing::RoutingBuffer,
};

/// Posted to the mux main loop's status queue when a session's child
/// has exited (or failed to start at all).
pub struct SessionExit {
    pub id: String,
    pub term: Command,
    pub status: i32,
    pub is_self: bool,
}

/// Spawn and run a session to completion on the calling thread. Meant
/// to be called from inside its own `thread::spawn`; blocks until the
/// child exits.
///
/// `mailbox` carries the `term` and `run` startup messages (steps 1-2
/// of §4.2) followed by every subsequent routing/payload message
/// addressed into this session's subtree. `mux_out` is the shared
/// channel every session's from-PTY pump writes outbound `Message`s
/// to; the mux's stdout-writer task drains it.
#[instrument(skip_all, fields(id = %id))]
pub fn run(
    id: String,
    mailbox: Receiver<Message>,
    mux_out: Sender<Message>,
    status: Sender<SessionExit>,
    extra_env: Vec<(String, String)>,
) {
    let term = match recv_term(&mailbox) {
        Some(t) => t,
        None => return, // mailbox closed before the session ever started
    };

    run_with_term(id, term, &mailbox, mux_out, status, extra_env);
}

/// Like [`run`], but for the self-session (§4.3 "an optional self
/// session at id 0"): there is no upstream `term`/`run` handshake to
/// wait for, since this session is synthesized directly from local
/// argv/env rather than requested over the wire.
#[instrument(skip_all)]
pub fn run_self(
    argv: Vec<String>,
    env: Vec<(String, String)>,
    size: summit_protocol::Size,
    mailbox: Receiver<Message>,
    mux_out: Sender<Message>,
    status: Sender<SessionExit>,
) {
    let term = Command::term("");
    run_started(
        consts::SELF_SESSION_ID.to_string(),
        term,
        argv,
        env,
        size,
        &mailbox,
        mux_out,
        status,
        true,
    );
}

fn recv_term(mailbox: &Receiver<Message>) -> Option<Command> {
    loop {
        match mailbox.recv() {
            Ok(Message::Command(cmd)) if cmd.cmd() == "term" => return Some(cmd),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn recv_run(mailbox: &Receiver<Message>) -> Option<Command> {
    loop {
        match mailbox.recv() {
            Ok(Message::Command(cmd)) if cmd.is_run() => return Some(cmd),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn run_with_term(
    id: String,
    term: Command,
    mailbox: &Receiver<Message>,
    mux_out: Sender<Message>,
    status: Sender<SessionExit>,
    extra_env: Vec<(String, String)>,
) {
    let Some(run_cmd) = recv_run(mailbox) else { return };

    let argv = run_cmd.run_argv().unwrap_or_default();
    let mut env = extra_env;
    env.extend(run_cmd.run_env().unwrap_or_default());
    let size = run_cmd.run_size().unwrap_or_default();

    run_started(id, term, argv, env, size, mailbox, mux_out, status, false);
}

#[allow(clippy::too_many_arguments)]
fn run_started(
    id: String,
    term: Command,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    size: summit_protocol::Size,
    mailbox: &Receiver<Message>,
    mux_out: Sender<Message>,
    status: Sender<SessionExit>,
    is_self: bool,
) {
    // step 3: announce the new session's address to the outside world.
    let _ = mux_out.send(Message::Command(term.clone()));
    let _ = mux_out.send(Message::Command(Command::pty(id.clone())));
    let _ = mux_out.send(Message::Command(Command::started()));

    // step 4: fork the program on a fresh PTY.
    let pty = match Pty::start(&argv, &env, None) {
        Ok(p) => p,
        Err(e) => {
            warn!("pty start failed: {:?}", e);
            if !is_self {
                let _ = mux_out.send(Message::Command(term.clone()));
                let _ = mux_out.send(Message::Command(Command::pty(id.clone())));
                let _ = mux_out.send(Message::Command(Command::status(1)));
            }
            let _ = status.send(SessionExit { id, term, status: 1, is_self });
            return;
        }
    };

    // step 5: apply the initial size.
    if let Err(e) = pty.set_size(&size) {
        warn!("failed to set initial pty size: {:?}", e);
    }

    // step 6: run the pumps until the child exits.
    let exit_notifier = pty.exit_notifier.clone();
    let self_id = id.clone();
    let outbound_term = term.clone();
    thread::scope(|scope| {
        let from_pty = {
            let mux_out = mux_out.clone();
            let pty = &pty;
            let self_id = self_id.clone();
            let term = outbound_term.clone();
            thread::Builder::new()
                .name(format!("from-pty({self_id})"))
                .spawn_scoped(scope, move || from_pty_pump(pty, self_id, term, mux_out))
                .expect("spawning from-pty pump")
        };
        let to_pty = {
            let pty = &pty;
            let self_id = self_id.clone();
            let exit_notifier = &exit_notifier;
            thread::Builder::new()
                .name(format!("to-pty({self_id})"))
                .spawn_scoped(scope, move || to_pty_pump(pty, self_id, mailbox, exit_notifier))
                .expect("spawning to-pty pump")
        };

        // Wait for the child to exit, then let the pumps drain/observe
        // EOF on their own; join both before reporting status. to_pty_pump
        // polls exit_notifier itself (its mailbox otherwise never closes,
        // since the Sender lives in the mux's sessions map until this
        // session posts its SessionExit below), so it returns promptly
        // once the child is gone instead of blocking the scope forever.
        exit_notifier.wait(None);
        let _ = from_pty.join();
        let _ = to_pty.join();
    });

    let rv = exit_notifier.wait(Some(std::time::Duration::from_millis(0))).unwrap_or(1);
    // The self-session's status is emitted once, by the mux main loop,
    // as the final act of shutdown (§4.3) — not here.
    if !is_self {
        let _ = mux_out.send(Message::Command(outbound_term.clone()));
        let _ = mux_out.send(Message::Command(Command::pty(id.clone())));
        let _ = mux_out.send(Message::Command(Command::status(rv)));
    }
    let _ = status.send(SessionExit { id, term: outbound_term, status: rv, is_self });
}

/// Reads raw bytes from the PTY, lexes them, and forwards upstream
/// with the outbound routing buffer's prefix (`[term, pty(self_id)]`)
/// stamped on every payload.
fn from_pty_pump(pty: &Pty, self_id: String, term: Command, mux_out: Sender<Message>) {
    let _s = span!(Level::INFO, "from_pty", s = self_id).entered();
    let mut master = match pty.master() {
        Ok(m) => m,
        Err(e) => {
            warn!("no pty master: {:?}", e);
            return;
        }
    };

    let mut routing = RoutingBuffer::new(vec![term, Command::pty(self_id.clone())]);
    let mut lexer = Lexer::new();
    let mut buf = vec![0u8; consts::BUF_SIZE];

    loop {
        let n = match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        lexer.scan(&buf[..n]);
        while let Some(msg) = lexer.chunk() {
            if let Some(cmd) = msg_as_command_ref(&msg) {
                if cmd.is_log() {
                    let _ = mux_out.send(msg);
                    continue;
                }
            }
            if routing.buffered(&msg) {
                continue;
            }
            for out in routing.emit(msg) {
                if mux_out.send(out).is_err() {
                    return;
                }
            }
        }
    }
}

fn msg_as_command_ref(m: &Message) -> Option<&Command> {
    match m {
        Message::Command(c) => Some(c),
        _ => None,
    }
}

/// Reads messages from the session's mailbox and either applies them
/// to the PTY directly (payloads addressed at this session) or
/// forwards the whole prefix+payload into the PTY verbatim (payloads
/// addressed deeper, or `run`). The mailbox's `Sender` lives in the
/// mux's sessions map and isn't dropped until this session's exit has
/// been posted and handled, i.e. after this pump returns — so it can't
/// rely on the mailbox closing to know the child is gone. It polls
/// `exit_notifier` between receives instead, so it drains and returns
/// promptly once the child exits rather than blocking forever.
fn to_pty_pump(pty: &Pty, self_id: String, mailbox: &Receiver<Message>, exit_notifier: &ExitNotifier) {
    let _s = span!(Level::INFO, "to_pty", s = self_id).entered();
    let mut master = match pty.master() {
        Ok(m) => m,
        Err(e) => {
            warn!("no pty master: {:?}", e);
            return;
        }
    };

    let mut routing = RoutingBuffer::new(vec![]);

    loop {
        let msg = match mailbox.recv_timeout(consts::JOIN_POLL_DURATION) {
            Ok(msg) => msg,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if exit_notifier.wait(Some(std::time::Duration::from_millis(0))).is_some() {
                    return;
                }
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };

        if routing.buffered(&msg) {
            continue;
        }

        let run = routing.routing().to_vec();
        let addressed_at_self = run.len() == 1 && run[0].cmd() == "term";
        let is_run = matches!(&msg, Message::Command(c) if c.is_run());

        if addressed_at_self && !is_run {
            if let Message::Command(cmd) = &msg {
                if cmd.cmd() == "ts" {
                    if let Some(size) = cmd.ts_size() {
                        if let Err(e) = pty.set_size(&size) {
                            warn!("failed to apply resize: {:?}", e);
                        }
                    }
                    continue;
                }
            }
            if let Err(e) = write_all(&mut master, &msg.to_wire()) {
                info!("pty write failed, assuming session closed: {:?}", e);
                return;
            }
        } else {
            for out in routing.emit(msg) {
                if write_all(&mut master, &out.to_wire()).is_err() {
                    return;
                }
            }
        }
    }
}

fn write_all(w: &mut impl std::io::Write, bytes: &[u8]) -> std::io::Result<()> {
    w.write_all(bytes)
}
