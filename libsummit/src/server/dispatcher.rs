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

//! The dispatcher half of §4.5: demultiplexes one mux child's stdout
//! across the windows (client connections) that mux's `term` ids name.

use std::{
    collections::HashMap,
    io::{Read, Write},
    os::unix::net::UnixStream,
    process::{ChildStdin, ChildStdout},
    thread,
    time::Duration,
};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use summit_protocol::{Lexer, Message};
use tracing::{info, warn};

use super::{terminal, ResolvedPaths};
use crate::{consts, mux::exit_notify::ExitNotifier};

pub fn run(
    paths: &ResolvedPaths,
    mux_stdin: ChildStdin,
    mux_stdout: ChildStdout,
    new_conns: &Receiver<UnixStream>,
    exit_notifier: &ExitNotifier,
) -> anyhow::Result<()> {
    let (mux_in_tx, mux_in_rx) = unbounded::<Vec<u8>>();
    spawn_mux_stdin_writer(mux_stdin, mux_in_rx);

    let (mux_out_tx, mux_out_rx) = unbounded::<Message>();
    spawn_mux_stdout_lexer(mux_stdout, mux_out_tx);

    let mut windows: HashMap<String, Sender<Message>> = HashMap::new();
    let mut current: Option<String> = None;
    let mut counter: u64 = 1;

    loop {
        select! {
            recv(mux_out_rx) -> msg => {
                match msg {
                    Ok(m) => dispatch(m, &mut windows, &mut current),
                    Err(_) => return Ok(()), // mux's stdout closed: child exited
                }
            }
            recv(new_conns) -> conn => {
                if let Ok(stream) = conn {
                    let id = counter.to_string();
                    counter += 1;
                    let (tx, rx) = unbounded();
                    windows.insert(id.clone(), tx);
                    info!("window {} connected", id);
                    crate::test_hooks::emit("dispatcher-window-create");
                    terminal::spawn(id, stream, rx, mux_in_tx.clone(), paths);
                }
            }
            default(consts::JOIN_POLL_DURATION) => {
                if exit_notifier.wait(Some(Duration::from_millis(0))).is_some() {
                    return Ok(());
                }
            }
        }
    }
}

fn dispatch(msg: Message, windows: &mut HashMap<String, Sender<Message>>, current: &mut Option<String>) {
    if let Message::Command(cmd) = &msg {
        match cmd.cmd() {
            "log" => {
                if let Some(text) = cmd.log_text() {
                    eprintln!("mux: {text}");
                }
                return;
            }
            "term" => {
                *current = cmd.term_id().map(str::to_string);
                return;
            }
            _ => {}
        }
    }

    let Some(id) = current.clone() else {
        warn!("dropping message with no window selected");
        return;
    };
    match windows.get(&id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => warn!("message addressed at unknown window {}", id),
    }
}

fn spawn_mux_stdin_writer(mut mux_stdin: ChildStdin, rx: Receiver<Vec<u8>>) {
    thread::Builder::new()
        .name("mux-stdin-writer".to_string())
        .spawn(move || {
            for bytes in rx.iter() {
                if mux_stdin.write_all(&bytes).is_err() {
                    return;
                }
                let _ = mux_stdin.flush();
            }
        })
        .expect("spawning mux stdin writer");
}

fn spawn_mux_stdout_lexer(mut mux_stdout: ChildStdout, out: Sender<Message>) {
    thread::Builder::new()
        .name("mux-stdout-lexer".to_string())
        .spawn(move || {
            let mut lexer = Lexer::new();
            let mut buf = vec![0u8; consts::BUF_SIZE];
            loop {
                let n = match mux_stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                };
                lexer.scan(&buf[..n]);
                while let Some(msg) = lexer.chunk() {
                    if out.send(msg).is_err() {
                        return;
                    }
                }
            }
        })
        .expect("spawning mux stdout lexer");
}
