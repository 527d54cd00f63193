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

//! The terminal routine half of §4.5: owns one client socket and its
//! mailbox, running routing buffers in both directions.

use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    process,
    thread,
};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use summit_protocol::{Command, Lexer, Message};
use tracing::{info, instrument, warn};

use super::ResolvedPaths;
use crate::{consts, routing::RoutingBuffer};

/// Spawn the reader/writer/routine trio that make up one window's
/// terminal routine, and return immediately; everything runs on its
/// own threads.
pub fn spawn(
    window_id: String,
    stream: UnixStream,
    mailbox: Receiver<Message>,
    mux_in: Sender<Vec<u8>>,
    paths: &ResolvedPaths,
) {
    let client_path = paths.client.clone();
    let terminal_path = paths.terminal.clone();
    let reader_stream = stream.try_clone().expect("cloning client socket for reader");
    let writer_stream = stream.try_clone().expect("cloning client socket for writer");

    let (from_client_tx, from_client_rx) = unbounded::<Message>();
    let (to_client_tx, to_client_rx) = unbounded::<Message>();

    spawn_client_reader(reader_stream, from_client_tx);
    spawn_client_writer(writer_stream, to_client_rx);

    let id = window_id.clone();
    thread::Builder::new()
        .name(format!("terminal-routine({id})"))
        .spawn(move || {
            routine(window_id, from_client_rx, mailbox, mux_in, to_client_tx, client_path, terminal_path)
        })
        .expect("spawning terminal routine");
}

fn spawn_client_reader(mut stream: UnixStream, out: Sender<Message>) {
    thread::spawn(move || {
        let mut lexer = Lexer::new();
        let mut buf = vec![0u8; consts::BUF_SIZE];
        loop {
            let n = match stream.read(&mut buf) {
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
    });
}

fn spawn_client_writer(mut stream: UnixStream, rx: Receiver<Message>) {
    thread::spawn(move || {
        for msg in rx.iter() {
            if stream.write_all(&msg.to_wire()).is_err() {
                return;
            }
            let _ = stream.flush();
        }
    });
}

#[instrument(skip_all, fields(window = %window_id))]
#[allow(clippy::too_many_arguments)]
fn routine(
    window_id: String,
    from_client: Receiver<Message>,
    from_mux: Receiver<Message>,
    mux_in: Sender<Vec<u8>>,
    to_client: Sender<Message>,
    client_path: String,
    terminal_path: String,
) {
    let mut outbound = RoutingBuffer::new(vec![Command::term(window_id.clone())]);
    let mut inbound = RoutingBuffer::new(vec![]);

    loop {
        select! {
            recv(from_client) -> msg => {
                let Ok(msg) = msg else { return };
                if outbound.buffered(&msg) {
                    continue;
                }
                for out in outbound.emit(msg) {
                    if mux_in.send(out.to_wire()).is_err() {
                        return;
                    }
                }
            }
            recv(from_mux) -> msg => {
                let Ok(msg) = msg else { return };
                if inbound.buffered(&msg) {
                    continue;
                }
                if let Message::Command(cmd) = &msg {
                    if cmd.is_run() {
                        spawn_new_window(&inbound, cmd, &client_path, &terminal_path);
                        continue;
                    }
                }
                for out in inbound.emit(msg) {
                    if to_client.send(out).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// A `run` observed flowing from mux to client names a session that
/// wants to become a top-level window of its own (e.g. a nested mux
/// started with `-n`). Launch a fresh terminal emulator + client pair
/// addressed at that session instead of forwarding the raw payload.
fn spawn_new_window(inbound: &RoutingBuffer, run: &Command, client_path: &str, terminal_path: &str) {
    let path = routing_to_path(inbound.routing());
    let env = run.run_env().unwrap_or_default();
    let env_json = serde_json::to_string(
        &env.into_iter().collect::<std::collections::HashMap<_, _>>(),
    )
    .unwrap_or_else(|_| "{}".to_string());
    let argv = run.run_argv().unwrap_or_default();

    let mut cmd = process::Command::new(terminal_path);
    cmd.arg("-e").arg(client_path);
    if !path.is_empty() {
        cmd.arg("-p").arg(&path);
    }
    cmd.arg("-e").arg(&env_json).arg("--").args(&argv);

    match cmd.spawn() {
        Ok(_) => info!("spawned new window for nested run"),
        Err(e) => warn!("failed to spawn terminal emulator: {:?}", e),
    }
}

/// The address implied by a routing run, minus the trailing hop (per
/// §4.5): the `pty` ids after `term`, dash-joined, with the last one
/// dropped.
fn routing_to_path(routing: &[Command]) -> String {
    let mut hops: Vec<&str> = routing.iter().filter(|c| c.cmd() == "pty").filter_map(|c| c.pty_id()).collect();
    hops.pop();
    hops.join("-")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn routing_to_path_drops_trailing_hop() {
        let routing = vec![Command::term("w"), Command::pty("3"), Command::pty("7")];
        assert_eq!(routing_to_path(&routing), "3");
    }

    #[test]
    fn routing_to_path_empty_with_no_hops() {
        let routing = vec![Command::term("w")];
        assert_eq!(routing_to_path(&routing), "");
    }
}
