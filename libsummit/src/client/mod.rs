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

//! The client (§4.6): a thin relay between the local terminal and a
//! server-side window, with a tiny state machine for knowing when the
//! user's command tree has fully exited.

use std::{
    collections::HashMap,
    env,
    io::{self, Read, Write},
    os::unix::{io::AsRawFd, net::UnixStream},
    thread,
};

use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use signal_hook::{consts::SIGWINCH, iterator::Signals};
use summit_protocol::{Command, Lexer, Message};
use tracing::warn;

use crate::{consts, routing::RoutingBuffer, tty};

#[derive(Parser, Debug)]
#[clap(author, about = "A thin relay between the local terminal and a summit window")]
pub struct Args {
    #[clap(short, long, help = "dash-separated pty hops addressing an existing session")]
    pub path: Option<String>,

    #[clap(short, long, help = "a JSON object of environment variables for the new session")]
    pub env: Option<String>,

    #[clap(short, long, action, help = "the unix socket to connect to")]
    pub socket: Option<String>,

    #[clap(long, action, help = "the file to write logs to")]
    pub log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "show more in logs, may be repeated")]
    pub verbose: u8,

    #[clap(trailing_var_arg = true, help = "the program (and args) to run; defaults to $SHELL")]
    pub argv: Vec<String>,
}

pub fn run(args: Args) -> ! {
    match run_inner(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("summit-client: {e:?}");
            std::process::exit(1);
        }
    }
}

fn run_inner(args: Args) -> anyhow::Result<i32> {
    crate::init_logging(args.verbose, &args.log_file);
    crate::signals::Handler::new().spawn()?;

    let socket_path = args
        .socket
        .clone()
        .or_else(|| env::var(consts::SOCKET_ENV_VAR).ok())
        .unwrap_or_else(|| consts::DEFAULT_SOCKET_PATH.to_string());

    let _raw_guard = tty::set_attach_flags()?;
    let mut stream = UnixStream::connect(&socket_path)?;

    for hop in args.path.as_deref().unwrap_or("").split('-').filter(|s| !s.is_empty()) {
        stream.write_all(&Message::Command(Command::pty(hop)).to_wire())?;
    }

    let argv = if !args.argv.is_empty() {
        args.argv.clone()
    } else {
        vec![env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
    };
    let env_pairs = match &args.env {
        Some(json) => {
            let map: HashMap<String, String> = serde_json::from_str(json)?;
            map.into_iter().collect()
        }
        None => env::vars().collect(),
    };
    let initial_size = tty::size_from_fd(io::stdin().as_raw_fd()).unwrap_or_default();
    stream.write_all(&Message::Command(Command::run(argv, env_pairs, initial_size)).to_wire())?;

    let (from_term_tx, from_term_rx) = unbounded::<Message>();
    spawn_stdin_lexer(from_term_tx.clone());
    spawn_sigwinch_handler(from_term_tx);

    let (from_server_tx, from_server_rx) = unbounded::<Message>();
    let reader_stream = stream.try_clone()?;
    spawn_server_reader(reader_stream, from_server_tx);

    main_loop(stream, from_term_rx, from_server_rx)
}

fn spawn_stdin_lexer(out: Sender<Message>) {
    thread::Builder::new()
        .name("client-stdin-lexer".to_string())
        .spawn(move || {
            let mut lexer = Lexer::new();
            let mut buf = vec![0u8; consts::BUF_SIZE];
            let mut stdin = io::stdin();
            loop {
                let n = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
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
        .expect("spawning client stdin lexer");
}

/// Forwards a synthetic `ts` Message onto the same channel stdin bytes
/// flow through, so resizes interleave with typed input rather than
/// racing with output (§4.6 step 5).
fn spawn_sigwinch_handler(out: Sender<Message>) {
    thread::Builder::new()
        .name("client-sigwinch".to_string())
        .spawn(move || {
            let Ok(mut signals) = Signals::new([SIGWINCH]) else {
                warn!("failed to register SIGWINCH handler");
                return;
            };
            for _ in signals.forever() {
                if let Ok(size) = tty::size_from_fd(io::stdin().as_raw_fd()) {
                    if out.send(Message::Command(Command::ts(size))).is_err() {
                        return;
                    }
                }
            }
        })
        .expect("spawning sigwinch handler");
}

fn spawn_server_reader(mut stream: UnixStream, out: Sender<Message>) {
    thread::Builder::new()
        .name("client-server-reader".to_string())
        .spawn(move || {
            let mut lexer = Lexer::new();
            let mut buf = vec![0u8; consts::BUF_SIZE];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
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
        .expect("spawning client server-reader");
}

fn main_loop(
    mut stream: UnixStream,
    from_term: Receiver<Message>,
    from_server: Receiver<Message>,
) -> anyhow::Result<i32> {
    let mut outbound = RoutingBuffer::new(vec![]);
    let mut inbound = RoutingBuffer::new(vec![]);

    let mut muxing: i32 = 0;
    let mut newline = true;
    let mut last_status = 0;
    let mut stdout = io::stdout();

    loop {
        select! {
            recv(from_term) -> msg => {
                let Ok(msg) = msg else { break };
                if outbound.buffered(&msg) {
                    continue;
                }
                for out in outbound.emit(msg) {
                    if stream.write_all(&out.to_wire()).is_err() {
                        break;
                    }
                }
                let _ = stream.flush();
            }
            recv(from_server) -> msg => {
                let Ok(msg) = msg else { break };
                if inbound.buffered(&msg) {
                    continue;
                }
                match &msg {
                    Message::Command(cmd) if cmd.cmd() == "started" => {
                        muxing += 1;
                        if let Ok(size) = tty::size_from_fd(io::stdin().as_raw_fd()) {
                            let resend = Message::Command(Command::ts(size));
                            if !outbound.buffered(&resend) {
                                for out in outbound.emit(resend) {
                                    let _ = stream.write_all(&out.to_wire());
                                }
                            }
                        }
                    }
                    Message::Command(cmd) if cmd.is_status() => {
                        muxing -= 1;
                        last_status = cmd.status_code().unwrap_or(1);
                        if muxing <= 0 {
                            finish(&mut stdout, newline);
                            return Ok(last_status);
                        }
                    }
                    Message::Command(cmd) if cmd.cmd() == "ts" => {
                        // Consumed: it belongs to a nested mux's own state.
                    }
                    Message::End => {}
                    Message::Text(bytes) => {
                        if !bytes.is_empty() {
                            let _ = stdout.write_all(bytes);
                            let _ = stdout.flush();
                            newline = bytes.ends_with(b"\r\n");
                        }
                    }
                    Message::Command(_) => {
                        // Any other structured command arriving as a
                        // "payload" (e.g. a stray `log`) is opaque to the
                        // client; drop rather than render raw JSON.
                    }
                }
            }
        }
    }

    finish(&mut stdout, newline);
    Ok(last_status)
}

fn finish(stdout: &mut io::Stdout, newline: bool) {
    if !newline {
        let _ = stdout.write_all(b"\r\n");
        let _ = stdout.flush();
    }
}
