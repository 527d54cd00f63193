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

//! The mux (§4.3): demultiplexes a single stdin/stdout byte stream,
//! addressed by routing commands, across a dynamic set of sessions.

pub mod exit_notify;
mod session;

use std::{
    collections::HashMap,
    env,
    io::{self, Read, Write},
    os::unix::io::AsRawFd,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    thread,
};

use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use nix::unistd::isatty;
use summit_protocol::{Command, Lexer, Message};
use tracing::{info, instrument, warn};

use crate::{config::Config, consts};
pub use session::SessionExit;

#[derive(Parser, Debug)]
#[clap(author, about = "The nested pty-multiplexing fabric's per-window mux")]
pub struct Args {
    #[clap(short, long, action, help = "a label for this mux instance, used only in logs/diagnostics")]
    pub label: Option<String>,

    #[clap(
        short = 'n',
        long,
        help = "Emit a single `run` frame on stdout and exit, instead of running the main loop

Used when this mux is itself the program a parent session's `run` command
launches: it announces what to actually run, and a later invocation (without
-n) takes over the same stdin/stdout to host it."
    )]
    pub once: bool,

    #[clap(short, long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(short, long, action, help = "the file to write logs to")]
    pub log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "show more in logs, may be repeated")]
    pub verbose: u8,

    #[clap(trailing_var_arg = true, help = "the program (and args) this mux should host")]
    pub argv: Vec<String>,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    crate::init_logging(args.verbose, &args.log_file);
    if let Some(label) = &args.label {
        info!("mux starting ({})", label);
    }
    if !args.once {
        crate::signals::Handler::new().spawn()?;
    }

    let config = crate::config::read_config(&args.config_file)?;

    if args.once {
        return run_once(&args, &config);
    }
    run_main_loop(&args, &config)
}

/// `-n` mode: print a single `run` frame describing the requested
/// program and exit. See spec §4.3.
fn run_once(args: &Args, config: &Config) -> anyhow::Result<()> {
    let argv = resolve_argv(&args.argv, config);
    let env = process_env();
    let size = crate::tty::size_from_fd(io::stdin().as_raw_fd()).unwrap_or_default();

    let frame = Message::Command(Command::run(argv, env, size)).to_wire();
    io::stdout().write_all(&frame)?;
    io::stdout().flush()?;
    Ok(())
}

fn resolve_argv(argv: &[String], config: &Config) -> Vec<String> {
    if !argv.is_empty() {
        return argv.to_vec();
    }
    if let Ok(cmd) = env::var(consts::COMMAND_ENV_VAR) {
        return shell_words::split(&cmd).unwrap_or_else(|_| vec![cmd]);
    }
    if let Some(cmd) = &config.command {
        return shell_words::split(cmd).unwrap_or_else(|_| vec![cmd.clone()]);
    }
    vec![env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
}

fn process_env() -> Vec<(String, String)> {
    env::vars().collect()
}

struct Session {
    mailbox: Sender<Message>,
}

/// The mux main loop (§4.3). Demultiplexes stdin across sessions and
/// remultiplexes their outbound traffic back onto stdout, tracking the
/// set of live sessions and the nested-mux counter.
#[instrument(skip_all)]
fn run_main_loop(args: &Args, config: &Config) -> anyhow::Result<()> {
    let extra_env: Vec<(String, String)> =
        config.env.clone().map(|m| m.into_iter().collect()).unwrap_or_default();

    let (mux_out_tx, mux_out_rx) = unbounded::<Message>();
    let (status_tx, status_rx) = unbounded::<SessionExit>();
    let (stdin_tx, stdin_rx) = unbounded::<Message>();

    let nested = Arc::new(AtomicI32::new(0));
    let writer = spawn_stdout_writer(mux_out_rx, Arc::clone(&nested));
    spawn_stdin_lexer(stdin_tx);

    let mut sessions: HashMap<String, Session> = HashMap::new();
    let mut counter: u64 = 1;

    let self_exists = is_self_attached();
    if self_exists {
        let argv = resolve_argv(&args.argv, config);
        let env = {
            let mut e = extra_env.clone();
            e.extend(process_env());
            e
        };
        let size = crate::tty::size_from_fd(io::stdin().as_raw_fd()).unwrap_or_default();
        let (tx, rx) = unbounded();
        sessions.insert(consts::SELF_SESSION_ID.to_string(), Session { mailbox: tx });
        let mux_out = mux_out_tx.clone();
        let status = status_tx.clone();
        thread::Builder::new()
            .name("session(0)".to_string())
            .spawn(move || session::run_self(argv, env, size, rx, mux_out, status))
            .expect("spawning self session");
    }

    let mut in_progress: Vec<Command> = Vec::new();
    let mut current_id: Option<String> = self_exists.then(|| consts::SELF_SESSION_ID.to_string());
    let default_id = current_id.clone();

    loop {
        select! {
            recv(stdin_rx) -> msg => {
                let Ok(msg) = msg else { break };
                handle_stdin_message(
                    msg,
                    &mut sessions,
                    &mut counter,
                    &mut in_progress,
                    &mut current_id,
                    &default_id,
                    &extra_env,
                    &mux_out_tx,
                    &status_tx,
                );
            }
            recv(status_rx) -> exit => {
                let Ok(exit) = exit else { break };
                handle_session_exit(exit, &mut sessions, &mux_out_tx);
                if sessions.is_empty() && nested.load(Ordering::SeqCst) == 0 {
                    break;
                }
            }
        }
    }

    drop(mux_out_tx);
    let _ = writer.join();
    Ok(())
}

fn is_self_attached() -> bool {
    isatty(io::stdin().as_raw_fd()).unwrap_or(false)
        && isatty(io::stdout().as_raw_fd()).unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
fn handle_stdin_message(
    msg: Message,
    sessions: &mut HashMap<String, Session>,
    counter: &mut u64,
    in_progress: &mut Vec<Command>,
    current_id: &mut Option<String>,
    default_id: &Option<String>,
    extra_env: &[(String, String)],
    mux_out_tx: &Sender<Message>,
    status_tx: &Sender<SessionExit>,
) {
    if let Message::Command(cmd) = &msg {
        match cmd.cmd() {
            "term" => {
                *in_progress = vec![cmd.clone()];
                *current_id = None;
                return;
            }
            "pty" => {
                let Some(s) = cmd.pty_id() else { return };
                if current_id.is_none() {
                    *current_id = Some(s.to_string());
                } else {
                    in_progress.push(cmd.clone());
                }
                return;
            }
            "run" => {
                if current_id.is_none() {
                    let id = counter.to_string();
                    *counter += 1;
                    let (tx, rx) = unbounded();
                    sessions.insert(id.clone(), Session { mailbox: tx });
                    let mailbox_seed = in_progress.clone();
                    // Seed the new session's mailbox with exactly the
                    // in-progress prefix (its `term`), then the `run`
                    // payload itself (§4.2 steps 1-2).
                    for m in &mailbox_seed {
                        let _ = tx_for(sessions, &id).send(Message::Command(m.clone()));
                    }
                    let _ = tx_for(sessions, &id).send(msg.clone());
                    in_progress.clear();

                    let mux_out = mux_out_tx.clone();
                    let status = status_tx.clone();
                    let extra_env = extra_env.to_vec();
                    crate::test_hooks::emit("mux-session-spawn");
                    thread::Builder::new()
                        .name(format!("session({id})"))
                        .spawn(move || session::run(id, rx, mux_out, status, extra_env))
                        .expect("spawning session");
                    *current_id = default_id.clone();
                    return;
                }
            }
            _ => {}
        }
    }

    // Deliver: flush in-progress prefix, then the payload, to the
    // selected session's mailbox (falls through for term/pty cases that
    // didn't `return` above, and for every non-routing payload).
    let Some(id) = current_id.clone().or_else(|| default_id.clone()) else {
        in_progress.clear();
        return;
    };

    // A `pty` segment ends up in `in_progress` only when it arrived
    // after a session was already selected this episode (the "else"
    // arm above): more than one segment addressed at a single already-
    // resolved session. Per spec.md's open question on this, it's
    // logged but not fatal: the extra hops still get flushed into the
    // session's PTY exactly as written.
    let is_run = matches!(&msg, Message::Command(c) if c.is_run());
    if !is_run && in_progress.iter().any(|c| c.cmd() == "pty") {
        warn!("error: sending commands to non-mux");
        let _ = mux_out_tx.send(Message::Command(Command::log("error: sending commands to non-mux")));
    }

    if let Some(session) = sessions.get(&id) {
        for m in in_progress.drain(..) {
            let _ = session.mailbox.send(Message::Command(m));
        }
        let _ = session.mailbox.send(msg);
    } else {
        warn!("message addressed at unknown session {}", id);
        in_progress.clear();
    }
    *current_id = default_id.clone();
}

fn tx_for<'a>(sessions: &'a HashMap<String, Session>, id: &str) -> &'a Sender<Message> {
    &sessions.get(id).expect("just inserted").mailbox
}

fn handle_session_exit(
    exit: SessionExit,
    sessions: &mut HashMap<String, Session>,
    mux_out_tx: &Sender<Message>,
) {
    sessions.remove(&exit.id);
    if exit.is_self {
        info!("self session exited with status {}", exit.status);
        let _ = mux_out_tx.send(Message::Command(exit.term));
        let _ = mux_out_tx.send(Message::Command(Command::pty(exit.id)));
        let _ = mux_out_tx.send(Message::Command(Command::status(exit.status)));
    }
    // Non-self sessions already announced their own status from
    // session::run_started before posting here; nothing further to emit.
}

fn spawn_stdin_lexer(out: Sender<Message>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("mux-stdin-lexer".to_string())
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
            lexer.flush();
            while let Some(msg) = lexer.chunk() {
                let _ = out.send(msg);
            }
        })
        .expect("spawning mux stdin lexer")
}

/// The single task permitted to write to stdout (§5), so every
/// session's outbound traffic serializes onto one fd. Also the sole
/// observer of `started`/`status` traffic for the nested counter
/// (§4.3: "incremented when a started message is observed flowing out
/// of any session, decremented when a status message flows out").
fn spawn_stdout_writer(rx: Receiver<Message>, nested: Arc<AtomicI32>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("mux-stdout-writer".to_string())
        .spawn(move || {
            let mut stdout = io::stdout();
            for msg in rx.iter() {
                if let Message::Command(cmd) = &msg {
                    if cmd.cmd() == "started" {
                        nested.fetch_add(1, Ordering::SeqCst);
                    } else if cmd.is_status() {
                        nested.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                if stdout.write_all(&msg.to_wire()).is_err() {
                    return;
                }
                let _ = stdout.flush();
            }
        })
        .expect("spawning mux stdout writer")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_argv_prefers_explicit_argv() {
        let cfg = Config::default();
        let got = resolve_argv(&["/bin/echo".to_string(), "hi".to_string()], &cfg);
        assert_eq!(got, vec!["/bin/echo".to_string(), "hi".to_string()]);
    }

    #[test]
    fn resolve_argv_falls_back_to_config_command() {
        std::env::remove_var(consts::COMMAND_ENV_VAR);
        let mut cfg = Config::default();
        cfg.command = Some("/bin/zsh -l".to_string());
        let got = resolve_argv(&[], &cfg);
        assert_eq!(got, vec!["/bin/zsh".to_string(), "-l".to_string()]);
    }
}
