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

//! The server (§4.5): launches a single long-lived `mux` child, fans
//! its demultiplexed traffic out across accepted client connections,
//! and relaunches the child forever if it exits.

mod dispatcher;
mod terminal;

use std::{
    env, fs,
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    process,
    sync::Arc,
    thread,
};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::{cleanup, config::Config, consts, mux::exit_notify::ExitNotifier};

#[derive(Parser, Debug)]
#[clap(author, about = "The socket-facing daemon that hosts summit's mux tree")]
pub struct Args {
    #[clap(short = 'c', long, help = "path to the summit-client binary")]
    pub client_path: Option<String>,

    #[clap(short = 'm', long, help = "path to the summit-mux binary")]
    pub mux_path: Option<String>,

    #[clap(short = 't', long, help = "terminal-emulator binary used to host new windows")]
    pub terminal_path: Option<String>,

    #[clap(short, long, action, help = "the unix socket to listen on")]
    pub socket: Option<String>,

    #[clap(short = 'f', long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(long, action, help = "the file to write logs to")]
    pub log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "show more in logs, may be repeated")]
    pub verbose: u8,
}

pub(crate) struct ResolvedPaths {
    pub(crate) socket: PathBuf,
    pub(crate) client: String,
    #[allow(dead_code)] // read by the outer relaunch loop, not the dispatcher
    pub(crate) mux: String,
    pub(crate) terminal: String,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    crate::init_logging(args.verbose, &args.log_file);
    crate::signals::Handler::new().spawn()?;

    let config = crate::config::read_config(&args.config_file)?;
    let paths = resolve_paths(&args, &config);

    let _ = fs::remove_file(&paths.socket);
    let listener = UnixListener::bind(&paths.socket).context("binding summit socket")?;
    info!("listening on {}", paths.socket.display());

    let socket_cleanup = paths.socket.clone();
    cleanup::register(move || {
        let _ = fs::remove_file(&socket_cleanup);
    });

    let (new_conns_tx, new_conns_rx) = unbounded::<UnixStream>();
    spawn_accept_loop(listener, new_conns_tx);

    loop {
        if let Err(e) = run_one_generation(&paths, &new_conns_rx) {
            warn!("mux generation exited: {:?}", e);
        }
        info!("relaunching mux");
    }
}

fn resolve_paths(args: &Args, config: &Config) -> ResolvedPaths {
    let socket = args
        .socket
        .clone()
        .or_else(|| env::var(consts::SOCKET_ENV_VAR).ok())
        .or_else(|| config.socket.clone())
        .unwrap_or_else(|| consts::DEFAULT_SOCKET_PATH.to_string());
    let client = args
        .client_path
        .clone()
        .or_else(|| env::var(consts::CLIENT_ENV_VAR).ok())
        .or_else(|| config.client_path.clone())
        .unwrap_or_else(|| "summit-client".to_string());
    let mux = args
        .mux_path
        .clone()
        .or_else(|| env::var(consts::MUX_ENV_VAR).ok())
        .or_else(|| config.mux_path.clone())
        .unwrap_or_else(|| "summit-mux".to_string());
    let terminal = args
        .terminal_path
        .clone()
        .or_else(|| env::var(consts::TERMINAL_ENV_VAR).ok())
        .or_else(|| config.terminal_path.clone())
        .unwrap_or_else(|| "x-terminal-emulator".to_string());

    ResolvedPaths { socket: PathBuf::from(socket), client, mux, terminal }
}

fn spawn_accept_loop(listener: UnixListener, out: Sender<UnixStream>) {
    thread::Builder::new()
        .name("summit-accept".to_string())
        .spawn(move || {
            for conn in listener.incoming() {
                match conn {
                    Ok(stream) => {
                        if out.send(stream).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("accept error: {:?}", e),
                }
            }
        })
        .expect("spawning accept loop");
}

/// Runs the dispatcher against one mux child process, until that
/// child exits.
fn run_one_generation(paths: &ResolvedPaths, new_conns: &Receiver<UnixStream>) -> anyhow::Result<()> {
    let mut child = process::Command::new(&paths.mux)
        .stdin(process::Stdio::piped())
        .stdout(process::Stdio::piped())
        .stderr(process::Stdio::inherit())
        .spawn()
        .context("spawning mux child")?;

    let mux_stdin = child.stdin.take().expect("piped stdin");
    let mux_stdout = child.stdout.take().expect("piped stdout");

    let exit_notifier = Arc::new(ExitNotifier::new());
    spawn_child_watcher(child, Arc::clone(&exit_notifier));

    dispatcher::run(paths, mux_stdin, mux_stdout, new_conns, &exit_notifier)
}

fn spawn_child_watcher(mut child: process::Child, notifier: Arc<ExitNotifier>) {
    thread::spawn(move || {
        let code = match child.wait() {
            Ok(status) => status.code().unwrap_or(1),
            Err(_) => 1,
        };
        notifier.notify_exit(code);
    });
}
