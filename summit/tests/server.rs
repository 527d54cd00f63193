// Run with `--features test_hooks` so the server's test-hook socket
// is actually wired up.
use std::{io::Read, time};

use anyhow::{anyhow, Context};

mod support;

#[test]
fn start() -> anyhow::Result<()> {
    let tmp_dir =
        tempfile::Builder::new().prefix("summit-test").rand_bytes(20).tempdir().context("creating tmp dir")?;

    let mut child = std::process::Command::new(support::server_bin())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .arg("--socket")
        .arg(tmp_dir.path().join("summit.socket"))
        .arg("--mux-path")
        .arg(support::mux_bin())
        .spawn()
        .context("spawning server process")?;

    // The server should start up and run without incident for a bit.
    std::thread::sleep(time::Duration::from_millis(300));

    child.kill().context("killing child")?;

    let mut stdout = child.stdout.take().context("missing stdout")?;
    let mut stdout_str = String::new();
    stdout.read_to_string(&mut stdout_str).context("slurping stdout")?;
    if !stdout_str.is_empty() {
        println!("{}", stdout_str);
        return Err(anyhow!("unexpected stdout output"));
    }

    Ok(())
}

#[test]
fn config_file() -> anyhow::Result<()> {
    let tmp_dir =
        tempfile::Builder::new().prefix("summit-test").rand_bytes(20).tempdir().context("creating tmp dir")?;
    let config_path = tmp_dir.path().join("config.toml");
    std::fs::write(&config_path, "command = \"/bin/sh\"\n").context("writing config")?;

    let mut child = std::process::Command::new(support::server_bin())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .arg("--socket")
        .arg(tmp_dir.path().join("summit.socket"))
        .arg("--mux-path")
        .arg(support::mux_bin())
        .arg("--config-file")
        .arg(&config_path)
        .spawn()
        .context("spawning server process")?;

    std::thread::sleep(time::Duration::from_millis(300));
    child.kill().context("killing child")?;

    Ok(())
}
