// Run with `--features test_hooks`.
use anyhow::Context;

mod support;

#[test]
fn happy_path() -> anyhow::Result<()> {
    let mut server = support::ServerProc::new().context("starting server proc")?;
    let mut attach = server.attach(&["/bin/sh"]).context("starting attach proc")?;

    let mut lines = attach.line_matcher()?;

    attach.send_line("echo hi")?;
    lines.match_re("hi$")?;

    attach.send_line("echo ping")?;
    lines.match_re("ping$")?;

    Ok(())
}

#[test]
fn exit_status_propagates() -> anyhow::Result<()> {
    let mut server = support::ServerProc::new().context("starting server proc")?;
    let mut attach = server.attach(&["/bin/sh"]).context("starting attach proc")?;

    attach.send_line("exit 7")?;
    let code = attach.wait().context("waiting on attach proc")?;
    assert_eq!(code, 7);

    Ok(())
}

#[test]
fn multiple_windows_are_independent() -> anyhow::Result<()> {
    let mut server = support::ServerProc::new().context("starting server proc")?;

    let mut a = server.attach(&["/bin/sh"]).context("starting first attach proc")?;
    let mut b = server.attach(&["/bin/sh"]).context("starting second attach proc")?;

    let mut a_lines = a.line_matcher()?;
    let mut b_lines = b.line_matcher()?;

    a.send_line("export MYVAR=a")?;
    a.send_line("echo $MYVAR")?;
    a_lines.match_re("^a$")?;

    b.send_line("export MYVAR=b")?;
    b.send_line("echo $MYVAR")?;
    b_lines.match_re("^b$")?;

    Ok(())
}
