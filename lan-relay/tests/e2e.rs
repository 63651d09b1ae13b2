use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn terminal_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("lan-relay");

    let mut host = spawn_host(binary).await?;
    let port = read_host_port(&mut host.stdout).await?;

    let mut alice = spawn_client(binary, "alice", port).await?;
    let host_sees_alice = read_line_expect(&mut host.stdout, "waiting for alice identity").await?;
    assert_eq!(host_sees_alice, "[Client 127.0.0.1]: alice");

    let mut bob = spawn_client(binary, "bob", port).await?;
    let host_sees_bob = read_line_expect(&mut host.stdout, "waiting for bob identity").await?;
    assert_eq!(host_sees_bob, "[Client 127.0.0.1]: bob");
    let alice_sees_bob = read_line_expect(&mut alice.stdout, "waiting for alice to see bob").await?;
    assert_eq!(alice_sees_bob, "[Client 127.0.0.1]: bob");

    // Alice's line reaches Bob and the host, tagged with her address.
    alice
        .send_line("Hello from Alice")
        .await
        .context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "[Client 127.0.0.1]: alice: Hello from Alice");
    let host_hears_alice =
        read_line_expect(&mut host.stdout, "waiting for host to hear alice").await?;
    assert_eq!(host_hears_alice, "[Client 127.0.0.1]: alice: Hello from Alice");

    // The host's own line goes to everyone, itself included.
    host.send_line("Welcome all").await.context("host send line")?;
    let host_echo = read_line_expect(&mut host.stdout, "waiting for host echo").await?;
    assert_eq!(host_echo, "Host: Welcome all");
    let alice_hears_host =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear host").await?;
    assert_eq!(alice_hears_host, "Host: Welcome all");
    let bob_hears_host = read_line_expect(&mut bob.stdout, "waiting for bob to hear host").await?;
    assert_eq!(bob_hears_host, "Host: Welcome all");

    alice.send_line("/quit").await.context("alice send quit")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving chat");

    bob.send_line("/quit").await.context("bob send quit")?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving chat");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The host keeps running after everyone leaves; terminate it manually.
    let _ = host.child.kill().await;
    let _ = host.child.wait().await;

    Ok(())
}

#[tokio::test]
async fn join_without_host_fails() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("lan-relay");
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
        probe.local_addr()?.port()
    };

    let status = timeout(
        Duration::from_secs(5),
        Command::new(binary)
            .arg("join")
            .arg("--name")
            .arg("alice")
            .arg("--port")
            .arg(port.to_string())
            .arg("--connect-timeout-secs")
            .arg("1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await
    .context("join did not give up in time")??;

    assert!(!status.success());
    Ok(())
}

struct ChatProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChatProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

fn spawn_process(mut cmd: Command, name: &str) -> Result<ChatProcess> {
    cmd.env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {name}"))?;
    let stdin = child
        .stdin
        .take()
        .with_context(|| format!("{name} stdin missing after spawn"))?;
    let stdout = child
        .stdout
        .take()
        .with_context(|| format!("{name} stdout missing after spawn"))?;

    Ok(ChatProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn spawn_host(binary: &Path) -> Result<ChatProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("host").arg("--listen").arg("127.0.0.1:0");
    spawn_process(cmd, "host")
}

async fn read_host_port(reader: &mut BufReader<ChildStdout>) -> Result<u16> {
    let banner = read_line_expect(reader, "waiting for host banner").await?;
    let addr = banner
        .strip_prefix("listening on ")
        .with_context(|| format!("unexpected host banner: {banner}"))?;
    let (_, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("host banner missing port: {banner}"))?;
    port.parse()
        .with_context(|| format!("host banner has a bad port: {banner}"))
}

async fn spawn_client(binary: &Path, name: &str, port: u16) -> Result<ChatProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("join")
        .arg("--name")
        .arg(name)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string());
    let mut process = spawn_process(cmd, name)?;

    let banner = read_line_expect(&mut process.stdout, "waiting for connect banner").await?;
    let expected = format!("*** connected to 127.0.0.1:{port} as {name}");
    if banner != expected {
        return Err(anyhow!("expected '{expected}', got '{banner}'"));
    }
    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome line").await?;
    if welcome != "System: Welcome to the chat!" {
        return Err(anyhow!("expected welcome line for {name}, got '{welcome}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
