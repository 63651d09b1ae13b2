//! Terminal front end: host a room or join one from stdin/stdout.
//!
//! Chat lines go to stdout and nothing else does, so the binary can be
//! scripted. Diagnostics go through `tracing`.

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
};
use tracing::warn;

use crate::{
    cli::{HostArgs, JoinArgs},
    config::{ConnectorConfig, ListenerConfig},
    connector::OutboundConnector,
    line::chat_line,
    listener::Listener,
};

pub async fn run_host(args: HostArgs) -> Result<()> {
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let listener = Listener::new(ListenerConfig::from(&args), move |line: String| {
        let _ = inbox_tx.send(line);
    });
    let addr = listener.start().await.context("failed to start hosting")?;
    write_stdout(&format!("listening on {addr}")).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        select! {
            biased;
            Some(line) = inbox.recv() => write_stdout(&line).await?,
            input = stdin.next_line(), if stdin_open => match input? {
                Some(text) => {
                    let text = text.trim_end();
                    if !text.is_empty() {
                        listener.broadcast(&chat_line(&args.name, text));
                    }
                }
                // Keep hosting without a keyboard until Ctrl-C.
                None => stdin_open = false,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    listener.stop();
    Ok(())
}

pub async fn run_join(args: JoinArgs) -> Result<()> {
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let connector = OutboundConnector::new(ConnectorConfig::from(&args), move |line: String| {
        let _ = inbox_tx.send(line);
    });
    connector
        .connect()
        .await
        .with_context(|| format!("failed to join {}:{}", args.host, args.port))?;
    write_stdout(&format!(
        "*** connected to {}:{} as {}",
        args.host, args.port, args.name
    ))
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        select! {
            biased;
            Some(line) = inbox.recv() => write_stdout(&line).await?,
            _ = connector.closed() => {
                write_stdout("*** host closed the connection").await?;
                break;
            }
            input = stdin.next_line() => match input? {
                Some(text) => {
                    if !handle_input(&connector, &text).await? {
                        break;
                    }
                }
                None => break,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    connector.disconnect();
    Ok(())
}

async fn handle_input(connector: &OutboundConnector, input: &str) -> io::Result<bool> {
    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    connector.send_chat(text);
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
