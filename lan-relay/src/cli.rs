use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{ConnectorConfig, DEFAULT_CONNECT_TIMEOUT, ListenerConfig},
    line::{DEFAULT_PORT, WELCOME_LINE},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a chat room that other machines on the LAN can join.
    Host(HostArgs),
    /// Join a chat room hosted elsewhere.
    Join(JoinArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Name prefixed to lines typed at the host.
    #[arg(long, default_value = "Host")]
    pub name: String,

    /// Do not greet joining peers.
    #[arg(long)]
    pub no_welcome: bool,
}

#[derive(Args, Debug, Clone)]
pub struct JoinArgs {
    /// Display name announced to the room and prefixed to every chat line.
    #[arg(long)]
    pub name: String,

    /// Host name or IP address of the machine hosting the room.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Give up connecting after this many seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,
}

impl From<&HostArgs> for ListenerConfig {
    fn from(args: &HostArgs) -> Self {
        let welcome = (!args.no_welcome).then(|| WELCOME_LINE.to_string());
        ListenerConfig::default()
            .with_listen_addr(args.listen)
            .with_welcome(welcome)
    }
}

impl From<&JoinArgs> for ConnectorConfig {
    fn from(args: &JoinArgs) -> Self {
        ConnectorConfig::new(args.host.clone(), args.port, args.name.clone())
            .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs))
    }
}
