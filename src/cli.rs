use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

use crate::forwarder::{Forwarder, RcodePolicy};

#[derive(Parser, Debug)]
#[command(name = "dns-forwarder")]
#[command(about = "A forwarding DNS server written in Rust", long_about = None)]
pub struct Args {
    /// Resolver, where <address> will be of the form <ip>:<port>
    #[arg(short, long, value_parser = parse_socket_addr)]
    pub resolver: Option<SocketAddr>,

    /// Address to listen on, of the form <ip>:<port>
    #[arg(short, long, default_value = "127.0.0.1:2053", value_parser = parse_socket_addr)]
    pub listen: SocketAddr,

    /// Seconds to wait for each upstream reply
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// RCODE of forwarded responses: "passthrough" or a fixed code 0-15
    #[arg(long, default_value = "passthrough", value_parser = parse_rcode_policy)]
    pub forward_rcode: RcodePolicy,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_socket_addr(s: &str) -> Result<SocketAddr, String> {
    s.parse::<SocketAddr>().map_err(|_| {
        format!(
            "Invalid address format: '{}'. Expected format: <ip>:<port>",
            s
        )
    })
}

fn parse_rcode_policy(s: &str) -> Result<RcodePolicy, String> {
    s.parse()
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn resolver(&self) -> Option<SocketAddr> {
        self.resolver
    }

    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// The forwarder for the configured resolver; `None` selects local answers
    pub fn forwarder(&self) -> Option<Forwarder> {
        self.resolver().map(|upstream| {
            Forwarder::new(upstream)
                .with_timeout(Duration::from_secs(self.timeout))
                .with_rcode_policy(self.forward_rcode)
        })
    }
}
