use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::StaticConfig;
use crate::engine::Resolver;
use crate::selector::ThreadRngSelector;
use crate::transport::TcpTransport;

mod cache;
mod config;
mod engine;
mod errors;
mod name;
mod roots;
mod selector;
mod transport;
mod udp;

const CONFIG_PATH: &str = "dns.cfg";
const LISTEN_PORT: u16 = 53;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = StaticConfig::load(CONFIG_PATH).context("failed to load static config")?;
    let resolver = Resolver::new(config, Arc::new(TcpTransport::new()), Box::new(ThreadRngSelector));

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), LISTEN_PORT);
    udp::serve(resolver, bind_addr).await
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
