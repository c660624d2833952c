use std::sync::Arc;

use xns_courier::rpc::Registry;
use xns_courier::tcp::{CourierTcp, CourierTcpListener};

/// Courier Time program with a GetTime and an Echo procedure
mod time;

/// Port number on which the Courier server will listen
const HOSTPORT: u32 = 11112;

/// Demo Courier server exposing a time-of-day program.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(Registry::new());
    registry.register(time::program());

    println!("Starting Courier server on 0.0.0.0:{HOSTPORT}");
    println!("Serving program {} version {}", time::PROGRAM, time::VERSION);

    let listener = CourierTcpListener::bind(&format!("0.0.0.0:{HOSTPORT}"), registry)
        .await
        .unwrap();
    listener.handle_forever().await.unwrap();
}
