//! TCP reachability probe: one connect attempt with a timeout.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Attempt a TCP handshake against `ip:port`. True only on a completed
/// connection within the timeout; refusal, timeout, and every other error
/// collapse to false. Failures never cross this boundary as faults.
pub async fn check(ip: Ipv4Addr, port: u16, per_attempt: Duration) -> bool {
    let addr = SocketAddr::from((ip, port));
    matches!(timeout(per_attempt, TcpStream::connect(addr)).await, Ok(Ok(_)))
}
