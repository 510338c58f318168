//! Server binding.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Result, anyhow};
use tiny_http::Server;

use crate::log;

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Bind to the specified interface and port, with automatic port retry.
///
/// Port `0` binds an OS-assigned port; the returned address is the real one.
pub fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr)> {
    let attempts = if base_port == 0 { 1 } else { MAX_PORT_RETRIES };

    for offset in 0..attempts {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("bridge"; "port {} in use, using {} instead", base_port, port);
                }
                let bound = server.server_addr().to_ip().unwrap_or(addr);
                return Ok((server, bound));
            }
            Err(_) if offset + 1 < attempts => continue,
            Err(e) => {
                return Err(anyhow!(
                    "failed to bind after {} attempts (ports {}-{}): {}",
                    attempts,
                    base_port,
                    port,
                    e
                ));
            }
        }
    }
    Err(anyhow!("no port available from {}", base_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_bind_ephemeral_port() {
        let (_server, addr) = bind_with_retry(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_retries_next_port() {
        let (_first, addr) = bind_with_retry(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let (_second, next) = bind_with_retry(addr.ip(), addr.port()).unwrap();
        assert_ne!(next.port(), addr.port());
    }
}
