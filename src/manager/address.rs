use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use tracing::{info, warn};

use crate::error::ManagerError;

/// Resolves the GUI address for the next launch: the preferred one when its
/// port is free, otherwise the same host on a port the OS hands out.
pub(crate) fn finalize(preferred: &str) -> Result<String, ManagerError> {
    let addr = resolve(preferred)?;

    if addr.port() != 0 && TcpListener::bind(addr).is_ok() {
        return Ok(preferred.to_string());
    }

    let listener = TcpListener::bind(SocketAddr::new(addr.ip(), 0))?;
    let free = listener.local_addr()?;
    if addr.port() != 0 {
        warn!(preferred, fallback = %free, "GUI port busy, using a free port");
    } else {
        info!(address = %free, "Picked a free GUI port");
    }
    Ok(free.to_string())
}

fn resolve(address: &str) -> Result<SocketAddr, ManagerError> {
    let trimmed = address
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Ok(addr);
    }
    trimmed
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ManagerError::Config(format!("invalid GUI address: {address}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_a_free_preferred_port() {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let preferred = format!("127.0.0.1:{port}");
        assert_eq!(finalize(&preferred).unwrap(), preferred);
    }

    #[test]
    fn falls_back_when_port_is_taken() {
        let busy = TcpListener::bind("127.0.0.1:0").unwrap();
        let preferred = busy.local_addr().unwrap().to_string();
        let chosen = finalize(&preferred).unwrap();
        assert_ne!(chosen, preferred);
        assert!(chosen.starts_with("127.0.0.1:"));
    }

    #[test]
    fn port_zero_picks_a_port() {
        let chosen: SocketAddr = finalize("127.0.0.1:0").unwrap().parse().unwrap();
        assert_ne!(chosen.port(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            finalize("not an address"),
            Err(ManagerError::Config(_))
        ));
    }
}
