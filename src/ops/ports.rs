use crate::error::{OpsError, Result};
use std::net::{Ipv4Addr, TcpListener};

/// Ask the OS for a free loopback port.
///
/// The listener is dropped before returning, so another process may grab the
/// port before the tunnel binds it. `ExitOnForwardFailure` on the ssh side
/// turns that race into a clean `TunnelEstablishFailed`.
pub fn allocate() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| OpsError::Resource(format!("Could not bind a local port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| OpsError::Resource(format!("Could not read local port: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_returns_bindable_port() {
        let port = allocate().unwrap();
        assert_ne!(port, 0);
        // released, so we can bind it again
        assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok());
    }
}
