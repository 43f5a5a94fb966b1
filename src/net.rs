//! Host identity

use std::net::{IpAddr, ToSocketAddrs};

/// The local hostname, used as nerve's instance id
pub fn hostname() -> std::io::Result<String> {
    Ok(hostname::get()?.to_string_lossy().into_owned())
}

/// First IPv4 address the local hostname resolves to
pub fn host_ip() -> std::io::Result<String> {
    let name = hostname()?;
    resolve_ipv4(&name)
}

pub fn resolve_ipv4(name: &str) -> std::io::Result<String> {
    (name, 0)
        .to_socket_addrs()?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .map(|ip| ip.to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} has no IPv4 address", name),
            )
        })
}
