use std::net::Ipv6Addr;

use uuid::Uuid;

use crate::error::{Border0Error, Border0Result};

/// The 16 bytes of a UUID read as an IPv6 address.
pub fn uuid_to_ipv6(id: Uuid) -> Ipv6Addr {
    Ipv6Addr::from(*id.as_bytes())
}

/// Inverse of [`uuid_to_ipv6`]. Anything that is not an IPv6 literal is rejected.
pub fn ipv6_to_uuid(addr: &str) -> Border0Result<Uuid> {
    let ip: Ipv6Addr = addr
        .trim()
        .parse()
        .map_err(|_| Border0Error::InvalidMessage(format!("not an IPv6 address: {addr}")))?;
    Ok(Uuid::from_bytes(ip.octets()))
}
