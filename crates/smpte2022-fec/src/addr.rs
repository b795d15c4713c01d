//! Column/row FEC stream addresses derived from the media stream address.
//!
//! SMPTE 2022-1 senders commonly place the column FEC stream on the next
//! multicast group and port + 2, and the row FEC stream one step further.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// One step: next IPv4 address (with carry) and port + 2.
fn next_stream(addr: SocketAddr) -> Option<SocketAddr> {
    let SocketAddr::V4(v4) = addr else {
        return None;
    };
    if !v4.ip().is_multicast() {
        return None;
    }
    let ip = Ipv4Addr::from(u32::from(*v4.ip()).wrapping_add(1));
    let port = v4.port().checked_add(2)?;
    Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Address of the column FEC stream for a multicast media stream.
pub fn column_address(media: SocketAddr) -> Option<SocketAddr> {
    next_stream(media)
}

/// Address of the row FEC stream for a multicast media stream.
pub fn row_address(media: SocketAddr) -> Option<SocketAddr> {
    next_stream(media).and_then(next_stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn plain_increment() {
        let media = addr("239.232.0.222:3000");
        assert_eq!(column_address(media), Some(addr("239.232.0.223:3002")));
        assert_eq!(row_address(media), Some(addr("239.232.0.224:3004")));
    }

    #[test]
    fn octet_carry() {
        let media = addr("239.232.255.255:8000");
        assert_eq!(column_address(media), Some(addr("239.233.0.0:8002")));
        assert_eq!(row_address(media), Some(addr("239.233.0.1:8004")));
    }

    #[test]
    fn unicast_and_ipv6_have_no_fec_address() {
        assert_eq!(column_address(addr("192.168.1.10:5004")), None);
        assert_eq!(row_address(addr("[ff02::1]:5004")), None);
    }

    #[test]
    fn port_overflow() {
        assert_eq!(column_address(addr("239.0.0.1:65534")), None);
        assert_eq!(row_address(addr("239.0.0.1:65532")), None);
    }
}
