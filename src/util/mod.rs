use std::net::{IpAddr, SocketAddr};

use local_ip_address::list_afinet_netifas;
use str0m::net::Protocol;
use str0m::Candidate;
use tracing::{info, warn};

/// Host candidates for every routable IPv4 interface, on the port of
/// `local_addr`.
pub fn get_candidates(local_addr: SocketAddr) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = vec![];

    let network_interfaces = match list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Cannot list network interfaces: {}", e);
            return candidates;
        }
    };

    for (name, ip) in network_interfaces {
        let IpAddr::V4(ip4) = ip else {
            continue;
        };
        if ip4.is_loopback() || ip4.is_link_local() {
            continue;
        }

        info!("iface: {} / {:?}", name, ip);
        match Candidate::host(SocketAddr::new(ip, local_addr.port()), Protocol::Udp) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!("Skipping interface {}: {}", name, e),
        }
    }

    candidates
}
