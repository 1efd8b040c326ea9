//! Community-ID flow hashing
//!
//! Implements the flow fingerprint from the Community-ID specification
//! (<https://github.com/corelight/community-id-spec>): a seeded SHA-1 over
//! the canonically ordered tuple, base64-encoded and prefixed with `1:`.
//! Both directions of a bidirectional flow yield the same identifier, which
//! is what links probe-side observations to conntrack-side observations.

use std::net::IpAddr;

use base64::prelude::*;
use sha1::{Digest, Sha1};

use super::{icmp, FlowMeta};
use crate::protos::Protocol;

pub struct Hasher {
    seed: [u8; 2],
}

impl Hasher {
    /// The seed is serialized big-endian and prepended to the hash input.
    pub fn new(seed: u16) -> Hasher {
        Hasher {
            seed: seed.to_be_bytes(),
        }
    }

    /// Computes the Community-ID of a flow tuple.
    pub fn hash(&self, meta: &FlowMeta) -> String {
        let (ip0, ip1, port0, port1) = canonical_tuple(meta);

        let mut hasher = Sha1::new();
        hasher.update(self.seed);
        hasher.update(&ip0);
        hasher.update(&ip1);
        hasher.update([meta.transport.number(), 0]);
        hasher.update(port0.to_be_bytes());
        hasher.update(port1.to_be_bytes());

        format!("1:{}", BASE64_STANDARD.encode(hasher.finalize()))
    }
}

impl Default for Hasher {
    fn default() -> Hasher {
        Hasher::new(0)
    }
}

/// IPv4-in-IPv6 addresses reduce to their 4-byte form before ordering.
fn raw_ip(ip: IpAddr) -> Vec<u8> {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Orders the tuple so that both directions serialize identically. ICMP
/// flows hash their type/code equivalents in place of ports.
fn canonical_tuple(meta: &FlowMeta) -> (Vec<u8>, Vec<u8>, u16, u16) {
    let (src_port, dst_port) = match meta.transport {
        Protocol::Icmp4 => {
            let (p0, p1, _) = icmp::icmp4_port_equivalents(meta.icmp_type, meta.icmp_code);
            (p0, p1)
        }
        Protocol::Icmp6 => {
            let (p0, p1, _) = icmp::icmp6_port_equivalents(meta.icmp_type, meta.icmp_code);
            (p0, p1)
        }
        _ => (meta.src_port, meta.dst_port),
    };

    let src = raw_ip(meta.src);
    let dst = raw_ip(meta.dst);

    if src < dst || (src == dst && src_port < dst_port) {
        (src, dst, src_port, dst_port)
    } else {
        (dst, src, dst_port, src_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::icmp::{ICMP4_ECHO_REQUEST, ICMP6_NEIGHBOR_ADVERTISEMENT, ICMP6_NEIGHBOR_SOLICITATION};

    fn tcp_udp_meta(transport: Protocol, src: &str, sport: u16, dst: &str, dport: u16) -> FlowMeta {
        FlowMeta {
            transport,
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            src_port: sport,
            dst_port: dport,
            icmp_type: 0,
            icmp_code: 0,
        }
    }

    fn icmp_meta(transport: Protocol, src: &str, dst: &str, icmp_type: u16, icmp_code: u16) -> FlowMeta {
        FlowMeta {
            transport,
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
            src_port: 0,
            dst_port: 0,
            icmp_type,
            icmp_code,
        }
    }

    #[test]
    fn test_hash_golden_vectors() {
        let hasher = Hasher::new(0);
        for (expected, meta) in [
            // TCP, both directions
            (
                "1:LQU9qZlK+B5F3KDmev6m5PMibrg=",
                tcp_udp_meta(Protocol::Tcp, "128.232.110.120", 34855, "66.35.250.204", 80),
            ),
            (
                "1:LQU9qZlK+B5F3KDmev6m5PMibrg=",
                tcp_udp_meta(Protocol::Tcp, "66.35.250.204", 80, "128.232.110.120", 34855),
            ),
            // UDP, both directions
            (
                "1:d/FP5EW3wiY1vCndhwleRRKHowQ=",
                tcp_udp_meta(Protocol::Udp, "192.168.1.52", 54585, "8.8.8.8", 53),
            ),
            (
                "1:d/FP5EW3wiY1vCndhwleRRKHowQ=",
                tcp_udp_meta(Protocol::Udp, "8.8.8.8", 53, "192.168.1.52", 54585),
            ),
            // ICMPv4 echo request and the matching reply
            (
                "1:X0snYXpgwiv9TZtqg64sgzUn6Dk=",
                icmp_meta(Protocol::Icmp4, "192.168.0.89", "192.168.0.1", ICMP4_ECHO_REQUEST, 123),
            ),
            (
                "1:X0snYXpgwiv9TZtqg64sgzUn6Dk=",
                icmp_meta(Protocol::Icmp4, "192.168.0.1", "192.168.0.89", 0, 111),
            ),
            (
                "1:X0snYXpgwiv9TZtqg64sgzUn6Dk=",
                icmp_meta(Protocol::Icmp4, "192.168.0.1", "192.168.0.89", 0, 8),
            ),
            // ICMPv6 neighbor solicitation and advertisement
            (
                "1:dGHyGvjMfljg6Bppwm3bg0LO8TY=",
                icmp_meta(
                    Protocol::Icmp6,
                    "fe80::200:86ff:fe05:80da",
                    "fe80::260:97ff:fe07:69ea",
                    ICMP6_NEIGHBOR_SOLICITATION,
                    0,
                ),
            ),
            (
                "1:dGHyGvjMfljg6Bppwm3bg0LO8TY=",
                icmp_meta(
                    Protocol::Icmp6,
                    "fe80::260:97ff:fe07:69ea",
                    "fe80::200:86ff:fe05:80da",
                    ICMP6_NEIGHBOR_ADVERTISEMENT,
                    0,
                ),
            ),
        ] {
            assert_eq!(hasher.hash(&meta), expected, "meta: {meta:?}");
        }
    }

    #[test]
    fn test_hash_seed_changes_output() {
        let meta = tcp_udp_meta(Protocol::Tcp, "10.0.0.1", 50000, "10.0.0.2", 80);
        assert_ne!(Hasher::new(0).hash(&meta), Hasher::new(1).hash(&meta));
    }

    #[test]
    fn test_hash_mapped_v4_equals_plain_v4() {
        let plain = tcp_udp_meta(Protocol::Tcp, "10.0.0.1", 50000, "10.0.0.2", 80);
        let mapped = tcp_udp_meta(Protocol::Tcp, "::ffff:10.0.0.1", 50000, "::ffff:10.0.0.2", 80);
        let hasher = Hasher::new(0);
        assert_eq!(hasher.hash(&plain), hasher.hash(&mapped));
    }

    #[test]
    fn test_hash_same_ip_orders_by_port() {
        let hasher = Hasher::new(0);
        let a = tcp_udp_meta(Protocol::Udp, "10.0.0.1", 1000, "10.0.0.1", 2000);
        let b = tcp_udp_meta(Protocol::Udp, "10.0.0.1", 2000, "10.0.0.1", 1000);
        assert_eq!(hasher.hash(&a), hasher.hash(&b));
    }
}
