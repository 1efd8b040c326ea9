//! Per-packet flow samples decoded from captured frames.

use std::fmt;
use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::flow::FlowMeta;
use crate::protos::Protocol;
use crate::{FlowsightError, Result};

/// Flow data of a single IP packet, annotated with TCP/UDP or ICMP metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub transport: Protocol,
    pub icmp_type: u16,
    pub icmp_code: u16,
    pub src_port: u16,
    pub dst_port: u16,
    pub src: IpAddr,
    pub dst: IpAddr,
    /// Packet size as reported by the IP header: total length for IPv4,
    /// payload length for IPv6.
    pub bytes: u16,
}

impl Sample {
    /// Decodes an Ethernet frame into a sample. IPv4 is preferred over IPv6;
    /// anything else is rejected as not an IP packet.
    pub fn from_frame(frame: &[u8]) -> Result<Sample> {
        let sliced = SlicedPacket::from_ethernet(frame).map_err(|_| FlowsightError::NotIpPacket)?;

        let (src, dst, bytes) = match &sliced.net {
            Some(NetSlice::Ipv4(v4)) => (
                IpAddr::V4(v4.header().source_addr()),
                IpAddr::V4(v4.header().destination_addr()),
                v4.header().total_len(),
            ),
            Some(NetSlice::Ipv6(v6)) => (
                IpAddr::V6(v6.header().source_addr()),
                IpAddr::V6(v6.header().destination_addr()),
                v6.header().payload_length(),
            ),
            None => return Err(FlowsightError::NotIpPacket),
        };

        let (src_port, dst_port, icmp_type, icmp_code, transport) = transport_meta(&sliced);

        Ok(Sample {
            transport,
            icmp_type,
            icmp_code,
            src_port,
            dst_port,
            src,
            dst,
            bytes,
        })
    }

    /// Projects the flow tuple out of the sample.
    pub fn flow_meta(&self) -> FlowMeta {
        FlowMeta {
            transport: self.transport,
            src: self.src,
            dst: self.dst,
            src_port: self.src_port,
            dst_port: self.dst_port,
            icmp_type: self.icmp_type,
            icmp_code: self.icmp_code,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PROTOCOL: {} [{}]:{} -> [{}]:{}",
            self.transport, self.src, self.src_port, self.dst, self.dst_port
        )
    }
}

/// L4 metadata with preference TCP -> UDP -> ICMPv4 -> ICMPv6.
fn transport_meta(sliced: &SlicedPacket) -> (u16, u16, u16, u16, Protocol) {
    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            tcp.source_port(),
            tcp.destination_port(),
            0,
            0,
            Protocol::Tcp,
        ),
        Some(TransportSlice::Udp(udp)) => (
            udp.source_port(),
            udp.destination_port(),
            0,
            0,
            Protocol::Udp,
        ),
        Some(TransportSlice::Icmpv4(icmp)) => (
            0,
            0,
            u16::from(icmp.type_u8()),
            u16::from(icmp.code_u8()),
            Protocol::Icmp4,
        ),
        Some(TransportSlice::Icmpv6(icmp)) => (
            0,
            0,
            u16::from(icmp.type_u8()),
            u16::from(icmp.code_u8()),
            Protocol::Icmp6,
        ),
        None => (0, 0, 0, 0, Protocol::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 1];
    const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 2];

    #[test]
    fn test_tcp_ipv4_frame() {
        let payload = [0u8; 100];
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(34855, 80, 1000, 4096);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let sample = Sample::from_frame(&frame).unwrap();
        assert_eq!(sample.transport, Protocol::Tcp);
        assert_eq!(sample.src, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(sample.dst, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(sample.src_port, 34855);
        assert_eq!(sample.dst_port, 80);
        // IPv4 header total length: 20 (IP) + 20 (TCP) + payload
        assert_eq!(sample.bytes, 20 + 20 + 100);
        assert_eq!((sample.icmp_type, sample.icmp_code), (0, 0));
    }

    #[test]
    fn test_udp_ipv6_frame() {
        let payload = [0u8; 48];
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv6(
                [0x20, 0, 0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 0, 0, 0x23, 0x45],
                [0x20, 0, 0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 0, 0, 0x12, 0x34],
                64,
            )
            .udp(54585, 53);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let sample = Sample::from_frame(&frame).unwrap();
        assert_eq!(sample.transport, Protocol::Udp);
        assert_eq!(sample.src_port, 54585);
        assert_eq!(sample.dst_port, 53);
        // IPv6 payload length: 8 (UDP header) + payload
        assert_eq!(sample.bytes, 8 + 48);
    }

    #[test]
    fn test_icmp4_echo_request_frame() {
        let payload = [0u8; 16];
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([192, 168, 0, 89], [192, 168, 0, 1], 64)
            .icmpv4_echo_request(7, 1);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let sample = Sample::from_frame(&frame).unwrap();
        assert_eq!(sample.transport, Protocol::Icmp4);
        assert_eq!(sample.icmp_type, 8);
        assert_eq!(sample.icmp_code, 0);
        assert_eq!((sample.src_port, sample.dst_port), (0, 0));
    }

    #[test]
    fn test_non_ip_frame_rejected() {
        // Ethernet header with an ARP ethertype and no parseable payload
        let mut frame = Vec::new();
        frame.extend_from_slice(&MAC_B);
        frame.extend_from_slice(&MAC_A);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0u8; 28]);

        assert!(matches!(
            Sample::from_frame(&frame),
            Err(FlowsightError::NotIpPacket)
        ));
    }

    #[test]
    fn test_flow_meta_projection() {
        let sample = Sample {
            transport: Protocol::Tcp,
            icmp_type: 0,
            icmp_code: 0,
            src_port: 123,
            dst_port: 345,
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            bytes: 64,
        };
        let meta = sample.flow_meta();
        assert_eq!(meta.transport, Protocol::Tcp);
        assert_eq!(meta.src, sample.src);
        assert_eq!(meta.dst_port, 345);
    }

    #[test]
    fn test_display() {
        let sample = Sample {
            transport: Protocol::Udp,
            icmp_type: 0,
            icmp_code: 0,
            src_port: 123,
            dst_port: 53,
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            bytes: 64,
        };
        assert_eq!(sample.to_string(), "PROTOCOL: udp [10.0.0.1]:123 -> [10.0.0.2]:53");
    }
}
