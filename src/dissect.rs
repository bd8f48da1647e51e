use crate::structs::*;
use pcap_file::DataLink;
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::sll::SLLPacket;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use pnet_packet::vlan::VlanPacket;
use std::net::IpAddr;

const NULL_HEADER_SIZE: usize = 4;
const IPV6_HEADER_SIZE: usize = 40;

/// What a captured frame exposes to the flow classifier.
///
/// Every layer is optional: a frame that is not IP has no network key, an IP
/// packet that is neither TCP nor UDP has no ports and no payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dissection<'a> {
    /// Network endpoints of the packet
    pub network: Option<FlowKey>,
    /// Transport (source, destination) ports
    pub ports: Option<(u16, u16)>,
    /// The whole network-layer packet, link-layer padding excluded
    pub network_packet: Option<&'a [u8]>,
    /// The transport payload, possibly empty
    pub payload: Option<&'a [u8]>,
}

impl Dissection<'_> {
    /// Network key extended with the transport ports
    pub fn transport_key(&self) -> Option<FlowKey> {
        let network = self.network?;
        let (src_port, dst_port) = self.ports?;
        Some(FlowKey::transport(
            network.src_ip,
            src_port,
            network.dst_ip,
            dst_port,
        ))
    }
}

/// Guess the EtherType of a bare IP packet from its version nibble
fn ethertype_from_version(packet: &[u8]) -> Option<EtherType> {
    match packet.first()? >> 4 {
        4 => Some(EtherTypes::Ipv4),
        6 => Some(EtherTypes::Ipv6),
        _ => None,
    }
}

/// Strip the link layer and return the EtherType of what follows
fn strip_link(link: DataLink, data: &[u8]) -> Option<(EtherType, &[u8])> {
    match link {
        DataLink::ETHERNET => {
            let eth_packet = EthernetPacket::new(data)?;
            let mut offset = EthernetPacket::minimum_packet_size();
            let mut ethertype = eth_packet.get_ethertype();
            // a single 802.1Q tag
            if ethertype == EtherTypes::Vlan {
                let vlan_packet = VlanPacket::new(&data[offset..])?;
                ethertype = vlan_packet.get_ethertype();
                offset += VlanPacket::minimum_packet_size();
            }
            Some((ethertype, &data[offset..]))
        }
        DataLink::LINUX_SLL => {
            let sll_packet = SLLPacket::new(data)?;
            Some((
                sll_packet.get_protocol(),
                &data[SLLPacket::minimum_packet_size()..],
            ))
        }
        DataLink::NULL | DataLink::LOOP => {
            let ip = data.get(NULL_HEADER_SIZE..)?;
            Some((ethertype_from_version(ip)?, ip))
        }
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => {
            Some((ethertype_from_version(data)?, data))
        }
        _ => None,
    }
}

fn dissect_transport<'a>(
    dissection: &mut Dissection<'a>,
    protocol: IpNextHeaderProtocol,
    segment: &'a [u8],
) {
    match protocol {
        IpNextHeaderProtocols::Tcp => {
            if let Some(tcp_packet) = TcpPacket::new(segment) {
                let header_len = tcp_packet.get_data_offset() as usize * 4;
                dissection.ports = Some((tcp_packet.get_source(), tcp_packet.get_destination()));
                dissection.payload = segment.get(header_len..);
            }
        }
        IpNextHeaderProtocols::Udp => {
            if let Some(udp_packet) = UdpPacket::new(segment) {
                let end = (udp_packet.get_length() as usize).clamp(8, segment.len());
                dissection.ports = Some((udp_packet.get_source(), udp_packet.get_destination()));
                dissection.payload = segment.get(UdpPacket::minimum_packet_size()..end);
            }
        }
        _ => log::trace!("Unsupported transport protocol {protocol:?}"),
    }
}

/// Extract the flow key and the payloads of a captured frame
pub fn dissect(link: DataLink, data: &[u8]) -> Dissection<'_> {
    let mut dissection = Dissection::default();
    let Some((ethertype, ip)) = strip_link(link, data) else {
        return dissection;
    };
    match ethertype {
        EtherTypes::Ipv4 => {
            let Some(ipv4_packet) = Ipv4Packet::new(ip) else {
                return dissection;
            };
            let header_len = ipv4_packet.get_header_length() as usize * 4;
            if header_len < Ipv4Packet::minimum_packet_size() || header_len > ip.len() {
                return dissection;
            }
            let total_len = (ipv4_packet.get_total_length() as usize).clamp(header_len, ip.len());
            let ip = &ip[..total_len];
            dissection.network = Some(FlowKey::network(
                IpAddr::V4(ipv4_packet.get_source()),
                IpAddr::V4(ipv4_packet.get_destination()),
            ));
            dissection.network_packet = Some(ip);
            dissect_transport(
                &mut dissection,
                ipv4_packet.get_next_level_protocol(),
                &ip[header_len..],
            );
        }
        EtherTypes::Ipv6 => {
            let Some(ipv6_packet) = Ipv6Packet::new(ip) else {
                return dissection;
            };
            let total_len =
                (IPV6_HEADER_SIZE + ipv6_packet.get_payload_length() as usize).min(ip.len());
            let ip = &ip[..total_len];
            dissection.network = Some(FlowKey::network(
                IpAddr::V6(ipv6_packet.get_source()),
                IpAddr::V6(ipv6_packet.get_destination()),
            ));
            dissection.network_packet = Some(ip);
            // extension headers are not followed
            dissect_transport(
                &mut dissection,
                ipv6_packet.get_next_header(),
                &ip[IPV6_HEADER_SIZE..],
            );
        }
        _ => log::trace!("Unsupported network protocol {ethertype:?}"),
    }
    dissection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::{build_frame, EndpointState};
    use pnet_packet::tcp::TcpFlags;
    use std::net::Ipv4Addr;

    fn endpoints() -> (EndpointState, EndpointState) {
        let mut a = EndpointState::new(
            "00:00:00:00:00:01".parse().unwrap(),
            Ipv4Addr::new(10, 0, 0, 1),
            100,
        );
        let mut b = EndpointState::new(
            "00:00:00:00:00:02".parse().unwrap(),
            Ipv4Addr::new(10, 0, 0, 2),
            200,
        );
        a.port = 40000;
        b.port = 80;
        (a, b)
    }

    #[test]
    fn ethernet_tcp_frame() {
        let (a, b) = endpoints();
        let frame = build_frame(&a, &b, TcpFlags::ACK | TcpFlags::PSH, b"hello", 64, 65535).unwrap();
        let d = dissect(DataLink::ETHERNET, &frame);
        assert_eq!(
            d.transport_key(),
            Some(FlowKey::transport(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                40000,
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                80
            ))
        );
        assert_eq!(d.payload, Some(&b"hello"[..]));
        assert_eq!(d.network_packet, Some(&frame[14..]));
    }

    #[test]
    fn raw_link_and_padding() {
        let (a, b) = endpoints();
        let frame = build_frame(&a, &b, TcpFlags::ACK, b"", 64, 65535).unwrap();
        let mut raw = frame[14..].to_vec();
        // trailing bytes beyond the IPv4 total length are not part of the packet
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let d = dissect(DataLink::RAW, &raw);
        assert_eq!(d.payload, Some(&b""[..]));
        assert_eq!(d.network_packet, Some(&frame[14..]));
    }

    #[test]
    fn not_ip() {
        let d = dissect(DataLink::ETHERNET, &[0xff; 60]);
        assert_eq!(d, Dissection::default());
        let d = dissect(DataLink::RAW, &[]);
        assert!(d.network.is_none());
    }
}
