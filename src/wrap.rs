use crate::error::{Error, Result};
use crate::structs::*;
use crate::tcp::EndpointConfig;

use pcap_file::DataLink;
use pnet::util::MacAddr;
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket, MutableEthernetPacket};
use std::str::FromStr;

/// IP version of the recorded network packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    /// Read from the first nibble of each packet
    #[default]
    Auto,
    V4,
    V6,
}

impl FromStr for IpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "auto" => Ok(IpVersion::Auto),
            "4" => Ok(IpVersion::V4),
            "6" => Ok(IpVersion::V6),
            _ => Err(format!("unknown IP version {s} (expected 0, 4 or 6)")),
        }
    }
}

impl IpVersion {
    /// Anything that does not announce version 4 is taken as IPv6
    pub fn ethertype_of(self, packet: &[u8]) -> Result<EtherType> {
        match self {
            IpVersion::V4 => Ok(EtherTypes::Ipv4),
            IpVersion::V6 => Ok(EtherTypes::Ipv6),
            IpVersion::Auto => match packet.first() {
                Some(b) if b >> 4 == 4 => Ok(EtherTypes::Ipv4),
                Some(_) => Ok(EtherTypes::Ipv6),
                None => Err(Error::MalformedInput(
                    "empty network packet, cannot guess its IP version".to_string(),
                )),
            },
        }
    }
}

/// Prepend an Ethernet header to a network-layer packet
pub fn wrap_network_packet(
    packet: &[u8],
    version: IpVersion,
    source: MacAddr,
    destination: MacAddr,
) -> Result<Vec<u8>> {
    let ethertype = version.ethertype_of(packet)?;
    let mut frame = vec![0u8; EthernetPacket::minimum_packet_size() + packet.len()];
    let mut eth_packet =
        MutableEthernetPacket::new(&mut frame).ok_or(Error::Serialization { layer: "Ethernet" })?;
    eth_packet.set_source(source);
    eth_packet.set_destination(destination);
    eth_packet.set_ethertype(ethertype);
    eth_packet.set_payload(packet);
    Ok(frame)
}

/// Turns recorded network packets back into capture frames
#[derive(Debug, Clone, Copy)]
pub struct HeaderWrapper {
    pub version: IpVersion,
    /// Write the packets without any link layer
    pub raw_link: bool,
    pub originator: MacAddr,
    pub responder: MacAddr,
}

impl HeaderWrapper {
    pub fn new(
        version: IpVersion,
        raw_link: bool,
        originator: &EndpointConfig,
        responder: &EndpointConfig,
    ) -> Self {
        HeaderWrapper {
            version,
            raw_link,
            originator: originator.mac,
            responder: responder.mac,
        }
    }

    /// Link type of the frames produced by [`HeaderWrapper::wrap`]
    pub fn datalink(&self) -> DataLink {
        if self.raw_link {
            DataLink::RAW
        } else {
            DataLink::ETHERNET
        }
    }

    pub fn wrap(&self, frame: &Frame) -> Result<Vec<u8>> {
        if self.raw_link {
            if frame.payload.is_empty() {
                return Err(Error::MalformedInput("empty network packet".to_string()));
            }
            return Ok(frame.payload.clone());
        }
        let (source, destination) = match frame.direction {
            Direction::Originator => (self.originator, self.responder),
            Direction::Responder => (self.responder, self.originator),
        };
        wrap_network_packet(&frame.payload, self.version, source, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::SessionConfig;
    use pnet_packet::Packet;

    fn wrapper(version: IpVersion, raw_link: bool) -> HeaderWrapper {
        let config = SessionConfig::default();
        HeaderWrapper::new(version, raw_link, &config.originator, &config.responder)
    }

    #[test]
    fn ethertype_from_first_nibble() {
        let v4 = [0x45u8, 0, 0, 20];
        let v6 = [0x60u8, 0, 0, 0];
        let frame = wrapper(IpVersion::Auto, false)
            .wrap(&Frame::originator(v4.to_vec()))
            .unwrap();
        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);
        assert_eq!(eth.get_source(), MacAddr::new(0, 0, 0, 0, 0, 1));
        assert_eq!(eth.payload(), &v4);

        let frame = wrapper(IpVersion::Auto, false)
            .wrap(&Frame::responder(v6.to_vec()))
            .unwrap();
        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_ethertype(), EtherTypes::Ipv6);
        assert_eq!(eth.get_source(), MacAddr::new(0, 0, 0, 0, 0, 2));

        // an unknown version is taken as IPv6
        assert_eq!(IpVersion::Auto.ethertype_of(&[0x00]).unwrap(), EtherTypes::Ipv6);
    }

    #[test]
    fn forced_version() {
        let frame = wrapper(IpVersion::V4, false)
            .wrap(&Frame::originator(vec![0x60, 1, 2]))
            .unwrap();
        assert_eq!(
            EthernetPacket::new(&frame).unwrap().get_ethertype(),
            EtherTypes::Ipv4
        );
        assert_eq!("6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert!("5".parse::<IpVersion>().is_err());
    }

    #[test]
    fn empty_packet() {
        assert!(matches!(
            wrapper(IpVersion::Auto, false).wrap(&Frame::originator(Vec::new())),
            Err(Error::MalformedInput(_))
        ));
        // a forced version does not need to look at the packet
        assert_eq!(
            wrapper(IpVersion::V6, false)
                .wrap(&Frame::originator(Vec::new()))
                .unwrap()
                .len(),
            14
        );
    }

    #[test]
    fn raw_link_keeps_the_packet() {
        let w = wrapper(IpVersion::Auto, true);
        assert_eq!(w.datalink(), DataLink::RAW);
        assert_eq!(
            w.wrap(&Frame::responder(vec![0x45, 9, 9])).unwrap(),
            vec![0x45, 9, 9]
        );
    }
}
