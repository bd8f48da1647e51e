use crate::dissect::Dissection;
use crate::structs::*;

/// Which key identifies the reference flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum KeyMode {
    /// IP addresses only
    Network,
    /// IP addresses and transport ports
    #[default]
    Transport,
}

impl KeyMode {
    /// Network packets are recorded whether or not they carry ports
    pub fn default_for(content: Content) -> KeyMode {
        match content {
            Content::Application => KeyMode::Transport,
            Content::Network => KeyMode::Network,
        }
    }
}

/// What a frame records for each packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Content {
    /// The transport payload
    #[default]
    Application,
    /// The whole network-layer packet, headers included
    Network,
}

/// What to do with payloads that belong to neither direction of the reference flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForeignPolicy {
    /// Record them as responder frames
    #[default]
    Responder,
    /// Leave them out of the trace
    Skip,
}

/// Output of a classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// All the packets seen, payload or not
    pub total_packets: usize,
    /// Frames in capture order
    pub frames: Vec<Frame>,
}

/// Assigns every payload-bearing packet of a capture to the originator or the
/// responder, the originator being the sender of the first payload seen.
#[derive(Debug, Clone, Default)]
pub struct FlowClassifier {
    key_mode: KeyMode,
    content: Content,
    foreign: ForeignPolicy,
    reference: Option<FlowKey>,
    total_packets: usize,
    skipped_packets: usize,
}

impl FlowClassifier {
    pub fn new(key_mode: KeyMode, content: Content, foreign: ForeignPolicy) -> Self {
        FlowClassifier {
            key_mode,
            content,
            foreign,
            ..Default::default()
        }
    }

    /// The flow of the first payload-bearing packet, once seen
    pub fn reference(&self) -> Option<&FlowKey> {
        self.reference.as_ref()
    }

    pub fn total_packets(&self) -> usize {
        self.total_packets
    }

    /// Packets without a usable network or transport layer
    pub fn skipped_packets(&self) -> usize {
        self.skipped_packets
    }

    fn key(&self, packet: &Dissection) -> Option<FlowKey> {
        match self.key_mode {
            KeyMode::Network => packet.network,
            KeyMode::Transport => packet.transport_key(),
        }
    }

    fn content<'a>(&self, packet: &Dissection<'a>) -> Option<&'a [u8]> {
        match self.content {
            Content::Application => packet.payload,
            Content::Network => packet.network_packet,
        }
    }

    /// Classify one packet. Returns a frame if the packet carries a payload.
    pub fn classify<'a>(&mut self, packet: &Dissection<'a>) -> Option<(Direction, &'a [u8])> {
        self.total_packets += 1;
        let Some(key) = self.key(packet) else {
            log::trace!("Packet {} ignored: unsupported flow", self.total_packets);
            self.skipped_packets += 1;
            return None;
        };
        let content = self.content(packet).filter(|c| !c.is_empty())?;
        let reference = *self.reference.get_or_insert_with(|| {
            log::debug!("Reference flow: {key}");
            key
        });
        let direction = match key.orientation_against(&reference) {
            Orientation::Forward => Direction::Originator,
            Orientation::Reverse => Direction::Responder,
            Orientation::Foreign => match self.foreign {
                ForeignPolicy::Responder => {
                    log::trace!("Packet of another flow ({key}) recorded as responder");
                    Direction::Responder
                }
                ForeignPolicy::Skip => {
                    log::trace!("Packet of another flow ({key}) skipped");
                    return None;
                }
            },
        };
        Some((direction, content))
    }

    /// Classify a whole capture
    pub fn run<'a>(mut self, packets: impl IntoIterator<Item = Dissection<'a>>) -> Classification {
        let frames = packets
            .into_iter()
            .filter_map(|p| self.classify(&p).map(|(d, c)| Frame::new(d, c)))
            .collect();
        Classification {
            total_packets: self.total_packets,
            frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 8));
    const SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11));

    fn packet<'a>(
        src: IpAddr,
        sport: u16,
        dst: IpAddr,
        dport: u16,
        payload: &'a [u8],
    ) -> Dissection<'a> {
        Dissection {
            network: Some(FlowKey::network(src, dst)),
            ports: Some((sport, dport)),
            network_packet: Some(payload),
            payload: Some(payload),
        }
    }

    #[test]
    fn first_payload_sets_the_originator() {
        let packets = vec![
            // handshake from the client, no payload: does not set the reference
            packet(SERVER, 443, CLIENT, 50000, b""),
            packet(SERVER, 443, CLIENT, 50000, b"banner"),
            packet(CLIENT, 50000, SERVER, 443, b"hello"),
            packet(SERVER, 443, CLIENT, 50000, b"world"),
        ];
        let c = FlowClassifier::default().run(packets);
        assert_eq!(c.total_packets, 4);
        assert_eq!(
            c.frames,
            vec![
                Frame::originator(b"banner".to_vec()),
                Frame::responder(b"hello".to_vec()),
                Frame::originator(b"world".to_vec()),
            ]
        );
    }

    #[test]
    fn foreign_flows() {
        let packets = || {
            vec![
                packet(CLIENT, 50000, SERVER, 443, b"a"),
                packet(OTHER, 50000, SERVER, 443, b"b"),
                packet(CLIENT, 50001, SERVER, 443, b"c"),
                packet(SERVER, 443, CLIENT, 50000, b"d"),
            ]
        };
        let c = FlowClassifier::default().run(packets());
        let directions: Vec<Direction> = c.frames.iter().map(|f| f.direction).collect();
        assert_eq!(
            directions,
            vec![
                Direction::Originator,
                Direction::Responder,
                Direction::Responder,
                Direction::Responder
            ]
        );

        let c = FlowClassifier::new(KeyMode::Transport, Content::Application, ForeignPolicy::Skip)
            .run(packets());
        assert_eq!(c.total_packets, 4);
        assert_eq!(
            c.frames,
            vec![Frame::originator(b"a".to_vec()), Frame::responder(b"d".to_vec())]
        );

        // ports are ignored in network mode: another client port is the same flow
        let c = FlowClassifier::new(KeyMode::Network, Content::Application, ForeignPolicy::Skip)
            .run(packets());
        assert_eq!(c.frames.len(), 3);
        assert_eq!(c.frames[1], Frame::originator(b"c".to_vec()));
    }

    #[test]
    fn unsupported_flows_are_counted_not_emitted() {
        let mut no_transport = packet(CLIENT, 1, SERVER, 2, b"icmp");
        no_transport.ports = None;
        no_transport.payload = None;
        let packets = vec![
            Dissection::default(),
            no_transport.clone(),
            packet(CLIENT, 50000, SERVER, 443, b"x"),
        ];
        let mut classifier = FlowClassifier::default();
        let frames: Vec<_> = packets.iter().filter_map(|p| classifier.classify(p)).collect();
        assert_eq!(frames, vec![(Direction::Originator, &b"x"[..])]);
        assert_eq!(classifier.total_packets(), 3);
        assert_eq!(classifier.skipped_packets(), 2);

        // network content keys on the addresses by default, so the packet without transport is kept
        let key_mode = KeyMode::default_for(Content::Network);
        assert_eq!(key_mode, KeyMode::Network);
        let c = FlowClassifier::new(key_mode, Content::Network, ForeignPolicy::Responder)
            .run(vec![no_transport]);
        assert_eq!(c.frames, vec![Frame::originator(b"icmp".to_vec())]);
    }

    #[test]
    fn no_payload_at_all() {
        let packets = vec![
            packet(CLIENT, 50000, SERVER, 443, b""),
            packet(SERVER, 443, CLIENT, 50000, b""),
        ];
        let mut classifier = FlowClassifier::default();
        for p in &packets {
            assert!(classifier.classify(p).is_none());
        }
        assert!(classifier.reference().is_none());
        assert_eq!(classifier.total_packets(), 2);
    }
}
