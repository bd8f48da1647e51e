use crate::error::{Error, Result};
use crate::sink::PacketSink;
use crate::structs::*;

use pnet::util::MacAddr;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet_packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};
use rand_core::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use std::net::Ipv4Addr;
use std::num::Wrapping;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source ports are drawn from [EPHEMERAL_PORT_START, EPHEMERAL_PORT_START + EPHEMERAL_PORT_COUNT)
pub const EPHEMERAL_PORT_START: u16 = 32000;
pub const EPHEMERAL_PORT_COUNT: u16 = 32000;

/// Largest payload that fits in an IPv4 packet with 20-byte IP and TCP headers
pub const MAX_MSS: usize = u16::MAX as usize - 40;

const IPV4_DONT_FRAGMENT: u8 = 0b010;

/// Lifecycle of a synthesized session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Established,
    Closing,
    Closed,
}

/// Addresses of one side of the synthesized session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

/// Parameters of the synthesized sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub originator: EndpointConfig,
    pub responder: EndpointConfig,
    /// Advertised receive window of both sides
    pub window: u16,
    /// Largest payload of a single segment
    pub mss: usize,
    pub ttl: u8,
    /// Pause between consecutive segments of the same payload
    pub segment_delay: Duration,
    /// Seed of the initial sequence numbers and ephemeral ports. Uses the clock if None.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            originator: EndpointConfig {
                mac: MacAddr::new(0, 0, 0, 0, 0, 1),
                ip: Ipv4Addr::new(10, 0, 0, 1),
            },
            responder: EndpointConfig {
                mac: MacAddr::new(0, 0, 0, 0, 0, 2),
                ip: Ipv4Addr::new(10, 0, 0, 2),
            },
            window: 65535,
            mss: 1400,
            ttl: 64,
            segment_delay: Duration::from_millis(1),
            seed: None,
        }
    }
}

/// TCP bookkeeping of one side of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Initial sequence number
    pub isn: Wrapping<u32>,
    /// Sequence number of the next byte to send
    pub seq: Wrapping<u32>,
    /// Next byte expected from the peer
    pub ack: Wrapping<u32>,
    /// Flags of the next segment
    pub flags: u8,
    pub identification: Wrapping<u16>,
}

impl EndpointState {
    pub fn new(mac: MacAddr, ip: Ipv4Addr, isn: u32) -> Self {
        EndpointState {
            mac,
            ip,
            port: 0,
            isn: Wrapping(isn),
            seq: Wrapping(isn),
            ack: Wrapping(0),
            flags: 0,
            identification: Wrapping(0),
        }
    }

    /// Sequence space consumed so far (payload, SYN and FIN)
    pub fn consumed(&self) -> u32 {
        (self.seq - self.isn).0
    }
}

fn setup_ethernet_frame(packet: &mut [u8], src: &EndpointState, dst: &EndpointState) -> Option<()> {
    let mut eth_packet = MutableEthernetPacket::new(packet)?;
    eth_packet.set_ethertype(EtherTypes::Ipv4);
    eth_packet.set_source(src.mac);
    eth_packet.set_destination(dst.mac);
    Some(())
}

fn setup_ip_packet(
    packet: &mut [u8],
    src: &EndpointState,
    dst: &EndpointState,
    ttl: u8,
) -> Option<()> {
    let len = u16::try_from(packet.len()).ok()?;
    let mut ipv4_packet = MutableIpv4Packet::new(packet)?;
    ipv4_packet.set_version(4);
    ipv4_packet.set_header_length(5);
    ipv4_packet.set_total_length(len);
    ipv4_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ipv4_packet.set_identification(src.identification.0);
    ipv4_packet.set_flags(IPV4_DONT_FRAGMENT);
    ipv4_packet.set_ttl(ttl);
    ipv4_packet.set_source(src.ip);
    ipv4_packet.set_destination(dst.ip);
    ipv4_packet.set_checksum(ipv4::checksum(&ipv4_packet.to_immutable()));
    Some(())
}

/// The acknowledgement number is only filled in when the ACK flag is set
fn setup_tcp_packet(
    packet: &mut [u8],
    src: &EndpointState,
    dst: &EndpointState,
    flags: u8,
    payload: &[u8],
    window: u16,
) -> Option<()> {
    let mut tcp_packet = MutableTcpPacket::new(packet)?;
    tcp_packet.set_source(src.port);
    tcp_packet.set_destination(dst.port);
    tcp_packet.set_sequence(src.seq.0);
    if flags & TcpFlags::ACK != 0 {
        tcp_packet.set_acknowledgement(src.ack.0);
    }
    tcp_packet.set_data_offset(5);
    tcp_packet.set_flags(flags);
    tcp_packet.set_window(window);
    tcp_packet.set_payload(payload);
    tcp_packet.set_checksum(tcp::ipv4_checksum(
        &tcp_packet.to_immutable(),
        &src.ip,
        &dst.ip,
    ));
    Some(())
}

/// Serialize an Ethernet/IPv4/TCP frame sent by `src` to `dst`, with checksums
/// and length fields computed from the actual content.
pub fn build_frame(
    src: &EndpointState,
    dst: &EndpointState,
    flags: u8,
    payload: &[u8],
    ttl: u8,
    window: u16,
) -> Result<Vec<u8>> {
    let ip_start = EthernetPacket::minimum_packet_size();
    let tcp_start = ip_start + Ipv4Packet::minimum_packet_size();
    let packet_size = tcp_start + TcpPacket::minimum_packet_size() + payload.len();
    let mut packet = vec![0u8; packet_size];

    setup_ethernet_frame(&mut packet, src, dst).ok_or(Error::Serialization { layer: "Ethernet" })?;
    // the IPv4 checksum covers the header only, so the TCP segment can be written afterwards
    setup_ip_packet(&mut packet[ip_start..], src, dst, ttl)
        .ok_or(Error::Serialization { layer: "IPv4" })?;
    setup_tcp_packet(&mut packet[tcp_start..], src, dst, flags, payload, window)
        .ok_or(Error::Serialization { layer: "TCP" })?;
    Ok(packet)
}

/// Synthesizes one TCP session, from handshake to teardown, into a packet sink.
///
/// The session keeps the acknowledgement number of each side equal to the
/// sequence number the other side will use next: SYN and FIN consume one unit
/// of sequence space, payloads consume their length.
pub struct TcpSession<S: PacketSink> {
    sink: S,
    state: SessionState,
    originator: EndpointState,
    responder: EndpointState,
    rng: Pcg32,
    window: u16,
    mss: usize,
    ttl: u8,
    segment_delay: Duration,
    emitted: usize,
}

impl<S: PacketSink> TcpSession<S> {
    pub fn new(config: &SessionConfig, sink: S) -> Self {
        let seed = config.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        });
        let mut rng = Pcg32::seed_from_u64(seed);
        let originator =
            EndpointState::new(config.originator.mac, config.originator.ip, rng.next_u32());
        let responder =
            EndpointState::new(config.responder.mac, config.responder.ip, rng.next_u32());
        TcpSession {
            sink,
            state: SessionState::Idle,
            originator,
            responder,
            rng,
            window: config.window,
            mss: config.mss.clamp(1, MAX_MSS),
            ttl: config.ttl,
            segment_delay: config.segment_delay,
            emitted: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn originator(&self) -> &EndpointState {
        &self.originator
    }

    pub fn responder(&self) -> &EndpointState {
        &self.responder
    }

    /// Number of frames written into the sink
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Let time pass between two records
    pub fn idle(&mut self, duration: Duration) {
        self.sink.idle(duration);
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    /// (sender, peer)
    fn sides(&mut self, direction: Direction) -> (&mut EndpointState, &mut EndpointState) {
        match direction {
            Direction::Originator => (&mut self.originator, &mut self.responder),
            Direction::Responder => (&mut self.responder, &mut self.originator),
        }
    }

    /// Write one segment from `direction` with its current flags.
    /// Any failure closes the session for good.
    fn emit(&mut self, direction: Direction, payload: &[u8]) -> Result<()> {
        let (src, dst) = match direction {
            Direction::Originator => (&self.originator, &self.responder),
            Direction::Responder => (&self.responder, &self.originator),
        };
        let result = build_frame(src, dst, src.flags, payload, self.ttl, self.window)
            .and_then(|frame| self.sink.write_frame(&frame));
        if let Err(e) = result {
            log::debug!("Session aborted in state {:?}", self.state);
            self.state = SessionState::Closed;
            return Err(e);
        }
        let (sender, _) = self.sides(direction);
        sender.identification += Wrapping(1);
        self.emitted += 1;
        Ok(())
    }

    /// Three-way handshake. A source port of 0 is replaced by a random ephemeral port.
    pub fn connect(&mut self, source_port: u16, dest_port: u16) -> Result<()> {
        self.expect_state(SessionState::Idle, "connect")?;
        self.state = SessionState::Handshaking;
        let source_port = if source_port == 0 {
            EPHEMERAL_PORT_START + (self.rng.next_u32() % EPHEMERAL_PORT_COUNT as u32) as u16
        } else {
            source_port
        };
        log::info!("Generating initial connection from {source_port} to {dest_port}");
        self.originator.port = source_port;
        self.responder.port = dest_port;

        // SYN
        self.originator.flags = TcpFlags::SYN;
        self.emit(Direction::Originator, &[])?;
        self.originator.seq += Wrapping(1);

        // SYN+ACK
        self.responder.flags = TcpFlags::SYN | TcpFlags::ACK;
        self.responder.ack = self.originator.seq;
        self.emit(Direction::Responder, &[])?;
        self.responder.seq += Wrapping(1);

        // ACK
        self.originator.flags = TcpFlags::ACK;
        self.originator.ack = self.responder.seq;
        self.emit(Direction::Originator, &[])?;

        self.state = SessionState::Established;
        Ok(())
    }

    /// Send a payload from one side, split into segments of at most `mss` bytes.
    /// With `auto_ack`, the peer acknowledges every segment with an empty ACK.
    /// Returns the number of data segments.
    pub fn write(&mut self, payload: &[u8], direction: Direction, auto_ack: bool) -> Result<usize> {
        self.expect_state(SessionState::Established, "write")?;
        if payload.is_empty() {
            log::trace!("Empty {direction} payload: nothing to send");
            return Ok(0);
        }
        let mut segments = 0;
        for chunk in payload.chunks(self.mss) {
            if segments > 0 {
                self.sink.idle(self.segment_delay);
            }
            log::debug!("{direction} sending {} bytes", chunk.len());
            let (sender, _) = self.sides(direction);
            sender.flags = TcpFlags::ACK | TcpFlags::PSH;
            self.emit(direction, chunk)?;
            let (sender, peer) = self.sides(direction);
            sender.seq += Wrapping(chunk.len() as u32);
            peer.ack += Wrapping(chunk.len() as u32);
            segments += 1;

            if auto_ack {
                let (_, peer) = self.sides(direction);
                peer.flags = TcpFlags::ACK;
                self.emit(direction.into_reverse(), &[])?;
            }
        }
        Ok(segments)
    }

    /// Four-way teardown initiated by the originator
    pub fn close(&mut self) -> Result<()> {
        self.expect_state(SessionState::Established, "close")?;
        self.state = SessionState::Closing;

        // originator FIN
        self.originator.flags = TcpFlags::FIN | TcpFlags::ACK;
        self.emit(Direction::Originator, &[])?;
        self.originator.seq += Wrapping(1);

        // responder acknowledges the FIN
        self.responder.ack += Wrapping(1);
        self.responder.flags = TcpFlags::ACK;
        self.emit(Direction::Responder, &[])?;

        // responder FIN
        self.responder.flags = TcpFlags::FIN | TcpFlags::ACK;
        self.emit(Direction::Responder, &[])?;
        self.responder.seq += Wrapping(1);

        // originator acknowledges the FIN
        self.originator.ack += Wrapping(1);
        self.originator.flags = TcpFlags::ACK;
        self.emit(Direction::Originator, &[])?;

        self.state = SessionState::Closed;
        log::debug!(
            "Session closed: originator sent {} bytes, responder sent {} bytes",
            self.originator.consumed().wrapping_sub(2),
            self.responder.consumed().wrapping_sub(2)
        );
        Ok(())
    }
}
