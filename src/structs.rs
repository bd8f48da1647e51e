use std::fmt::{self, Display};
use std::net::IpAddr;

/// The side of a flow that sent a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The side that sent the first payload-bearing packet (usually the client)
    Originator,
    /// The other side (usually the server)
    Responder,
}

impl Direction {
    pub fn into_reverse(self) -> Direction {
        match self {
            Direction::Originator => Direction::Responder,
            Direction::Responder => Direction::Originator,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Originator => write!(f, "originator"),
            Direction::Responder => write!(f, "responder"),
        }
    }
}

/// One record of a payload trace: who sent it, and the bytes that were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(direction: Direction, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            direction,
            payload: payload.into(),
        }
    }

    pub fn originator(payload: impl Into<Vec<u8>>) -> Self {
        Frame::new(Direction::Originator, payload)
    }

    pub fn responder(payload: impl Into<Vec<u8>>) -> Self {
        Frame::new(Direction::Responder, payload)
    }
}

/// How a packet relates to a reference flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Same flow, same direction
    Forward,
    /// Same flow, opposite direction
    Reverse,
    /// Another flow
    Foreign,
}

/// Identifies a flow by its network endpoints and, optionally, its transport ports.
///
/// The derived equality is directional. Use [`FlowKey::same_flow`] for the
/// direction-insensitive identity and [`FlowKey::orientation_against`] to know
/// in which direction a packet travels.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    /// (source port, destination port)
    pub ports: Option<(u16, u16)>,
}

impl FlowKey {
    pub fn network(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        FlowKey {
            src_ip,
            dst_ip,
            ports: None,
        }
    }

    pub fn transport(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        FlowKey {
            src_ip,
            dst_ip,
            ports: Some((src_port, dst_port)),
        }
    }

    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            ports: self.ports.map(|(s, d)| (d, s)),
        }
    }

    /// A flow and its reverse are the same flow
    pub fn same_flow(&self, other: &FlowKey) -> bool {
        self == other || *self == other.reversed()
    }

    pub fn orientation_against(&self, reference: &FlowKey) -> Orientation {
        if self == reference {
            Orientation::Forward
        } else if self.same_flow(reference) {
            Orientation::Reverse
        } else {
            Orientation::Foreign
        }
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ports {
            Some((src_port, dst_port)) => write!(
                f,
                "{}:{} -> {}:{}",
                self.src_ip, src_port, self.dst_ip, dst_port
            ),
            None => write!(f, "{} -> {}", self.src_ip, self.dst_ip),
        }
    }
}
