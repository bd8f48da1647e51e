use crate::codec::TraceFormat;
use crate::error::{Error, Result};
use crate::pipeline::check_distinct;
use crate::stats::Stats;
use crate::structs::*;

use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Write};
use std::fs;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

mod capture;

pub use capture::Tcpdump;

/// Records waiting for a worker before the feeder blocks
pub const CHANNEL_CAPACITY: usize = 16;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// What one worker wrote on its socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub records: usize,
    pub bytes: usize,
}

/// Options of a live replay
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub port: u16,
    /// Interface tcpdump listens on
    pub interface: String,
    /// Pause after each record
    pub record_delay: Duration,
    /// Time left to tcpdump before and after the replay
    pub settle_delay: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            port: 443,
            interface: "lo".to_string(),
            record_delay: Duration::from_millis(100),
            settle_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub records: usize,
    pub originator: WorkerReport,
    pub responder: WorkerReport,
}

/// Forward every payload of the channel to the peer, discarding what the peer sends.
/// Returns once the channel is closed and the peer is done writing.
fn pump(
    name: &str,
    mut stream: TcpStream,
    rx: Receiver<Vec<u8>>,
    ready: Sender<()>,
    stats: Arc<Stats>,
) -> Result<WorkerReport> {
    let replay_err = |e: io::Error| Error::Replay(format!("{name}: {e}"));
    let mut reader = stream.try_clone().map_err(replay_err)?;
    let drain = thread::Builder::new()
        .name(format!("{name}-drain"))
        .spawn(move || io::copy(&mut reader, &mut io::sink()))
        .map_err(replay_err)?;
    // the feeder gave up if nobody listens anymore
    let _ = ready.send(());

    let mut report = WorkerReport::default();
    for payload in rx {
        log::debug!("{name} writing {} bytes", payload.len());
        stream.write_all(&payload).map_err(replay_err)?;
        report.records += 1;
        report.bytes += payload.len();
        stats.increase(payload.len());
    }
    stream.shutdown(Shutdown::Write).map_err(replay_err)?;
    let drained = drain
        .join()
        .map_err(|_| Error::Replay(format!("{name}: drain thread panicked")))?
        .map_err(replay_err)?;
    log::trace!("{name} discarded {drained} bytes");
    Ok(report)
}

fn spawn_worker<F>(name: &str, f: F) -> Result<JoinHandle<Result<WorkerReport>>>
where
    F: FnOnce() -> Result<WorkerReport> + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| Error::Replay(format!("cannot start {name}: {e}")))
}

fn join_worker(name: &str, handle: JoinHandle<Result<WorkerReport>>) -> Result<WorkerReport> {
    handle
        .join()
        .map_err(|_| Error::Replay(format!("{name} panicked")))?
}

/// Wait for both workers, then hand every record to the side that sent it
fn feed(
    records: impl IntoIterator<Item = Result<Frame>>,
    ready: &Receiver<()>,
    tx_client: &Sender<Vec<u8>>,
    tx_server: &Sender<Vec<u8>>,
    record_delay: Duration,
) -> Result<usize> {
    for _ in 0..2 {
        ready
            .recv_timeout(READY_TIMEOUT)
            .map_err(|_| Error::Replay("replay workers are not ready".to_string()))?;
    }
    let mut count = 0;
    for record in records {
        let record = record?;
        let tx = match record.direction {
            Direction::Originator => tx_client,
            Direction::Responder => tx_server,
        };
        // a closed channel means the worker failed: its error is reported by join
        if tx.send(record.payload).is_err() {
            break;
        }
        count += 1;
        thread::sleep(record_delay);
    }
    Ok(count)
}

/// Play the records over a real TCP connection on the loopback interface.
///
/// The responder listens on `port` (0 for any free port), the originator
/// connects to it, and each record is written by the side that sent it.
pub fn replay_records(
    records: impl IntoIterator<Item = Result<Frame>>,
    port: u16,
    record_delay: Duration,
    stats: Arc<Stats>,
) -> Result<ReplayReport> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .map_err(|e| Error::Replay(format!("cannot listen on port {port}: {e}")))?;
    let addr: SocketAddr = listener
        .local_addr()
        .map_err(|e| Error::Replay(e.to_string()))?;
    log::info!("Listening on port {}", addr.port());

    let (ready_tx, ready_rx) = crossbeam_channel::bounded(2);
    let (tx_server, rx_server) = crossbeam_channel::bounded::<Vec<u8>>(CHANNEL_CAPACITY);
    let (tx_client, rx_client) = crossbeam_channel::bounded::<Vec<u8>>(CHANNEL_CAPACITY);

    let server = {
        let ready = ready_tx.clone();
        let stats = Arc::clone(&stats);
        spawn_worker("Replay-server", move || {
            let (stream, peer) = listener
                .accept()
                .map_err(|e| Error::Replay(format!("server: {e}")))?;
            log::debug!("Got connection from {peer}");
            pump("server", stream, rx_server, ready, stats)
        })?
    };
    let client = {
        let ready = ready_tx;
        let stats = Arc::clone(&stats);
        spawn_worker("Replay-client", move || {
            let stream =
                TcpStream::connect(addr).map_err(|e| Error::Replay(format!("client: {e}")))?;
            log::debug!("Connected!");
            pump("client", stream, rx_client, ready, stats)
        })?
    };

    let fed = feed(records, &ready_rx, &tx_client, &tx_server, record_delay);
    drop(tx_client);
    drop(tx_server);
    // workers still blocked in accept or connect are left behind on error
    let records = fed?;
    let originator = join_worker("Replay-client", client)?;
    let responder = join_worker("Replay-server", server)?;
    if originator.records + responder.records != records {
        return Err(Error::Replay(format!(
            "only {} records out of {records} were written",
            originator.records + responder.records
        )));
    }
    Ok(ReplayReport {
        records,
        originator,
        responder,
    })
}

/// Replay a trace on the loopback interface while tcpdump records it into `output`
pub fn replay_trace(
    input: &Path,
    output: &Path,
    options: &ReplayOptions,
    format: TraceFormat,
) -> Result<ReplayReport> {
    check_distinct(input, &output.to_string_lossy())?;
    let data = fs::read(input).map_err(|e| Error::io(input, e))?;
    let records = format.decode(&data)?;

    let tcpdump = Tcpdump::start(&options.interface, output, options.port)?;
    thread::sleep(options.settle_delay);
    let stats = Arc::new(Stats::default());
    let report = replay_records(records, options.port, options.record_delay, Arc::clone(&stats));
    thread::sleep(options.settle_delay);
    tcpdump.stop()?;
    stats.log_summary();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reach_their_sockets() {
        let records = vec![
            Ok(Frame::originator(b"CONNECT foo HTTP/1.1\r\n\r\n".to_vec())),
            Ok(Frame::responder(b"HTTP/1.1 200 OK\r\n\r\n".to_vec())),
            Ok(Frame::originator(vec![7u8; 100_000])),
            Ok(Frame::responder(Vec::new())),
        ];
        let stats = Arc::new(Stats::default());
        let report = replay_records(records, 0, Duration::ZERO, Arc::clone(&stats)).unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(
            report.originator,
            WorkerReport {
                records: 2,
                bytes: 24 + 100_000
            }
        );
        assert_eq!(
            report.responder,
            WorkerReport {
                records: 2,
                bytes: 19
            }
        );
        assert_eq!(stats.records(), 4);
        assert_eq!(stats.bytes(), 24 + 100_000 + 19);
    }

    #[test]
    fn malformed_record_stops_the_replay() {
        let records = vec![
            Ok(Frame::originator(b"a".to_vec())),
            Err(Error::MalformedInput("truncated".to_string())),
        ];
        assert!(matches!(
            replay_records(records, 0, Duration::ZERO, Arc::new(Stats::default())),
            Err(Error::MalformedInput(_))
        ));
    }
}
