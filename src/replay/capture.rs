use crate::error::{Error, Result};

use std::path::Path;
use std::process::{Child, Command, Stdio};

/// A `tcpdump` process recording the replayed connection.
///
/// There is no way to know when tcpdump actually listens or has seen the last
/// packet: callers leave it some time on both ends.
pub struct Tcpdump {
    child: Child,
}

impl Tcpdump {
    pub fn start(interface: &str, output: &Path, port: u16) -> Result<Self> {
        log::info!("Capturing port {port} on {interface} into {}", output.display());
        let child = Command::new("tcpdump")
            .arg("-i")
            .arg(interface)
            .arg("-w")
            .arg(output)
            .arg(format!("port {port}"))
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| Error::Replay(format!("cannot start tcpdump: {e}")))?;
        Ok(Tcpdump { child })
    }

    /// Interrupt tcpdump so that it flushes the capture, and wait for it
    pub fn stop(mut self) -> Result<()> {
        let pid = libc::pid_t::try_from(self.child.id())
            .map_err(|e| Error::Replay(format!("invalid tcpdump pid: {e}")))?;
        // SAFETY: the pid belongs to our own child, which has not been reaped yet
        if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
            let _ = self.child.kill();
        }
        let status = self
            .child
            .wait()
            .map_err(|e| Error::Replay(format!("tcpdump: {e}")))?;
        log::debug!("tcpdump exited with {status}");
        Ok(())
    }
}
