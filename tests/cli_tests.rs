use assert_cmd::prelude::*;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::DataLink;
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;
use std::process::Command;
use tempfile::tempdir;

const TRACE: &[u8] = b"\x01PKT\x01CONNECT foo HTTP/1.1\r\n\r\n\x01PKT\x02HTTP/1.1 200 OK\r\n\r\n";

fn read_pcap(path: &Path) -> Result<(DataLink, Vec<Vec<u8>>), Box<dyn std::error::Error>> {
    let mut reader = PcapReader::new(File::open(path)?)?;
    let datalink = reader.header().datalink;
    let mut packets = vec![];
    while let Some(packet) = reader.next_packet() {
        packets.push(packet?.data.to_vec());
    }
    Ok((datalink, packets))
}

#[test]
fn trace_to_pcap_and_back() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let trace = dir.path().join("connect.pkt");
    let config = dir.path().join("config.toml");
    let pcap = dir.path().join("connect.pcap");
    let back = dir.path().join("back.pkt");
    fs::write(&trace, TRACE)?;
    fs::write(&config, "[tcp]\nseed = 0\n")?;

    let output = Command::cargo_bin("pkttrace")?
        .arg("--config")
        .arg(&config)
        .arg("to-pcap")
        .arg(&trace)
        .arg(format!("file://{}", pcap.display()))
        .arg("8080")
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "9 packets written for 2 records\n"
    );

    let (datalink, packets) = read_pcap(&pcap)?;
    assert_eq!(datalink, DataLink::ETHERNET);
    // handshake, one segment per record, teardown
    assert_eq!(packets.len(), 9);

    let output = Command::cargo_bin("pkttrace")?
        .arg("from-pcap")
        .arg(&pcap)
        .arg(&back)
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "2 frames written out of 9 packets\n"
    );
    assert_eq!(fs::read(&back)?, TRACE);
    Ok(())
}

#[test]
fn headers_trace_restores_the_packets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let trace = dir.path().join("connect.pkt");
    let pcap = dir.path().join("connect.pcap");
    let headers = dir.path().join("headers.pkt");
    let restored = dir.path().join("restored.pcap");
    fs::write(&trace, TRACE)?;

    Command::cargo_bin("pkttrace")?
        .arg("to-pcap")
        .arg(&trace)
        .arg(format!("file://{}", pcap.display()))
        .arg("--auto-ack")
        .assert()
        .success();
    Command::cargo_bin("pkttrace")?
        .arg("from-pcap")
        .arg("--headers")
        .arg(&pcap)
        .arg(&headers)
        .assert()
        .success();
    Command::cargo_bin("pkttrace")?
        .arg("headers-to-pcap")
        .arg(&headers)
        .arg(format!("file://{}", restored.display()))
        .assert()
        .success();

    let (_, synthesized) = read_pcap(&pcap)?;
    let (datalink, packets) = read_pcap(&restored)?;
    assert_eq!(datalink, DataLink::ETHERNET);
    assert_eq!(synthesized.len(), 11);
    // same addresses on both sides, so the frames come back unchanged
    assert_eq!(packets, synthesized);

    let raw = dir.path().join("raw.pcap");
    Command::cargo_bin("pkttrace")?
        .arg("headers-to-pcap")
        .arg(&headers)
        .arg(format!("file://{}", raw.display()))
        .arg("--raw-link")
        .assert()
        .success();
    let (datalink, packets) = read_pcap(&raw)?;
    assert_eq!(datalink, DataLink::RAW);
    assert_eq!(packets[0], synthesized[0][14..]);
    Ok(())
}

#[test]
fn invalid_marker_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let trace = dir.path().join("bad.pkt");
    let pcap = dir.path().join("bad.pcap");
    fs::write(&trace, b"GET / HTTP/1.1\r\n\r\n")?;

    Command::cargo_bin("pkttrace")?
        .arg("to-pcap")
        .arg(&trace)
        .arg(format!("file://{}", pcap.display()))
        .assert()
        .failure()
        .code(1);
    // the trace is checked before the output is created
    assert!(!pcap.exists());
    Ok(())
}

#[test]
fn input_and_output_must_differ() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let trace = dir.path().join("trace.pkt");
    fs::write(&trace, TRACE)?;

    Command::cargo_bin("pkttrace")?
        .arg("headers-to-pcap")
        .arg(&trace)
        .arg(format!("file://{}", trace.display()))
        .assert()
        .failure()
        .code(1);
    assert_eq!(fs::read(&trace)?, TRACE);
    Ok(())
}

/// IPv4 ICMP echo between 10.0.0.1 and 10.0.0.2
fn icmp_echo(request: bool) -> Vec<u8> {
    let (src, dst, icmp_type) = if request { (1, 2, 8) } else { (2, 1, 0) };
    vec![
        0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, //
        10, 0, 0, src, 10, 0, 0, dst, //
        icmp_type, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01,
    ]
}

#[test]
fn headers_mode_keeps_packets_without_ports() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let pcap = dir.path().join("ping.pcap");
    let headers = dir.path().join("ping.pkt");
    let restored = dir.path().join("restored.pcap");
    let packets = vec![icmp_echo(true), icmp_echo(false)];
    {
        let header = PcapHeader {
            datalink: DataLink::RAW,
            ..Default::default()
        };
        let mut writer = PcapWriter::with_header(File::create(&pcap)?, header)?;
        for (i, data) in packets.iter().enumerate() {
            let timestamp = Duration::from_secs(i as u64);
            writer.write_packet(&PcapPacket::new(timestamp, data.len() as u32, data))?;
        }
    }

    let output = Command::cargo_bin("pkttrace")?
        .arg("from-pcap")
        .arg("--headers")
        .arg(&pcap)
        .arg(&headers)
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "2 frames written out of 2 packets\n"
    );

    Command::cargo_bin("pkttrace")?
        .arg("headers-to-pcap")
        .arg(&headers)
        .arg(format!("file://{}", restored.display()))
        .arg("--raw-link")
        .assert()
        .success();
    let (datalink, restored) = read_pcap(&restored)?;
    assert_eq!(datalink, DataLink::RAW);
    assert_eq!(restored, packets);
    Ok(())
}
