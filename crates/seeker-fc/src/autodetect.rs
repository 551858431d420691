use anyhow::Result;
use mavlink::common::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::MavlinkVersion;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::FcConfig;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

impl AutodetectResult {
    /// Connection string for the chosen port.
    pub fn url(&self) -> Option<String> {
        self.chosen.as_ref().map(|(dev, baud)| serial_url(dev, *baud))
    }
}

pub fn serial_url(dev: &str, baud: u32) -> String {
    format!("serial:{}:{}", dev, baud)
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Probe every device x baud pair and stop at the first one that delivers a
/// HEARTBEAT from the configured target system.
pub fn autodetect_fc(cfg: &FcConfig) -> Result<AutodetectResult> {
    let devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = cfg.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let heartbeat_timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));
    let mut probes = Vec::new();

    for dev in devs {
        for baud in &bauds {
            let start = Instant::now();
            let (hb_seen, note) = match probe(&dev, *baud, cfg, heartbeat_timeout) {
                Ok(true) => (true, "heartbeat".to_string()),
                Ok(false) => (false, "no heartbeat".to_string()),
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    (false, format!("open failed: {:#}", e))
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });

            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

fn probe(dev: &str, baud: u32, cfg: &FcConfig, timeout: Duration) -> Result<bool> {
    // short read timeout so the deadline below is checked between reads
    let port = tokio_serial::new(dev, baud).timeout(Duration::from_millis(100)).open()?;
    let mut reader = DeadlineReader { inner: port, deadline: Instant::now() + timeout };
    // the port is dropped on return, before the next baud opens the same device
    Ok(wait_for_heartbeat(&mut reader, cfg.target_sys))
}

/// Parses MAVLink v2 frames off `reader` until a HEARTBEAT from `target_sys`
/// shows up or the reader reports end of stream.
fn wait_for_heartbeat<R: Read>(reader: &mut R, target_sys: u8) -> bool {
    loop {
        match mavlink::read_versioned_msg::<MavMessage, _>(reader, MavlinkVersion::V2) {
            Ok((hdr, MavMessage::HEARTBEAT(_))) if hdr.system_id == target_sys => return true,
            Ok(_) => {}
            Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return false,
            Err(_) => {}
        }
    }
}

/// Ends the stream at `deadline`. Before it, an empty read or a port timeout
/// is reported as `TimedOut` so the parser keeps going.
struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Ok(0);
        }
        match self.inner.read(buf) {
            Ok(0) => {
                std::thread::sleep(Duration::from_millis(5));
                Err(io::ErrorKind::TimedOut.into())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavAutopilot, MavModeFlag, MavState, MavType, HEARTBEAT_DATA, SYS_STATUS_DATA};
    use mavlink::MavHeader;
    use std::io::Cursor;

    fn frame(system_id: u8, msg: &MavMessage) -> Vec<u8> {
        let mut buf = Vec::new();
        let hdr = MavHeader { system_id, component_id: 1, sequence: 7 };
        mavlink::write_versioned_msg(&mut buf, MavlinkVersion::V2, hdr, msg).unwrap();
        buf
    }

    fn heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    fn reader(bytes: Vec<u8>, timeout_ms: u64) -> DeadlineReader<Cursor<Vec<u8>>> {
        DeadlineReader {
            inner: Cursor::new(bytes),
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn finds_target_heartbeat_after_noise() {
        let mut bytes = vec![0x00, 0x55, 0x03, 0x42];
        bytes.extend(frame(1, &MavMessage::SYS_STATUS(SYS_STATUS_DATA::default())));
        bytes.extend(frame(1, &heartbeat()));
        assert!(wait_for_heartbeat(&mut reader(bytes, 1000), 1));
    }

    #[test]
    fn other_systems_do_not_count() {
        let bytes = frame(255, &heartbeat());
        let start = Instant::now();
        assert!(!wait_for_heartbeat(&mut reader(bytes, 60), 1));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn endless_garbage_still_ends_at_the_deadline() {
        // magic bytes forever: every frame is "complete" and fails its CRC
        let mut r = DeadlineReader {
            inner: io::repeat(0xFD),
            deadline: Instant::now() + Duration::from_millis(80),
        };
        let start = Instant::now();
        assert!(!wait_for_heartbeat(&mut r, 1));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn chosen_port_becomes_serial_url() {
        let res = AutodetectResult { chosen: Some(("/dev/ttyACM0".into(), 115200)), probes: Vec::new() };
        assert_eq!(res.url().as_deref(), Some("serial:/dev/ttyACM0:115200"));
        assert_eq!(AutodetectResult { chosen: None, probes: Vec::new() }.url(), None);
    }
}
