use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sample::{Reading, SampleError, SampleSource};

pub const DEFAULT_ADDRESS: u8 = 0x02;
const GENERAL_ADDRESS: u8 = 0xF8;
const BAUD_RATE: u32 = 9600;

const READ_HOLDING: u8 = 0x03;
const READ_INPUT: u8 = 0x04;
const MEASUREMENT_REGISTERS: u16 = 10;
const ADDRESS_REGISTER: u16 = 0x0002;

/// USB-serial bridges the meter usually hangs off.
const KNOWN_ADAPTERS: [(&str, &str, &str); 4] = [
    ("1a86", "7523", "CH340"),
    ("10c4", "ea60", "CP210x"),
    ("0403", "6001", "FTDI FT232"),
    ("067b", "2303", "PL2303"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub path: String,
    pub chip: String,
    pub vid: String,
    pub pid: String,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("udev error: {0}")]
    Udev(String),
}

/// CRC-16/MODBUS, transmitted low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn request_frame(address: u8, function: u8, register: u16, count: u16) -> [u8; 8] {
    let mut frame = [0_u8; 8];
    frame[0] = address;
    frame[1] = function;
    frame[2..4].copy_from_slice(&register.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

fn check_frame(frame: &[u8], function: u8, payload_len: usize) -> Result<&[u8], SampleError> {
    let expected_len = 3 + payload_len + 2;
    if frame.len() < 5 {
        return Err(SampleError::Malformed(format!("short reply ({} bytes)", frame.len())));
    }
    if frame[1] == function | 0x80 {
        return Err(SampleError::Malformed(format!("exception code {:#04X}", frame[2])));
    }
    if frame.len() != expected_len {
        return Err(SampleError::Malformed(format!(
            "expected {expected_len} bytes, got {}",
            frame.len()
        )));
    }

    let body = &frame[..expected_len - 2];
    let expected = crc16(body);
    let actual = u16::from_le_bytes([frame[expected_len - 2], frame[expected_len - 1]]);
    if expected != actual {
        return Err(SampleError::Checksum { expected, actual });
    }

    if frame[1] != function || usize::from(frame[2]) != payload_len {
        return Err(SampleError::Malformed(format!(
            "unexpected header {:02X} {:02X}",
            frame[1], frame[2]
        )));
    }

    Ok(&body[3..])
}

/// Decodes a read-input-registers reply carrying the ten measurement registers.
pub fn decode_measurement(frame: &[u8]) -> Result<Reading, SampleError> {
    let payload = check_frame(frame, READ_INPUT, usize::from(MEASUREMENT_REGISTERS) * 2)?;

    let reg = |idx: usize| -> u32 { u32::from(u16::from_be_bytes([payload[idx * 2], payload[idx * 2 + 1]])) };
    let pair = |lo: usize| -> u32 { reg(lo) | (reg(lo + 1) << 16) };

    Ok(Reading {
        address: frame[0],
        voltage: f64::from(reg(0)) / 10.0,
        current: f64::from(pair(1)) / 1000.0,
        active_power: f64::from(pair(3)) / 10.0,
        active_energy: f64::from(pair(5)),
        frequency: f64::from(reg(7)) / 10.0,
        power_factor: f64::from(reg(8)) / 100.0,
    })
}

pub fn decode_address(frame: &[u8]) -> Result<u8, SampleError> {
    let payload = check_frame(frame, READ_HOLDING, 2)?;
    Ok(payload[1])
}

pub struct Pzem004t {
    path: String,
    address: u8,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl Pzem004t {
    pub fn new(path: impl Into<String>, address: u8, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            address,
            timeout,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Asks whichever meter is on the bus for its slave address and adopts it.
    pub fn probe_address(&mut self) -> Result<u8, SampleError> {
        let request = request_frame(GENERAL_ADDRESS, READ_HOLDING, ADDRESS_REGISTER, 1);
        let reply = self.transact(&request, 7)?;
        let address = decode_address(&reply)?;
        self.address = address;
        Ok(address)
    }

    fn open_port(&self) -> Result<Box<dyn SerialPort>, SampleError> {
        serialport::new(&self.path, BAUD_RATE)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|err| SampleError::Io(format!("failed to open serial port {}: {err}", self.path)))
    }

    fn transact(&mut self, request: &[u8], reply_len: usize) -> Result<Vec<u8>, SampleError> {
        if self.port.is_none() {
            self.port = Some(self.open_port()?);
        }
        let Some(port) = self.port.as_mut() else {
            return Err(SampleError::Disconnected);
        };

        let result = exchange(port.as_mut(), request, reply_len, self.timeout);
        if matches!(result, Err(SampleError::Io(_))) {
            warn!(path = %self.path, "dropping serial port after io error");
            self.port = None;
        }
        result
    }
}

fn exchange(
    port: &mut dyn SerialPort,
    request: &[u8],
    reply_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, SampleError> {
    let mut flush_buf = [0_u8; 64];
    while let Ok(read) = port.read(&mut flush_buf) {
        if read == 0 {
            break;
        }
    }

    port.write_all(request)
        .map_err(|err| SampleError::Io(format!("failed to write request: {err}")))?;
    port.flush()
        .map_err(|err| SampleError::Io(format!("failed to flush request: {err}")))?;

    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(reply_len);
    let mut chunk = [0_u8; 32];

    while buf.len() < reply_len {
        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                // an exception reply is five bytes long
                if buf.len() >= 5 && buf[1] & 0x80 != 0 {
                    buf.truncate(5);
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => return Err(SampleError::Io(format!("serial read failed: {err}"))),
        }

        if Instant::now() >= deadline {
            break;
        }
    }

    if buf.is_empty() {
        return Err(SampleError::Timeout);
    }
    debug!(bytes = buf.len(), "meter reply");
    Ok(buf)
}

#[async_trait]
impl SampleSource for Pzem004t {
    async fn read(&mut self) -> Result<Reading, SampleError> {
        let request = request_frame(self.address, READ_INPUT, 0, MEASUREMENT_REGISTERS);
        let reply = self.transact(&request, 5 + usize::from(MEASUREMENT_REGISTERS) * 2)?;
        decode_measurement(&reply)
    }

    fn address(&self) -> u8 {
        self.address
    }
}

fn extract_vid_pid(device: &udev::Device) -> (String, String) {
    let prop = |key: &str| {
        device
            .property_value(key)
            .and_then(|v| v.to_str())
            .unwrap_or_default()
            .to_string()
    };

    let pair = (prop("ID_VENDOR_ID"), prop("ID_MODEL_ID"));
    if !pair.0.is_empty() && !pair.1.is_empty() {
        return pair;
    }

    let mut parent = device.parent();
    while let Some(dev) = parent {
        let vid = dev
            .attribute_value("idVendor")
            .and_then(|v| v.to_str())
            .unwrap_or_default();
        let pid = dev
            .attribute_value("idProduct")
            .and_then(|v| v.to_str())
            .unwrap_or_default();
        if !vid.is_empty() && !pid.is_empty() {
            return (vid.to_string(), pid.to_string());
        }
        parent = dev.parent();
    }

    pair
}

pub fn adapter_chip(vid: &str, pid: &str) -> Option<&'static str> {
    KNOWN_ADAPTERS
        .iter()
        .find(|(v, p, _)| vid.eq_ignore_ascii_case(v) && pid.eq_ignore_ascii_case(p))
        .map(|(_, _, chip)| *chip)
}

pub fn discover_adapters() -> Result<Vec<AdapterInfo>, DiscoveryError> {
    let mut enumerator = udev::Enumerator::new().map_err(|e| DiscoveryError::Udev(e.to_string()))?;
    enumerator
        .match_subsystem("tty")
        .map_err(|e| DiscoveryError::Udev(e.to_string()))?;

    let mut adapters = Vec::new();
    for device in enumerator
        .scan_devices()
        .map_err(|e| DiscoveryError::Udev(e.to_string()))?
    {
        let (vid, pid) = extract_vid_pid(&device);
        let Some(chip) = adapter_chip(&vid, &pid) else {
            continue;
        };

        let node = device
            .devnode()
            .and_then(Path::to_str)
            .unwrap_or_default()
            .to_string();
        if node.is_empty() {
            continue;
        }

        adapters.push(AdapterInfo {
            path: node,
            chip: chip.to_string(),
            vid,
            pid,
        });
    }

    Ok(adapters)
}
