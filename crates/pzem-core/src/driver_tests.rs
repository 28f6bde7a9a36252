use crate::driver::{adapter_chip, crc16, decode_address, decode_measurement, request_frame};
use crate::sample::SampleError;

fn with_crc(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    body
}

fn measurement_reply(address: u8, registers: [u16; 10]) -> Vec<u8> {
    let mut body = vec![address, 0x04, 0x14];
    for reg in registers {
        body.extend_from_slice(&reg.to_be_bytes());
    }
    with_crc(body)
}

#[test]
fn crc_matches_modbus_check_value() {
    assert_eq!(crc16(b"123456789"), 0x4B37);
}

#[test]
fn request_frame_appends_crc_low_byte_first() {
    let frame = request_frame(0x01, 0x04, 0x0000, 0x000A);

    assert_eq!(&frame[..6], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A]);
    let crc = crc16(&frame[..6]);
    assert_eq!(frame[6], (crc & 0xFF) as u8);
    assert_eq!(frame[7], (crc >> 8) as u8);
}

#[test]
fn decodes_scaled_measurement_registers() {
    // Arrange
    let reply = measurement_reply(0x02, [2305, 500, 0, 1150, 0, 0x86A0, 0x0001, 500, 98, 0]);

    // Act
    let reading = decode_measurement(&reply).expect("decode");

    // Assert
    assert_eq!(reading.address, 0x02);
    assert_eq!(reading.voltage, 230.5);
    assert_eq!(reading.current, 0.5);
    assert_eq!(reading.active_power, 115.0);
    assert_eq!(reading.active_energy, 100_000.0);
    assert_eq!(reading.frequency, 50.0);
    assert_eq!(reading.power_factor, 0.98);
}

#[test]
fn corrupted_reply_is_a_checksum_error() {
    let mut reply = measurement_reply(0x02, [2300, 0, 0, 0, 0, 0, 0, 500, 100, 0]);
    reply[4] ^= 0xFF;

    let err = decode_measurement(&reply).expect_err("must fail");

    assert!(matches!(err, SampleError::Checksum { .. }), "got {err:?}");
}

#[test]
fn truncated_reply_is_malformed() {
    let reply = measurement_reply(0x02, [2300, 0, 0, 0, 0, 0, 0, 500, 100, 0]);

    let err = decode_measurement(&reply[..12]).expect_err("must fail");

    assert!(matches!(err, SampleError::Malformed(_)), "got {err:?}");
}

#[test]
fn exception_reply_is_malformed() {
    let reply = with_crc(vec![0x02, 0x84, 0x02]);

    let err = decode_measurement(&reply).expect_err("must fail");

    assert!(matches!(err, SampleError::Malformed(ref msg) if msg.contains("exception")), "got {err:?}");
}

#[test]
fn decodes_slave_address_reply() {
    let reply = with_crc(vec![0x02, 0x03, 0x02, 0x00, 0x07]);

    assert_eq!(decode_address(&reply).expect("address"), 0x07);
}

#[test]
fn recognises_common_usb_serial_bridges() {
    assert_eq!(adapter_chip("1A86", "7523"), Some("CH340"));
    assert_eq!(adapter_chip("10c4", "ea60"), Some("CP210x"));
    assert_eq!(adapter_chip("04d8", "000a"), None);
}
