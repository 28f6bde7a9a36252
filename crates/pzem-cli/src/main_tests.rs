use crate::parse_address;

#[test]
fn parses_hex_and_decimal_addresses() {
    assert_eq!(parse_address("0x02"), Ok(0x02));
    assert_eq!(parse_address("0XF7"), Ok(0xF7));
    assert_eq!(parse_address("17"), Ok(17));
}

#[test]
fn rejects_reserved_addresses() {
    assert!(parse_address("0x00").is_err());
    assert!(parse_address("0xF8").is_err());
    assert!(parse_address("zz").is_err());
}
