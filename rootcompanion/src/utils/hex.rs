pub const HEX_BYTES: &[u8; 16] = &[
    b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'a', b'b', b'c', b'd', b'e', b'f',
];

/// Writes `value` as 8 lowercase hex digits
pub fn encode_hex_u32(into: &mut [u8; 8], value: u32) {
    let mut shift = 28;
    for b in into.iter_mut() {
        let sel = (value >> shift) & 0xF;
        *b = HEX_BYTES[sel as usize];
        shift -= 4;
    }
}

/// Parses exactly 8 hex digits (either case) into a u32
pub fn decode_hex_u32(bytes: &[u8; 8]) -> Option<u32> {
    let as_str = std::str::from_utf8(bytes).ok()?;
    u32::from_str_radix(as_str, 16).ok()
}
