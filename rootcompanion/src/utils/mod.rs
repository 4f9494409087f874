pub mod fs;
pub use fs::*;

pub mod hex;
pub use hex::*;

use base64::Engine;

pub fn base64_bytes(data: &[u8]) -> String {
    let eng = base64::engine::general_purpose::STANDARD;
    eng.encode(data)
}

pub fn unbase64(s: &str) -> Option<Vec<u8>> {
    let eng = base64::engine::general_purpose::STANDARD;
    eng.decode(s).ok()
}

/// Truncates the buffer at the first NUL byte, if there is one
pub fn truncate_at_nul(buf: &mut Vec<u8>) {
    if let Some(idx) = buf.iter().position(|b| *b == 0) {
        buf.truncate(idx);
    }
}
