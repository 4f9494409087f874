//! Framing shared by the proxy server and client.
//!
//! Every message is a 12 byte header followed by a JSON payload. Requests
//! start with a 4 character command, responses with a 4 character status,
//! and both follow that with the payload length as 8 lowercase hex digits.

use std::io::{self, Read, Write};

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::procfile::ReadProcError;
use crate::utils::{base64_bytes, decode_hex_u32, encode_hex_u32, unbase64};

pub const HEADER_LEN: usize = 12;

/// Payloads larger than this are refused
pub const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

pub const fn pack(a: char, b: char, c: char, d: char) -> u32 {
    (((a as u32) & 0xFF) << 24)
        | (((b as u32) & 0xFF) << 16)
        | (((c as u32) & 0xFF) << 8)
        | ((d as u32) & 0xFF)
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    GetStatistics = pack('s', 't', 'a', 't'),
    HasPermission = pack('p', 'e', 'r', 'm'),
    ReadProcFile = pack('p', 'r', 'o', 'c'),
    ReadProcFileLegacy = pack('l', 'p', 'r', 'c'),
}

impl Command {
    pub fn from_u32(raw: u32) -> Option<Self> {
        [
            Self::GetStatistics,
            Self::HasPermission,
            Self::ReadProcFile,
            Self::ReadProcFileLegacy,
        ]
        .into_iter()
        .find(|it| *it as u32 == raw)
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok = pack('G', 'O', 'O', 'D'),
    Fail = pack('F', 'A', 'I', 'L'),
}

impl Status {
    pub fn from_u32(raw: u32) -> Option<Self> {
        if raw == Self::Ok as u32 {
            Some(Self::Ok)
        } else if raw == Self::Fail as u32 {
            Some(Self::Fail)
        } else {
            None
        }
    }
}

pub fn encode_header(into: &mut [u8; HEADER_LEN], tag: u32, payload_len: u32) {
    into[..4].copy_from_slice(&tag.to_be_bytes());
    let mut len = [0u8; 8];
    encode_hex_u32(&mut len, payload_len);
    into[4..].copy_from_slice(&len);
}

/// Splits a header into its tag and payload length
pub fn decode_header(header: &[u8; HEADER_LEN]) -> io::Result<(u32, u32)> {
    let tag = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[4..]);
    let len = decode_hex_u32(&len).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad payload length {:?}", String::from_utf8_lossy(&len)),
        )
    })?;
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload of {} bytes is too large", len),
        ));
    }
    Ok((tag, len))
}

pub fn write_message<W: Write + ?Sized>(w: &mut W, tag: u32, payload: &str) -> io::Result<()> {
    let bytes = payload.as_bytes();
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    let mut header = [0u8; HEADER_LEN];
    encode_header(&mut header, tag, len);
    log::trace!("writing header {:?}", header);
    w.write_all(&header)?;
    w.write_all(bytes)?;
    w.flush()
}

/// Read one message, returning its tag and JSON payload
pub fn read_message<R: Read + ?Sized>(r: &mut R) -> io::Result<(u32, String)> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    let (tag, len) = decode_header(&header)?;
    log::trace!("reading {} byte payload", len);

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    String::from_utf8(payload)
        .map(|payload| (tag, payload))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReadProcRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DataResponse {
    #[serde(serialize_with = "serialize_b64", deserialize_with = "deserialize_b64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PermissionResponse {
    pub granted: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ReadProcResponse {
    Ok {
        #[serde(serialize_with = "serialize_b64", deserialize_with = "deserialize_b64")]
        data: Vec<u8>,
    },
    Err {
        error: ReadProcError,
    },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerError {
    pub err: String,
}

struct Base64Visitor;

impl<'de> Visitor<'de> for Base64Visitor {
    type Value = Vec<u8>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("string containing base64 encoded bytes")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        unbase64(v).ok_or_else(|| E::custom(format!("{} is not valid base64", v)))
    }
}

fn deserialize_b64<'de, D>(deser: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    deser.deserialize_str(Base64Visitor)
}

fn serialize_b64<S>(data: &Vec<u8>, ser: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    ser.serialize_str(&base64_bytes(data))
}
