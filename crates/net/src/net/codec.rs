use std::fmt::Write as _;

use glam::{IVec3, U8Vec3, Vec3};

use super::cp437;
use super::protocol::UTF8_SENTINEL;
use crate::error::{NetError, NetResult};

const DUMP_LIMIT: usize = 64;

#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 1 }
    }

    /// Byte 0, or `None` for an empty buffer.
    pub fn type_tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn payload(&self) -> &'a [u8] {
        self.data.get(1..).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> NetResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(NetError::TruncatedPacket {
                tag: self.type_tag().unwrap_or(0),
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> NetResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> NetResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> NetResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> NetResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> NetResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> NetResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> NetResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Colours travel as B, G, R.
    pub fn read_color(&mut self) -> NetResult<U8Vec3> {
        let [b, g, r] = self.take_array()?;
        Ok(U8Vec3::new(r, g, b))
    }

    pub fn read_vec3(&mut self) -> NetResult<Vec3> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_ivec3(&mut self) -> NetResult<IVec3> {
        Ok(IVec3::new(
            self.read_i32()?,
            self.read_i32()?,
            self.read_i32()?,
        ))
    }

    pub fn read_bytes(&mut self, n: usize) -> NetResult<&'a [u8]> {
        self.take(n)
    }

    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    pub fn read_string(&mut self, len: usize) -> NetResult<String> {
        let raw = self.take(len)?;
        Ok(decode_string(raw))
    }

    pub fn read_remaining_string(&mut self) -> String {
        decode_string(self.read_remaining())
    }

    pub fn hex_dump(&self) -> String {
        let mut out = format!(
            "Packet 0x{:02x} [len={}]",
            self.type_tag().unwrap_or(0),
            self.data.len()
        );
        for byte in self.data.iter().take(DUMP_LIMIT) {
            let _ = write!(out, " {byte:02x}");
        }
        out
    }
}

/// Strips everything from the first NUL, then decodes CP437 or the UTF-8 escape.
pub fn decode_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let raw = &raw[..end];
    match raw.split_first() {
        Some((&UTF8_SENTINEL, rest)) => String::from_utf8_lossy(rest).into_owned(),
        _ => cp437::decode(raw),
    }
}

/// CP437 when lossless; otherwise the sentinel followed by UTF-8, or `?` substitutions when
/// unicode is disabled.
pub fn encode_string(text: &str, unicode: bool) -> Vec<u8> {
    if !unicode {
        return cp437::encode(text, b'?').0;
    }
    let (encoded, lossy) = cp437::encode(text, UTF8_SENTINEL);
    if lossy || encoded.contains(&UTF8_SENTINEL) {
        let mut out = Vec::with_capacity(text.len() + 1);
        out.push(UTF8_SENTINEL);
        out.extend_from_slice(text.as_bytes());
        out
    } else {
        encoded
    }
}

#[derive(Debug, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
    unicode: bool,
}

impl PacketWriter {
    pub fn new(tag: u8) -> Self {
        let mut data = Vec::with_capacity(32);
        data.push(tag);
        Self {
            data,
            unicode: true,
        }
    }

    pub fn with_unicode(mut self, unicode: bool) -> Self {
        self.unicode = unicode;
        self
    }

    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.data.push(v);
        self
    }

    pub fn write_i8(&mut self, v: i8) -> &mut Self {
        self.write_u8(v as u8)
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.write_u32(v as u32)
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.write_u32(v.to_bits())
    }

    pub fn write_color(&mut self, color: U8Vec3) -> &mut Self {
        self.data.extend_from_slice(&[color.z, color.y, color.x]);
        self
    }

    pub fn write_vec3(&mut self, v: Vec3) -> &mut Self {
        self.write_f32(v.x).write_f32(v.y).write_f32(v.z)
    }

    pub fn write_ivec3(&mut self, v: IVec3) -> &mut Self {
        self.write_i32(v.x).write_i32(v.y).write_i32(v.z)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn write_string(&mut self, text: &str) -> &mut Self {
        let encoded = encode_string(text, self.unicode);
        self.write_bytes(&encoded)
    }

    /// Fixed-width field: truncated or zero-padded to exactly `len` bytes.
    pub fn write_string_padded(&mut self, text: &str, len: usize) -> &mut Self {
        let mut encoded = encode_string(text, self.unicode);
        encoded.resize(len, 0);
        self.write_bytes(&encoded)
    }

    pub fn update_u8_at(&mut self, offset: usize, value: u8) -> NetResult<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(offset)
            .ok_or(NetError::InvalidWrite {
                end: offset + 1,
                len,
            })?;
        *slot = value;
        Ok(())
    }

    pub fn update_u32_at(&mut self, offset: usize, value: u32) -> NetResult<()> {
        let len = self.data.len();
        let end = offset.checked_add(4).unwrap_or(usize::MAX);
        let slot = self
            .data
            .get_mut(offset..end)
            .ok_or(NetError::InvalidWrite { end, len })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}
