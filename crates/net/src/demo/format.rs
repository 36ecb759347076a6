//! Demo file layout: a two byte header `[format version][protocol version]`, then records of
//! `[f32 elapsed][u16 length][payload]` until end of file, all little-endian.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{NetError, NetResult};
use crate::net::protocol::ProtocolVersion;

pub const DEMO_FORMAT_VERSION: u8 = 1;
pub const DEMO_HEADER_LEN: u64 = 2;
pub const DEMO_EXTENSION: &str = "demo";

pub(crate) fn read_header(reader: &mut impl Read) -> NetResult<ProtocolVersion> {
    let mut header = [0u8; DEMO_HEADER_LEN as usize];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => NetError::DemoFormat("file too short for header".into()),
        _ => NetError::DemoIo(e),
    })?;

    if header[0] != DEMO_FORMAT_VERSION {
        return Err(NetError::DemoFormat(format!(
            "unsupported demo version {}",
            header[0]
        )));
    }
    ProtocolVersion::from_wire(header[1])
        .map_err(|_| NetError::DemoFormat(format!("unsupported protocol version {}", header[1])))
}

pub(crate) struct RecordHeader {
    pub elapsed: f32,
    pub len: u16,
}

/// `Ok(None)` at a clean end of file.
pub(crate) fn read_record_header(reader: &mut impl Read) -> io::Result<Option<RecordHeader>> {
    let mut buf = [0u8; 6];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(RecordHeader {
        elapsed: f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        len: u16::from_le_bytes([buf[4], buf[5]]),
    }))
}

/// Timestamp of the last record; leaves the reader just past the header.
pub(crate) fn scan_duration<R: Read + Seek>(reader: &mut R) -> NetResult<f32> {
    let mut duration = 0.0;
    loop {
        match read_record_header(reader) {
            Ok(Some(record)) => {
                duration = record.elapsed;
                reader
                    .seek(SeekFrom::Current(record.len as i64))
                    .map_err(NetError::DemoIo)?;
            }
            Ok(None) => break,
            // a recording cut off mid-record still plays up to the damage
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(NetError::DemoIo(e)),
        }
    }
    reader
        .seek(SeekFrom::Start(DEMO_HEADER_LEN))
        .map_err(NetError::DemoIo)?;
    Ok(duration)
}

pub fn format_duration(secs: f32) -> String {
    let total = secs.max(0.0) as u32;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoInfo {
    pub path: PathBuf,
    pub protocol: ProtocolVersion,
    pub duration: f32,
}

impl DemoInfo {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn inspect_demo(path: &Path) -> NetResult<DemoInfo> {
    let file = File::open(path).map_err(NetError::DemoIo)?;
    let mut reader = BufReader::new(file);
    let protocol = read_header(&mut reader)?;
    let duration = scan_duration(&mut reader)?;
    Ok(DemoInfo {
        path: path.to_path_buf(),
        protocol,
        duration,
    })
}

/// Every readable `*.demo` file in `dir`, sorted by file name. Unreadable files are skipped.
pub fn list_demos(dir: &Path) -> io::Result<Vec<DemoInfo>> {
    let mut demos = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(DEMO_EXTENSION) {
            continue;
        }
        match inspect_demo(&path) {
            Ok(info) => demos.push(info),
            Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    demos.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(demos)
}
