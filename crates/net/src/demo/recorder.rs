use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::format::{DEMO_EXTENSION, DEMO_FORMAT_VERSION};
use crate::error::{NetError, NetResult};
use crate::net::protocol::{ProtocolVersion, SPECTATOR_REPLAY_ID, tag};

pub struct DemoRecorder<W: Write> {
    writer: W,
    start_time: f64,
    records: u64,
}

impl DemoRecorder<Box<dyn Write>> {
    /// Creates `<dir>/<unix seconds>.demo`.
    pub fn create_in(
        dir: &Path,
        protocol: ProtocolVersion,
        start_time: f64,
    ) -> NetResult<(Self, PathBuf)> {
        fs::create_dir_all(dir).map_err(NetError::DemoIo)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = dir.join(format!("{stamp}.{DEMO_EXTENSION}"));

        let file = File::create(&path).map_err(NetError::DemoIo)?;
        let recorder = Self::start(Box::new(BufWriter::new(file)), protocol, start_time)?;
        log::info!("Recording demo to {}", path.display());
        Ok((recorder, path))
    }
}

impl<W: Write> DemoRecorder<W> {
    pub fn start(mut writer: W, protocol: ProtocolVersion, start_time: f64) -> NetResult<Self> {
        writer
            .write_all(&[DEMO_FORMAT_VERSION, protocol.wire_value()])
            .map_err(NetError::DemoIo)?;
        Ok(Self {
            writer,
            start_time,
            records: 0,
        })
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Appends `packet` stamped with `now` relative to the start. State packets are stored with
    /// the spectator id so a replay never takes over the recording player.
    pub fn record(&mut self, packet: &[u8], now: f64) -> NetResult<()> {
        let len = u16::try_from(packet.len()).map_err(|_| {
            NetError::DemoFormat(format!("packet of {} bytes cannot be recorded", packet.len()))
        })?;
        let elapsed = (now - self.start_time) as f32;

        let mut head = [0u8; 6];
        head[..4].copy_from_slice(&elapsed.to_le_bytes());
        head[4..].copy_from_slice(&len.to_le_bytes());
        self.writer.write_all(&head).map_err(NetError::DemoIo)?;

        match packet {
            [tag::STATE_DATA, _, rest @ ..] => {
                self.writer
                    .write_all(&[tag::STATE_DATA, SPECTATOR_REPLAY_ID])
                    .map_err(NetError::DemoIo)?;
                self.writer.write_all(rest).map_err(NetError::DemoIo)?;
            }
            _ => self.writer.write_all(packet).map_err(NetError::DemoIo)?,
        }

        self.records += 1;
        Ok(())
    }

    pub fn finish(mut self) -> NetResult<W> {
        self.writer.flush().map_err(NetError::DemoIo)?;
        log::info!("Demo recording stopped after {} packets", self.records);
        Ok(self.writer)
    }
}
