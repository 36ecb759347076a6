use std::time::Instant;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{NetError, NetResult};

/// Typical inflated size of a 512x512x64 map, used only for progress estimates.
const NOMINAL_MAP_BYTES: usize = 512 * 512 * 16;
const INFLATE_RESERVE: usize = 64 * 1024;

/// Fully decoded map, handed to the game session when the world is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapData {
    pub bytes: Vec<u8>,
}

/// Streaming map decoder fed with transfer chunks as they arrive.
pub trait MapDecoder {
    fn add_chunk(&mut self, data: &[u8]);
    fn mark_eof(&mut self);
    /// Blocks until everything fed so far is decoded. Called once, after `mark_eof`.
    fn wait_complete(&mut self) -> NetResult<()>;
    fn progress(&self) -> f32;
    fn take_result(&mut self) -> NetResult<MapData>;
}

pub struct InflateMapLoader {
    inflater: Decompress,
    output: Vec<u8>,
    stream_ended: bool,
    eof: bool,
    complete: bool,
    error: Option<String>,
}

impl InflateMapLoader {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            output: Vec::new(),
            stream_ended: false,
            eof: false,
            complete: false,
            error: None,
        }
    }

    pub fn inflated_len(&self) -> usize {
        self.output.len()
    }
}

impl Default for InflateMapLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MapDecoder for InflateMapLoader {
    fn add_chunk(&mut self, data: &[u8]) {
        if self.eof || self.error.is_some() {
            return;
        }

        let mut input = data;
        while !input.is_empty() && !self.stream_ended {
            if self.output.capacity() - self.output.len() < INFLATE_RESERVE / 2 {
                self.output.reserve(INFLATE_RESERVE);
            }

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            match self
                .inflater
                .decompress_vec(input, &mut self.output, FlushDecompress::None)
            {
                Ok(Status::StreamEnd) => self.stream_ended = true,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Map stream is corrupt: {}", e);
                    self.error = Some(e.to_string());
                    return;
                }
            }

            let consumed = (self.inflater.total_in() - before_in) as usize;
            input = &input[consumed..];
            if consumed == 0 && self.inflater.total_out() == before_out {
                break;
            }
        }
    }

    fn mark_eof(&mut self) {
        self.eof = true;
    }

    fn wait_complete(&mut self) -> NetResult<()> {
        if let Some(error) = &self.error {
            return Err(NetError::MapDecode(error.clone()));
        }
        if !self.eof {
            return Err(NetError::MapDecode("waited before end of transfer".into()));
        }
        if !self.stream_ended {
            return Err(NetError::MapDecode(format!(
                "map data truncated after {} bytes",
                self.inflater.total_in()
            )));
        }
        self.complete = true;
        log::debug!("Inflated {} bytes of map data", self.inflated_len());
        Ok(())
    }

    fn progress(&self) -> f32 {
        if self.complete {
            return 1.0;
        }
        (self.output.len() as f32 / NOMINAL_MAP_BYTES as f32).min(0.99)
    }

    fn take_result(&mut self) -> NetResult<MapData> {
        if !self.complete {
            return Err(NetError::MapDecode("map decoding not complete".into()));
        }
        Ok(MapData {
            bytes: std::mem::take(&mut self.output),
        })
    }
}

/// Throughput and ETA of the map download.
#[derive(Debug, Default)]
pub struct MapTransferMonitor {
    bytes: u64,
    first_byte_at: Option<Instant>,
}

impl MapTransferMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn accumulate(&mut self, n: usize) {
        self.accumulate_at(n, Instant::now());
    }

    /// The wait before the first byte is not counted, so the stopwatch starts here.
    pub fn accumulate_at(&mut self, n: usize, now: Instant) {
        if self.first_byte_at.is_none() {
            self.first_byte_at = Some(now);
        }
        self.bytes += n as u64;
    }

    pub fn displayed_text(&self, progress: f32) -> String {
        self.displayed_text_at(progress, Instant::now())
    }

    pub fn displayed_text_at(&self, progress: f32, now: Instant) -> String {
        match self.first_byte_at {
            Some(start) => {
                format_transfer(self.bytes, progress, now.duration_since(start).as_secs_f32())
            }
            None => String::new(),
        }
    }
}

pub fn format_transfer(bytes: u64, progress: f32, secs_elapsed: f32) -> String {
    if secs_elapsed <= 0.0 {
        return String::new();
    }

    let bytes_per_sec = bytes as f32 / secs_elapsed;
    let progress_per_sec = progress / secs_elapsed;

    let mut text = format!(
        "{} KB, {} KB/s",
        (bytes + 500) / 1000,
        (bytes_per_sec as u64 + 500) / 1000
    );

    let secs_left = (1.0 - progress) / progress_per_sec;
    if secs_left.is_finite() && secs_left < 86400.0 {
        let secs = secs_left.max(0.0) as u32 + 1;
        if secs < 120 {
            text.push_str(&format!(", {secs}s left"));
        } else {
            text.push_str(&format!(", {}m{}s left", secs / 60, secs % 60));
        }
    }

    text
}
