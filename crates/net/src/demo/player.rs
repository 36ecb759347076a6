use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::format::{DEMO_HEADER_LEN, read_header, read_record_header, scan_duration};
use crate::error::{NetError, NetResult};
use crate::net::protocol::{ProtocolVersion, tag};

pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 10.0;

/// How far a map transfer is pushed into the past so it plays out in one frame.
const MAP_SKIP_SECS: f64 = 300.0;
/// Virtual seconds granted per requested world update when stepping forward.
const STEP_SECS_PER_UPDATE: f64 = 10.0;

pub trait DemoSource: Read + Seek {}

impl<T: Read + Seek> DemoSource for T {}

/// What the session should do before draining due packets this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStart {
    /// Stays true on the frame a skip window closes, even when that re-pauses playback, so
    /// records already due are still drained once.
    pub run: bool,
    pub restore_follow: bool,
}

/// Replays a recorded session against a virtual clock.
///
/// Virtual time is `now * speed - start_time`; a record is due once its timestamp falls
/// behind it. Pausing freezes `delta_time` (the timestamp of the last delivered record) and
/// every resume re-anchors `start_time` so playback continues without a jump.
pub struct DemoPlayer {
    reader: Box<dyn DemoSource>,
    protocol: ProtocolVersion,
    duration: f32,
    speed: f32,
    start_time: f64,
    delta_time: f64,
    paused: bool,
    pause_after_skip: bool,
    skipping_map: bool,
    skip_time: f64,
    skip_end_time: f64,
    update_count: u32,
    step_target: i64,
    stepping_back: bool,
}

impl DemoPlayer {
    pub fn open(path: &Path) -> NetResult<Self> {
        let file = File::open(path).map_err(NetError::DemoIo)?;
        log::info!("Opening demo {}", path.display());
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader(reader: impl DemoSource + 'static) -> NetResult<Self> {
        let mut reader: Box<dyn DemoSource> = Box::new(reader);
        let protocol = read_header(&mut reader)?;
        let duration = scan_duration(&mut reader)?;
        log::info!("Demo uses protocol {} and lasts {:.1}s", protocol, duration);

        Ok(Self {
            reader,
            protocol,
            duration,
            speed: 1.0,
            start_time: 0.0,
            delta_time: 0.0,
            paused: false,
            pause_after_skip: false,
            skipping_map: false,
            skip_time: 0.0,
            skip_end_time: 0.0,
            update_count: 0,
            step_target: 0,
            stepping_back: false,
        })
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Timestamp of the last delivered record.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_skipping(&self) -> bool {
        self.skip_time != 0.0
    }

    pub fn world_updates(&self) -> u32 {
        self.update_count
    }

    pub fn start(&mut self, now: f64) {
        self.start_time = now * self.speed as f64;
        self.delta_time = 0.0;
        self.paused = false;
        self.pause_after_skip = false;
        self.skipping_map = false;
        self.skip_time = 0.0;
        self.update_count = 0;
        self.step_target = 0;
    }

    fn virtual_now(&self, now: f64) -> f64 {
        now * self.speed as f64
    }

    fn reanchor(&mut self, now: f64) {
        self.start_time = self.virtual_now(now) - self.delta_time;
    }

    pub fn begin_frame(&mut self, receiving_map: bool) -> FrameStart {
        if self.paused && self.skip_time == 0.0 {
            return FrameStart::default();
        }

        let mut restore_follow = false;
        if self.skip_time != 0.0 && self.start_time + self.delta_time >= self.skip_end_time {
            self.skip_time = 0.0;
            if receiving_map {
                self.skip_map_transfer();
            } else if self.pause_after_skip {
                self.pause();
            }
            restore_follow = true;
        }

        FrameStart {
            run: true,
            restore_follow,
        }
    }

    /// Next record once the previously delivered one is due, or `None` when playback has
    /// caught up.
    /// Grenades are dropped while seeking so they do not all go off at once.
    pub fn next_due(&mut self, now: f64) -> NetResult<Option<Vec<u8>>> {
        loop {
            if self.start_time + self.delta_time >= self.virtual_now(now) {
                return Ok(None);
            }

            let payload = self.read_record()?;
            if self.skip_time != 0.0 && payload.first() == Some(&tag::GRENADE) {
                continue;
            }
            return Ok(Some(payload));
        }
    }

    fn read_record(&mut self) -> NetResult<Vec<u8>> {
        let record = match read_record_header(&mut self.reader) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(NetError::DemoEnded),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(NetError::DemoEnded),
            Err(e) => return Err(NetError::DemoIo(e)),
        };
        self.delta_time = record.elapsed as f64;

        let mut payload = vec![0u8; record.len as usize];
        self.reader.read_exact(&mut payload).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => NetError::DemoEnded,
            _ => NetError::DemoIo(e),
        })?;
        Ok(payload)
    }

    fn rewind(&mut self) -> NetResult<()> {
        self.reader
            .seek(SeekFrom::Start(DEMO_HEADER_LEN))
            .map_err(NetError::DemoIo)?;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.pause_after_skip = true;
    }

    /// `explicit` is false when a seek resumes playback only for its own duration.
    pub fn unpause(&mut self, now: f64, explicit: bool) {
        self.reanchor(now);
        self.paused = false;
        if explicit {
            self.pause_after_skip = false;
        }
    }

    pub fn seek_forward(&mut self, secs: u32, now: f64) {
        if secs == 0 {
            return;
        }
        if self.pause_after_skip {
            self.unpause(now, false);
        }
        self.skip_time = secs as f64;
        self.start_time -= self.skip_time;
        self.skip_end_time = self.start_time + self.delta_time + self.skip_time;
    }

    /// Restarts from the first record and fast-forwards to `secs` before the current position.
    /// The format has no index, so this always rescans from the start.
    pub fn seek_backward(&mut self, secs: u32, now: f64) -> NetResult<()> {
        self.rewind()?;
        if secs == 0 {
            return Ok(());
        }
        if self.pause_after_skip {
            self.unpause(now, false);
        }
        self.skip_time = (secs as f64).min(self.delta_time);
        self.start_time += self.skip_time;
        self.skip_end_time = self.start_time + self.delta_time - self.skip_time;
        self.delta_time = 0.0;
        self.update_count = 0;
        Ok(())
    }

    pub fn go_to(&mut self, target_secs: u32, now: f64) -> NetResult<()> {
        let current = self.delta_time.max(0.0) as u32;
        if target_secs > current {
            self.seek_forward(target_secs - current, now);
        } else if target_secs < current {
            self.seek_backward(current - target_secs, now)?;
        }
        Ok(())
    }

    pub fn set_speed(&mut self, multiplier: f32, now: f64) -> NetResult<()> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&multiplier) {
            return Err(NetError::InvalidSpeed(multiplier));
        }
        self.speed = multiplier;
        self.reanchor(now);
        Ok(())
    }

    /// Plays exactly `updates` world updates, then pauses again.
    pub fn step_forward(&mut self, updates: u32, now: f64) {
        if !self.paused || updates == 0 {
            return;
        }
        self.skip_time = updates as f64;
        self.step_target = updates as i64;
        self.unpause(now, false);
        self.start_time -= updates as f64 * STEP_SECS_PER_UPDATE;
        self.skip_end_time = self.start_time + self.delta_time;
        self.stepping_back = false;
    }

    /// Replays from the start and stops `updates` world updates before the current one.
    pub fn step_backward(&mut self, updates: u32, now: f64) -> NetResult<()> {
        if !self.paused || updates == 0 {
            return Ok(());
        }
        self.rewind()?;
        let target = (self.update_count as i64 - updates as i64).max(1);
        self.skip_time = target as f64;
        self.step_target = target;
        self.unpause(now, false);
        self.skip_end_time = self.start_time + self.delta_time;
        self.delta_time = 0.0;
        self.update_count = 0;
        self.stepping_back = true;
        Ok(())
    }

    /// Counts a delivered world update. Returns true when a pending step just finished.
    pub fn note_world_update(&mut self, now: f64) -> bool {
        self.update_count += 1;
        if self.step_target == 0 {
            return false;
        }

        let finished = if self.stepping_back {
            self.update_count as i64 >= self.step_target
        } else {
            self.step_target -= 1;
            self.step_target <= 0
        };
        if !finished {
            return false;
        }

        self.step_target = 0;
        if self.stepping_back {
            self.skip_time = 0.0;
        }
        self.reanchor(now);
        self.pause();
        true
    }

    pub fn skip_map_transfer(&mut self) {
        if !self.skipping_map && self.skip_time == 0.0 {
            self.start_time -= MAP_SKIP_SECS;
            self.skipping_map = true;
        }
    }

    /// Called once the replay spectator has joined the rebuilt world.
    pub fn on_joined(&mut self, now: f64) {
        if self.skipping_map && self.skip_time == 0.0 {
            self.reanchor(now);
            self.skipping_map = false;
        } else if self.pause_after_skip {
            self.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn demo(records: &[(f32, &[u8])]) -> DemoPlayer {
        let mut data = vec![1, 3];
        for (elapsed, payload) in records {
            data.extend_from_slice(&elapsed.to_le_bytes());
            data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            data.extend_from_slice(payload);
        }
        DemoPlayer::from_reader(Cursor::new(data)).unwrap()
    }

    fn drain(player: &mut DemoPlayer, now: f64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if !player.begin_frame(false).run {
            return out;
        }
        while let Some(packet) = player.next_due(now).unwrap() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn delivers_in_time_order() {
        let mut player = demo(&[(0.5, &[2, 1]), (1.5, &[2, 2]), (2.5, &[2, 3])]);
        assert_eq!(player.duration(), 2.5);
        player.start(100.0);

        assert_eq!(drain(&mut player, 100.2), vec![vec![2, 1]]);
        assert!(drain(&mut player, 100.4).is_empty());
        assert_eq!(drain(&mut player, 101.0), vec![vec![2, 2]]);
        assert_eq!(player.delta_time(), 1.5);
        assert_eq!(drain(&mut player, 102.0), vec![vec![2, 3]]);
    }

    #[test]
    fn end_of_file_is_reported() {
        let mut player = demo(&[(0.1, &[2])]);
        player.start(0.0);
        assert!(player.begin_frame(false).run);
        assert_eq!(player.next_due(1.0).unwrap(), Some(vec![2]));
        assert!(matches!(player.next_due(1.0), Err(NetError::DemoEnded)));
    }

    #[test]
    fn speed_limits() {
        let mut player = demo(&[(1.0, &[2])]);
        assert!(matches!(
            player.set_speed(0.05, 0.0),
            Err(NetError::InvalidSpeed(_))
        ));
        assert!(matches!(
            player.set_speed(11.0, 0.0),
            Err(NetError::InvalidSpeed(_))
        ));
        player.set_speed(10.0, 0.0).unwrap();
        assert_eq!(player.speed(), 10.0);
    }

    #[test]
    fn map_skip_happens_once_and_reanchors_on_join() {
        let mut player = demo(&[
            (1.0, &[18, 0, 0, 0, 0]),
            (40.0, &[15]),
            (400.0, &[2]),
            (401.0, &[2]),
        ]);
        player.start(0.0);
        player.skip_map_transfer();
        player.skip_map_transfer();

        // 300 virtual seconds ahead, so the whole transfer is due at once
        assert_eq!(drain(&mut player, 0.0).len(), 3);
        player.on_joined(0.0);
        assert!(matches!(player.next_due(0.0), Ok(None)));
        assert_eq!(player.next_due(0.5).unwrap(), Some(vec![2]));
    }

    fn sample() -> DemoPlayer {
        demo(&[
            (0.5, &[2, 1]),
            (1.0, &[tag::GRENADE, 0]),
            (1.5, &[2, 2]),
            (5.0, &[2, 3]),
            (6.0, &[2, 4]),
        ])
    }

    #[test]
    fn pause_freezes_playback() {
        let mut player = sample();
        player.start(0.0);
        assert_eq!(drain(&mut player, 0.2), vec![vec![2, 1]]);

        player.pause();
        assert!(drain(&mut player, 3.0).is_empty());
        assert_eq!(player.delta_time(), 0.5);

        player.unpause(3.0, true);
        assert_eq!(drain(&mut player, 3.2), vec![vec![tag::GRENADE, 0]]);
    }

    #[test]
    fn seeking_forward_drops_grenades() {
        let mut player = sample();
        player.start(0.0);
        assert_eq!(drain(&mut player, 0.2).len(), 1);

        player.seek_forward(4, 0.2);
        assert!(player.is_skipping());
        assert_eq!(drain(&mut player, 0.2), vec![vec![2, 2], vec![2, 3]]);

        let frame = player.begin_frame(false);
        assert!(frame.restore_follow);
        assert!(!player.is_skipping());
    }

    #[test]
    fn seeking_backward_restarts_from_first_record() {
        let mut player = sample();
        player.start(0.0);
        assert_eq!(drain(&mut player, 5.5).len(), 5);
        assert_eq!(player.delta_time(), 6.0);

        player.seek_backward(3, 5.5).unwrap();
        assert_eq!(player.delta_time(), 0.0);
        assert!(player.is_skipping());
        assert_eq!(player.next_due(5.5).unwrap(), Some(vec![2, 1]));
    }

    #[test]
    fn stepping_plays_one_update_then_pauses() {
        let mut player = sample();
        player.start(0.0);
        player.pause();
        assert!(!player.begin_frame(false).run);

        player.step_forward(1, 10.0);
        assert!(player.begin_frame(false).run);
        assert_eq!(player.next_due(10.0).unwrap(), Some(vec![2, 1]));
        assert!(player.note_world_update(10.0));
        assert!(player.is_paused());
        assert_eq!(player.world_updates(), 1);
        assert!(matches!(player.next_due(10.0), Ok(None)));
    }

    #[test]
    fn stepping_requires_pause() {
        let mut player = sample();
        player.start(0.0);
        player.step_forward(3, 1.0);
        assert!(!player.is_skipping());
        player.step_backward(3, 1.0).unwrap();
        assert!(!player.is_skipping());
    }

    /// One world update every `interval` seconds, `count` of them.
    fn updates(count: u8, interval: f32) -> DemoPlayer {
        let records: Vec<(f32, Vec<u8>)> = (1..=count)
            .map(|k| (k as f32 * interval, vec![2, k]))
            .collect();
        let borrowed: Vec<(f32, &[u8])> = records
            .iter()
            .map(|(t, p)| (*t, p.as_slice()))
            .collect();
        demo(&borrowed)
    }

    /// Drains like the session does, counting every record as a world update.
    fn play(player: &mut DemoPlayer, now: f64) -> usize {
        let mut delivered = 0;
        if !player.begin_frame(false).run {
            return 0;
        }
        while let Some(_packet) = player.next_due(now).unwrap() {
            player.note_world_update(now);
            delivered += 1;
        }
        delivered
    }

    #[test]
    fn double_speed_halves_wall_time() {
        let mut normal = updates(10, 1.0);
        let mut fast = updates(10, 1.0);
        normal.start(0.0);
        fast.set_speed(2.0, 0.0).unwrap();
        fast.start(0.0);

        for wall in [1.0, 2.5, 4.0] {
            drain(&mut normal, wall);
            drain(&mut fast, wall / 2.0);
            assert_eq!(fast.delta_time(), normal.delta_time(), "at {wall}s");
        }
        assert_eq!(normal.delta_time(), 4.0);
    }

    #[test]
    fn speed_change_does_not_jump() {
        let mut player = updates(10, 1.0);
        player.start(0.0);
        drain(&mut player, 2.0);
        assert_eq!(player.delta_time(), 2.0);

        player.set_speed(2.0, 2.0).unwrap();
        assert!(drain(&mut player, 2.0).is_empty());
        assert_eq!(drain(&mut player, 2.5), vec![vec![2, 3]]);
        assert_eq!(player.delta_time(), 3.0);
    }

    #[test]
    fn forward_then_back_returns_to_the_same_spot() {
        let mut player = updates(80, 0.5);
        player.start(0.0);
        drain(&mut player, 20.0);
        assert_eq!(player.delta_time(), 20.0);

        player.seek_forward(10, 20.0);
        drain(&mut player, 20.0);
        assert_eq!(player.delta_time(), 30.0);
        assert!(player.begin_frame(false).restore_follow);
        assert!(!player.is_skipping());

        player.seek_backward(10, 20.0).unwrap();
        drain(&mut player, 20.0);
        assert!(player.begin_frame(false).restore_follow);
        assert!((player.delta_time() - 20.0).abs() <= 0.5);

        // playback carries on at normal pace afterwards
        assert_eq!(drain(&mut player, 20.5).len(), 1);
    }

    #[test]
    fn go_to_seeks_both_ways() {
        let mut player = updates(40, 1.0);
        player.start(0.0);
        drain(&mut player, 10.0);
        assert_eq!(player.delta_time(), 10.0);

        player.go_to(25, 10.0).unwrap();
        drain(&mut player, 10.0);
        player.begin_frame(false);
        assert_eq!(player.delta_time(), 25.0);
        assert!(!player.is_skipping());

        player.go_to(5, 10.0).unwrap();
        drain(&mut player, 10.0);
        player.begin_frame(false);
        assert_eq!(player.delta_time(), 5.0);
        assert!(!player.is_skipping());

        player.go_to(5, 10.0).unwrap();
        assert!(!player.is_skipping());
        assert_eq!(drain(&mut player, 11.0), vec![vec![2, 6]]);
    }

    #[test]
    fn stepping_back_lands_on_previous_update_and_stays_paused() {
        let mut player = updates(10, 1.0);
        player.start(0.0);
        assert_eq!(play(&mut player, 3.0), 3);
        player.pause();

        player.step_backward(1, 3.0).unwrap();
        assert_eq!(play(&mut player, 3.0), 2);
        assert!(player.is_paused());
        assert_eq!(player.world_updates(), 2);
        assert_eq!(player.delta_time(), 2.0);
        assert_eq!(play(&mut player, 10.0), 0);

        // the closing skip window re-pauses, yet the stepped update still plays
        player.step_forward(1, 10.0);
        assert_eq!(play(&mut player, 10.0), 1);
        assert!(player.is_paused());
        assert_eq!(player.world_updates(), 3);
        assert_eq!(player.delta_time(), 3.0);
    }
}
