/// Playback control typed into chat while a demo is playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemoCommand {
    /// Toggles pause.
    Pause,
    Unpause,
    Speed(f32),
    GoTo(u32),
    FastForward(u32),
    Rewind(u32),
    NextUpdates(u32),
    PrevUpdates(u32),
}

const MAX_TIMESTAMP_HOURS: u32 = 10;

impl DemoCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pause" => return Some(Self::Pause),
            "unpause" => return Some(Self::Unpause),
            _ => {}
        }

        let (command, argument) = text.split_at_checked(3)?;
        if argument.is_empty() {
            return None;
        }

        match command {
            "sp " => {
                if !argument.chars().all(|c| c.is_ascii_digit() || c == '.') {
                    return None;
                }
                argument.parse().ok().map(Self::Speed)
            }
            "gt " => parse_timestamp(argument).map(Self::GoTo),
            _ => {
                let value = parse_count(argument).filter(|&v| v != 0)?;
                match command {
                    "nu " => Some(Self::NextUpdates(value)),
                    "pu " => Some(Self::PrevUpdates(value)),
                    "ff " => Some(Self::FastForward(value)),
                    "bb " => Some(Self::Rewind(value)),
                    _ => None,
                }
            }
        }
    }
}

fn parse_count(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parses `s`, `m:s` or `h:m:s` into seconds. A bare seconds value may go up to ten hours;
/// otherwise minutes and seconds stop at 59 and hours at ten.
pub fn parse_timestamp(text: &str) -> Option<u32> {
    let parts = text
        .split(':')
        .map(parse_count)
        .collect::<Option<Vec<u32>>>()?;

    match parts.as_slice() {
        [secs] => (*secs <= MAX_TIMESTAMP_HOURS * 3600).then_some(*secs),
        [mins, secs] => (*mins <= 59 && *secs <= 59).then(|| mins * 60 + secs),
        [hours, mins, secs] => (*hours <= MAX_TIMESTAMP_HOURS && *mins <= 59 && *secs <= 59)
            .then(|| hours * 3600 + mins * 60 + secs),
        _ => None,
    }
}
