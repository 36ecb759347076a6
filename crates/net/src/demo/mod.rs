mod command;
mod format;
mod player;
mod recorder;

pub use command::{DemoCommand, parse_timestamp};
pub use format::{
    DEMO_EXTENSION, DEMO_FORMAT_VERSION, DEMO_HEADER_LEN, DemoInfo, format_duration, inspect_demo,
    list_demos,
};
pub use player::{DemoPlayer, DemoSource, FrameStart, MAX_SPEED, MIN_SPEED};
pub use recorder::DemoRecorder;
