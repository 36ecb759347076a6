mod common;

use std::fs;
use std::io::Cursor;

use glam::Vec3;

use common::{
    RecordingGame, SharedBuffer, connected_client, encode, map_chunk, state_data, world_update,
    zlib,
};
use spadenet::net::Tool;
use spadenet::{
    ConnectionStatus, DemoPlayer, DemoRecorder, NetClient, NetError, ProtocolVersion,
    ServerPacket, SessionConfig, list_demos,
};

const V075: ProtocolVersion = ProtocolVersion::V075;

/// Records a short live session: map transfer with one buffered update, state, one more update.
fn record_session() -> Vec<u8> {
    let (mut client, wire) = connected_client(V075);
    let buffer = SharedBuffer::default();
    client
        .start_recording_to(Box::new(buffer.clone()), 0.0)
        .unwrap();
    assert!(client.is_recording());

    wire.push(encode(ServerPacket::MapStart { map_size: 32 }, V075));
    wire.push(map_chunk(&zlib(b"recorded map")));
    wire.push(encode(world_update(Vec3::new(1.0, 1.0, 1.0)), V075));
    client.poll(0.5).unwrap();

    wire.push(encode(state_data(3), V075));
    client.poll(1.0).unwrap();

    wire.push(encode(world_update(Vec3::new(2.0, 2.0, 2.0)), V075));
    client.poll(2.0).unwrap();

    client.disconnect();
    assert!(!client.is_recording());
    buffer.bytes()
}

fn replaying_client(bytes: Vec<u8>) -> NetClient<RecordingGame> {
    let player = DemoPlayer::from_reader(Cursor::new(bytes)).unwrap();
    let mut client = NetClient::new(SessionConfig::default(), RecordingGame::default());
    client.replay_from(player, 0.0);
    client
}

#[test]
fn recording_captures_every_packet_with_timestamps() {
    let bytes = record_session();
    let player = DemoPlayer::from_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(player.protocol(), V075);
    assert_eq!(player.duration(), 2.0);
}

#[test]
fn replay_rebuilds_the_session_as_spectator() {
    let mut client = replaying_client(record_session());
    assert!(client.is_replaying());
    assert_eq!(client.status_text(), "Reading demo file");

    // the map transfer is skipped ahead, so the whole join plays out in one frame
    client.poll(100.0).unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(
        client.game().events,
        vec![
            "create_world",
            "world_update 1",
            "apply_state 33",
            "joined_game",
            "existing_player 33 Deuce",
        ]
    );
    assert_eq!(client.game().world_updates.len(), 1);
    assert_eq!(client.demo_player().map(|p| p.world_updates()), Some(1));

    let result = client.poll(200.0);
    assert!(matches!(result, Err(NetError::DemoEnded)));
    assert_eq!(client.game().world_updates.len(), 2);
    assert_eq!(
        client.game().world_updates[1][0].position,
        Vec3::new(2.0, 2.0, 2.0)
    );
    assert_eq!(client.status(), ConnectionStatus::NotConnected);
    assert_eq!(client.status_text(), "Demo Ended: End of Recording reached");
    assert!(client.game().world.is_none());
    assert!(!client.is_replaying());
}

#[test]
fn replay_ignores_outbound_traffic() {
    let mut client = replaying_client(record_session());
    client.poll(100.0).unwrap();

    client.send_position(Vec3::ONE).unwrap();
    client.send_tool(Tool::Spade).unwrap();
    assert_eq!(client.ping(), None);
}

#[test]
fn chat_drives_playback_commands() {
    let mut client = replaying_client(record_session());
    client.poll(100.0).unwrap();

    assert!(client.demo_command("pause").unwrap());
    assert!(client.demo_player().unwrap().is_paused());

    // nothing is delivered while paused
    client.poll(150.0).unwrap();
    assert_eq!(client.game().world_updates.len(), 1);

    assert!(matches!(
        client.demo_command("sp 20"),
        Err(NetError::InvalidSpeed(_))
    ));
    assert!(!client.demo_command("hello").unwrap());
    client.send_chat("hello", true).unwrap();

    client.send_chat("unpause", true).unwrap();
    assert!(!client.demo_player().unwrap().is_paused());
    client.poll(150.5).unwrap();
    assert_eq!(client.game().world_updates.len(), 2);
}

#[test]
fn demo_commands_need_a_replay() {
    let (mut client, _wire) = connected_client(V075);
    assert!(!client.demo_command("pause").unwrap());
}

#[test]
fn lists_demos_in_a_directory() {
    let dir = std::env::temp_dir().join(format!("spadenet-demos-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let mut recorder = DemoRecorder::start(Vec::new(), ProtocolVersion::V076, 0.0).unwrap();
    recorder.record(&[2, 0], 1.5).unwrap();
    fs::write(dir.join("2.demo"), recorder.finish().unwrap()).unwrap();
    fs::write(dir.join("1.demo"), record_session()).unwrap();
    fs::write(dir.join("notes.txt"), b"not a demo").unwrap();
    fs::write(dir.join("broken.demo"), [9u8, 9]).unwrap();

    let demos = list_demos(&dir).unwrap();
    fs::remove_dir_all(&dir).unwrap();

    let names: Vec<String> = demos.iter().map(|d| d.file_name()).collect();
    assert_eq!(names, vec!["1.demo", "2.demo"]);
    assert_eq!(demos[0].protocol, V075);
    assert_eq!(demos[1].protocol, ProtocolVersion::V076);
    assert_eq!(demos[1].duration, 1.5);
}
