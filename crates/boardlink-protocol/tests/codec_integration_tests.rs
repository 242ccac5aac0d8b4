//! End-to-end codec tests across both built-in protocols.

mod common;

use boardlink_core::{Pin, PinState};
use boardlink_protocol::{
    ByteStreamProcessor, Command, FirmataProtocol, FromDeviceMessage, LineProtocol,
    ProcessorState, Protocol, Reply, ToDeviceMessage,
};

#[test]
fn test_digital_switch_with_id_matches_wire_format() {
    let protocol = common::protocol("alp");
    let message =
        ToDeviceMessage::new(Command::PinStateChange(PinState::digital(13, true))).with_id(7);

    let bytes = protocol.encode(&message).unwrap();
    assert_eq!(bytes, b"alp://ppsw/13/1?id=7\n");

    let frame = std::str::from_utf8(&bytes).unwrap().trim_end();
    assert_eq!(LineProtocol::parse_to_device(frame), Some(message));
}

#[test]
fn test_line_stream_with_noise_between_frames() {
    let protocol = common::protocol("alp");
    let stream = b"\x00\xffbootloader v1\r\nalp://ared/0/17\nnoise\nalp://rply/ok?id=1\n";

    let messages = common::decode_whole(protocol.as_ref(), stream);
    assert_eq!(
        messages,
        vec![
            FromDeviceMessage::PinStateChanged(PinState::analog(0, 17)),
            FromDeviceMessage::Reply(Reply::new(1, true)),
        ]
    );
}

#[test]
fn test_line_decoding_is_chunking_independent() {
    let protocol = common::protocol("alp");
    let stream = common::device_stream(
        protocol.as_ref(),
        &[
            FromDeviceMessage::PinStateChanged(PinState::digital(2, true)),
            FromDeviceMessage::Info("ready".into()),
            FromDeviceMessage::Reply(Reply::new(9, false).with_param("why", "busy")),
        ],
    );

    let whole = common::decode_whole(protocol.as_ref(), &stream);
    assert_eq!(whole.len(), 3);
    for chunk in [1, 2, 3, 7, 64] {
        assert_eq!(
            common::decode_chunked(protocol.as_ref(), &stream, chunk),
            whole,
            "chunk size {chunk}"
        );
    }
}

#[test]
fn test_firmata_port_report_fans_out_eight_events() {
    let protocol = common::protocol("firmata");
    let bytes = FirmataProtocol::encode_port_report(0, 0b1010_0101);

    let states = common::pin_states(&common::decode_bytewise(protocol.as_ref(), &bytes));
    let levels: Vec<bool> = states
        .iter()
        .map(|s| match s {
            PinState::Digital { value, .. } => *value,
            PinState::Analog { .. } => panic!("unexpected analog state"),
        })
        .collect();

    assert_eq!(
        levels,
        vec![true, false, true, false, false, true, false, true]
    );
    assert_eq!(states[7].pin(), Pin::digital(7));
}

#[test]
fn test_firmata_mixed_stream() {
    let protocol = common::protocol("firmata");
    let mut stream = vec![0x42];
    stream.extend(
        protocol
            .encode_from_device(&FromDeviceMessage::PinStateChanged(PinState::analog(5, 300)))
            .unwrap(),
    );
    stream.extend(
        protocol
            .encode_from_device(&FromDeviceMessage::Custom("temp=21".into()))
            .unwrap(),
    );

    let mut processor = protocol.new_processor();
    processor.feed(&stream);

    assert_eq!(processor.discarded(), 1);
    assert_eq!(processor.state(), ProcessorState::Idle);
    assert_eq!(
        processor.drain_messages().collect::<Vec<_>>(),
        vec![
            FromDeviceMessage::PinStateChanged(PinState::analog(5, 300)),
            FromDeviceMessage::Custom("temp=21".into()),
        ]
    );
}

#[test]
fn test_processors_are_independent_per_connection() {
    let protocol = common::protocol("alp");
    let mut first = protocol.new_processor();
    let mut second = protocol.new_processor();

    first.feed(b"alp://dred/1/");
    second.feed(b"alp://dred/2/0\n");

    assert_eq!(first.messages_available(), 0);
    assert_eq!(second.messages_available(), 1);

    first.feed(b"1\n");
    assert_eq!(
        first.next_message(),
        Some(FromDeviceMessage::PinStateChanged(PinState::digital(1, true)))
    );
}

#[test]
fn test_firmata_rejects_line_only_commands() {
    let protocol = common::protocol("firmata");
    let err = protocol
        .encode(&ToDeviceMessage::new(Command::NoTone(4)))
        .unwrap_err();
    assert_eq!(err.to_string(), "Protocol firmata cannot encode no-tone");
}
