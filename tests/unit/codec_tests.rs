//! Unit tests for the telemetry line codec.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use rigflow::supervisor::codec::TelemetryCodec;

fn decode_all(codec: &mut TelemetryCodec, input: &[u8]) -> Vec<String> {
    let mut buf = BytesMut::from(input);
    let mut lines = Vec::new();
    while let Some(line) = codec.decode(&mut buf).expect("decode") {
        lines.push(line);
    }
    while let Some(line) = codec.decode_eof(&mut buf).expect("decode_eof") {
        lines.push(line);
    }
    lines
}

#[test]
fn splits_on_either_terminator() {
    let mut codec = TelemetryCodec::new();
    let lines = decode_all(&mut codec, b"one\ntwo\r\nthree\rfour\n");
    assert_eq!(lines, ["one", "two", "three", "four"]);
}

#[test]
fn carriage_return_redraws_become_separate_lines() {
    let mut codec = TelemetryCodec::new();
    let lines = decode_all(&mut codec, b"pkts=1\rpkts=2\rpkts=3\r");
    assert_eq!(lines, ["pkts=1", "pkts=2", "pkts=3"]);
}

#[test]
fn trims_and_drops_blank_lines() {
    let mut codec = TelemetryCodec::new();
    let lines = decode_all(&mut codec, b"  padded  \n\n   \r\n\tx\t\n");
    assert_eq!(lines, ["padded", "x"]);
}

#[test]
fn partial_line_waits_for_terminator() {
    let mut codec = TelemetryCodec::new();
    let mut buf = BytesMut::from(&b"incompl"[..]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"ete\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("incomplete")
    );
}

#[test]
fn trailing_text_is_flushed_at_eof() {
    let mut codec = TelemetryCodec::new();
    let lines = decode_all(&mut codec, b"first\nlast without newline");
    assert_eq!(lines, ["first", "last without newline"]);
}

#[test]
fn invalid_utf8_is_replaced_not_fatal() {
    let mut codec = TelemetryCodec::new();
    let lines = decode_all(&mut codec, b"bad \xff\xfe byte\nok\n");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("bad "));
    assert!(lines[0].contains('\u{fffd}'));
    assert_eq!(lines[1], "ok");
}

#[test]
fn overlong_line_is_truncated_and_rest_discarded() {
    let mut codec = TelemetryCodec::with_max_length(8);
    let mut buf = BytesMut::from(&b"0123456789"[..]);
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("01234567")
    );
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"abcdef\nnext\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("next"));
}

#[test]
fn overlong_tail_at_eof_is_cut_to_limit() {
    let mut codec = TelemetryCodec::with_max_length(4);
    let lines = decode_all(&mut codec, b"tiny\nabcdefgh");
    assert_eq!(lines, ["tiny", "abcd"]);
}

#[test]
fn overlong_terminated_line_is_cut_to_limit() {
    let mut codec = TelemetryCodec::with_max_length(8);
    let mut buf = BytesMut::from(&b"0123456789abc\nnext\n"[..]);

    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("01234567")
    );
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("next"));
    assert!(codec.decode(&mut buf).expect("decode").is_none());
}
