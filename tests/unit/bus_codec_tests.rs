use agent_harness::bus::codec;
use agent_harness::models::message::{BusMessage, MessageKind};
use agent_harness::AppError;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn file_names_parse_seq_and_id() {
    assert_eq!(
        codec::parse_file_name("000001-abc.json"),
        Some((1, "abc".to_owned()))
    );
    assert_eq!(
        codec::parse_file_name("000042-id-with-dashes.json"),
        Some((42, "id-with-dashes".to_owned()))
    );
    assert_eq!(codec::parse_file_name("000001-abc.txt"), None);
    assert_eq!(codec::parse_file_name("1-abc.json"), None);
    assert_eq!(codec::parse_file_name("nodigits-abc.json"), None);
    assert_eq!(codec::parse_file_name("000001-.json"), None);
    assert_eq!(codec::parse_file_name(".tmp12345"), None);
}

#[test]
fn writes_assign_increasing_sequence_numbers() {
    let dir = TempDir::new().expect("tempdir");
    let first = BusMessage::request(MessageKind::Heartbeat, json!({}));
    let second = BusMessage::request(MessageKind::Heartbeat, json!({}));

    let p1 = codec::write_message(dir.path(), &first.id, &first).expect("write 1");
    let p2 = codec::write_message(dir.path(), &second.id, &second).expect("write 2");

    assert!(p1.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("000001-")));
    assert!(p2.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("000002-")));

    let files = codec::scan(dir.path()).expect("scan");
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].file_id, first.id);
    assert_eq!(files[1].file_id, second.id);
}

#[test]
fn scan_orders_by_sequence_and_skips_noise() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("000003-c.json"), "{}").expect("write");
    std::fs::write(dir.path().join("000001-a.json"), "{}").expect("write");
    std::fs::write(dir.path().join("000002-b.json"), "{}").expect("write");
    std::fs::write(dir.path().join("README.md"), "not a message").expect("write");

    let files = codec::scan(dir.path()).expect("scan");
    let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn round_trip_preserves_the_message() {
    let dir = TempDir::new().expect("tempdir");
    let message = BusMessage::request(MessageKind::Ask, json!({ "text": "deploy?" }));
    let path = codec::write_message(dir.path(), &message.id, &message).expect("write");
    let parsed = codec::read_message(&path).expect("read");
    assert_eq!(parsed, message);
}

#[test]
fn unparseable_contents_are_a_protocol_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("000001-junk.json");
    std::fs::write(&path, "not json at all").expect("write");
    assert!(matches!(
        codec::read_message(&path),
        Err(AppError::Protocol(_))
    ));
}

#[test]
fn contains_id_matches_the_name_component() {
    let dir = TempDir::new().expect("tempdir");
    let message = BusMessage::request(MessageKind::Heartbeat, json!({}));
    codec::write_message(dir.path(), "req-7", &message).expect("write");
    assert!(codec::contains_id(dir.path(), "req-7").expect("scan"));
    assert!(!codec::contains_id(dir.path(), "req-8").expect("scan"));
}
