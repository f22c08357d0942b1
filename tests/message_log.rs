//! Integration tests for the file-backed message log

use std::sync::Arc;
use vitals_triage_agent::core::SampleStore;
use vitals_triage_agent::messages::{
    FileStore, KeyValueStore, Message, MessageLog, Origin, MESSAGES_KEY,
};

fn file_store(dir: &tempfile::TempDir) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(dir.path()))
}

#[test]
fn test_reload_preserves_append_order() {
    let dir = tempfile::tempdir().unwrap();

    let m1 = Message::user("Here's my latest health data")
        .with_health_data(SampleStore::from_values(&[55.0, 58.0, 57.0], &[45.0, 48.0], &[3000.0]));
    let m2 = Message::ai("Your heart rate is lower than normal.");

    {
        let log = MessageLog::load(file_store(&dir));
        log.append(m1.clone()).unwrap();
        log.append(m2.clone()).unwrap();
    }

    let reloaded = MessageLog::load(file_store(&dir));
    assert_eq!(reloaded.messages(), vec![m1, m2]);
}

#[test]
fn test_appends_after_reload_extend_the_log() {
    let dir = tempfile::tempdir().unwrap();

    MessageLog::load(file_store(&dir))
        .append(Message::user("first"))
        .unwrap();
    MessageLog::load(file_store(&dir))
        .append(Message::system("second"))
        .unwrap();

    let log = MessageLog::load(file_store(&dir));
    let contents: Vec<_> = log.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert_eq!(log.messages()[1].origin, Origin::System);
}

#[test]
fn test_corrupt_file_loads_empty_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    std::fs::write(store.path_for(MESSAGES_KEY), b"[{\"id\": truncated").unwrap();

    let log = MessageLog::load(Arc::new(store.clone()));
    assert!(log.is_empty());

    log.append(Message::user("fresh start")).unwrap();
    let reloaded = MessageLog::load(Arc::new(store));
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn test_clear_removes_persisted_messages() {
    let dir = tempfile::tempdir().unwrap();
    let log = MessageLog::load(file_store(&dir));
    log.append_all(vec![Message::user("q"), Message::ai("a")])
        .unwrap();

    log.clear().unwrap();

    assert!(MessageLog::load(file_store(&dir)).is_empty());
}

#[test]
fn test_two_writers_on_one_directory_keep_each_others_entries() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MessageLog::load(file_store(&dir));
    let cli = MessageLog::load(file_store(&dir));

    agent.append(Message::user("from running agent")).unwrap();
    cli.append(Message::user("from cli chat")).unwrap();
    agent.append(Message::ai("agent reply")).unwrap();

    let expected = vec!["from running agent", "from cli chat", "agent reply"];
    let contents = |log: &MessageLog| -> Vec<String> {
        log.messages().into_iter().map(|m| m.content).collect()
    };
    assert_eq!(contents(&MessageLog::load(file_store(&dir))), expected);
    assert_eq!(contents(&agent), expected);
}

#[test]
fn test_clear_from_another_writer_is_not_undone() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MessageLog::load(file_store(&dir));
    agent.append(Message::user("old")).unwrap();

    MessageLog::load(file_store(&dir)).clear().unwrap();
    agent.append(Message::user("new")).unwrap();

    let contents: Vec<_> = MessageLog::load(file_store(&dir))
        .messages()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["new"]);
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let log = MessageLog::load(file_store(&dir));
            std::thread::spawn(move || {
                for i in 0..10 {
                    log.append(Message::user(format!("{writer}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(MessageLog::load(file_store(&dir)).len(), 40);
}
