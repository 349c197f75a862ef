use super::*;
use crate::{
    error::ClientError,
    test_support::{historical, user, FakeBackend},
};

#[test]
fn reset_clears_messages_and_pending_echoes() {
    let mut store = ConversationStore::new();
    store.seed_history(vec![historical("Bob", "hi")]);
    store.append_local("hey", "Alice");
    store.reset();
    assert!(store.is_empty());

    // A pre-reset echo must not swallow a genuine message afterwards.
    assert!(store.append_live(Message::new("Alice", "hey", MessageOrigin::Live), "Alice"));
    assert_eq!(store.len(), 1);
}

#[test]
fn live_messages_append_after_history_in_arrival_order() {
    let mut store = ConversationStore::new();
    store.seed_history(vec![historical("Bob", "hi"), historical("Alice", "hello")]);
    assert!(store.append_live(Message::new("Bob", "yo", MessageOrigin::Live), "Alice"));
    assert!(store.append_live(Message::new("Bob", "yo", MessageOrigin::Live), "Alice"));

    let contents: Vec<_> = store.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hi", "hello", "yo", "yo"]);
    assert_eq!(store.messages()[0].origin, MessageOrigin::Historical);
    assert_eq!(store.messages()[3].origin, MessageOrigin::Live);
}

#[test]
fn backend_echo_of_local_message_is_suppressed_once() {
    let mut store = ConversationStore::new();
    let local = store.append_local("ping", "Alice");
    assert_eq!(local.origin, MessageOrigin::Local);

    assert!(!store.append_live(Message::new("Alice", "ping", MessageOrigin::Live), "Alice"));
    assert_eq!(store.len(), 1);

    // Same text from ourselves again is a real second message.
    assert!(store.append_live(Message::new("Alice", "ping", MessageOrigin::Live), "Alice"));
    assert_eq!(store.len(), 2);
}

#[test]
fn peer_message_with_same_text_is_not_treated_as_echo() {
    let mut store = ConversationStore::new();
    store.append_local("ok", "Alice");
    assert!(store.append_live(Message::new("Bob", "ok", MessageOrigin::Live), "Alice"));
    assert_eq!(store.len(), 2);
}

#[test]
fn retract_only_removes_the_latest_local_message() {
    let mut store = ConversationStore::new();
    let local = store.append_local("draft", "Alice");
    store.append_live(Message::new("Bob", "in between", MessageOrigin::Live), "Alice");
    assert!(!store.retract_local(&local));
    assert_eq!(store.len(), 2);

    let second = store.append_local("again", "Alice");
    assert!(store.retract_local(&second));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn missing_history_is_an_empty_conversation() {
    let backend = FakeBackend::signed_in(user(1, "Alice"));
    let history = ConversationStore::load_history(&backend, UserId(1), UserId(7))
        .await
        .expect("not found maps to empty");
    assert!(history.is_empty());
}

#[tokio::test]
async fn other_history_failures_propagate() {
    let backend = FakeBackend::signed_in(user(1, "Alice"));
    backend
        .set_history(7, Err(ClientError::Transport("reset".to_string())))
        .await;
    let err = ConversationStore::load_history(&backend, UserId(1), UserId(7))
        .await
        .expect_err("transport failure");
    assert!(matches!(err, ClientError::Transport(_)));
}
