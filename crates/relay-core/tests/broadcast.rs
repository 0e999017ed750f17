// crates/relay-core/tests/broadcast.rs
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    ChatMessage, ClientHandle, ClientId, InMemoryStore, MessageStore, OutboundMessage, OutboundRx,
    PresenceSnapshot, Relay, RelayError, RelayOptions, StoreError,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn relay_with_capacity(capacity: usize) -> (Relay, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::unbounded());
    let relay = Relay::start(
        store.clone(),
        RelayOptions {
            outbound_capacity: capacity,
        },
    );
    (relay, store)
}

async fn join(relay: &Relay, name: &str) -> (ClientId, OutboundRx) {
    let (handle, rx) = relay.open_client(Some(name));
    let id = handle.id();
    assert!(relay.registry().register(handle).await);
    (id, rx)
}

async fn next(rx: &mut OutboundRx) -> Option<OutboundMessage> {
    timeout(WAIT, rx.recv()).await.expect("timed out waiting for outbound message")
}

async fn next_chat(rx: &mut OutboundRx) -> ChatMessage {
    loop {
        match next(rx).await {
            Some(OutboundMessage::Chat(msg)) => return (*msg).clone(),
            Some(OutboundMessage::Presence(_)) => continue,
            None => panic!("outbound queue closed while waiting for chat"),
        }
    }
}

async fn wait_for_roster(rx: &mut OutboundRx, users: &[&str]) {
    let expected = PresenceSnapshot::new(users.iter().map(|u| u.to_string()).collect());
    loop {
        match next(rx).await {
            Some(OutboundMessage::Presence(snapshot)) if *snapshot == expected => return,
            Some(_) => continue,
            None => panic!("outbound queue closed while waiting for {:?}", users),
        }
    }
}

/// Read until the queue has been quiet for a while. Returns the chat
/// contents seen and the most recent roster.
async fn settle(rx: &mut OutboundRx) -> (Vec<String>, Option<Vec<String>>) {
    let mut chats = Vec::new();
    let mut roster = None;
    while let Ok(Some(msg)) = timeout(Duration::from_millis(200), rx.recv()).await {
        match msg {
            OutboundMessage::Chat(msg) => chats.push(msg.content.clone()),
            OutboundMessage::Presence(snapshot) => roster = Some(snapshot.users.clone()),
        }
    }
    (chats, roster)
}

async fn wait_until_absent(relay: &Relay, id: ClientId) {
    timeout(WAIT, async {
        while relay.registry().contains(id).await {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client was never deregistered");
}

#[tokio::test]
async fn every_client_sees_every_message_in_submission_order() {
    let (relay, _store) = relay_with_capacity(64);
    let mut receivers = Vec::new();
    for name in ["alice", "bob", "carol"] {
        receivers.push(join(&relay, name).await.1);
    }

    let dispatcher = relay.dispatcher();
    for i in 0..10 {
        dispatcher
            .submit(ChatMessage::received_now("alice", format!("msg {i}")))
            .unwrap();
    }

    for rx in receivers.iter_mut() {
        for i in 0..10 {
            let msg = next_chat(rx).await;
            assert_eq!(msg.sender, "alice");
            assert_eq!(msg.content, format!("msg {i}"));
        }
    }
}

#[tokio::test]
async fn messages_from_different_senders_share_one_order() {
    let (relay, _store) = relay_with_capacity(64);
    let (_a, mut alice_rx) = join(&relay, "alice").await;
    let (_b, mut bob_rx) = join(&relay, "bob").await;

    let from_alice = relay.dispatcher();
    let from_bob = relay.dispatcher();
    from_alice.submit(ChatMessage::received_now("alice", "one")).unwrap();
    from_bob.submit(ChatMessage::received_now("bob", "two")).unwrap();
    from_alice.submit(ChatMessage::received_now("alice", "three")).unwrap();

    for rx in [&mut alice_rx, &mut bob_rx] {
        let seen: Vec<String> = vec![
            next_chat(rx).await.content,
            next_chat(rx).await.content,
            next_chat(rx).await.content,
        ];
        assert_eq!(seen, vec!["one", "two", "three"]);
    }
}

#[tokio::test]
async fn presence_follows_joins_and_leaves() {
    let (relay, _store) = relay_with_capacity(16);
    let (_alice, mut alice_rx) = join(&relay, "alice").await;
    wait_for_roster(&mut alice_rx, &["alice"]).await;

    let (bob, mut bob_rx) = join(&relay, "bob").await;
    wait_for_roster(&mut alice_rx, &["alice", "bob"]).await;
    wait_for_roster(&mut bob_rx, &["alice", "bob"]).await;

    assert!(relay.registry().deregister(bob).await);
    wait_for_roster(&mut alice_rx, &["alice"]).await;
}

#[tokio::test]
async fn stalled_client_is_dropped_and_leaves_the_roster() {
    let (relay, _store) = relay_with_capacity(16);
    let (_alice, mut alice_rx) = join(&relay, "alice").await;

    // bob's writer never reads: a one-slot queue that we never drain.
    let (bob, mut bob_rx) = ClientHandle::new(relay.registry().next_client_id(), Some("bob"), 1);
    let bob_id = bob.id();
    relay.registry().register(bob).await;
    wait_for_roster(&mut alice_rx, &["alice", "bob"]).await;

    relay
        .dispatcher()
        .submit(ChatMessage::received_now("alice", "hi"))
        .unwrap();

    wait_until_absent(&relay, bob_id).await;
    let (chats, roster) = settle(&mut alice_rx).await;
    assert_eq!(chats, vec!["hi"]);
    assert_eq!(roster, Some(vec!["alice".to_string()]));

    // bob got at most what fit in his slot, then the queue was closed.
    let mut leftover = 0;
    while next(&mut bob_rx).await.is_some() {
        leftover += 1;
    }
    assert!(leftover <= 1);

    // Later traffic only reaches alice.
    relay
        .dispatcher()
        .submit(ChatMessage::received_now("alice", "still here?"))
        .unwrap();
    assert_eq!(next_chat(&mut alice_rx).await.content, "still here?");
    assert_eq!(relay.registry().snapshot().await, vec!["alice"]);
}

#[tokio::test]
async fn client_with_closed_queue_is_dropped() {
    let (relay, _store) = relay_with_capacity(16);
    let (_alice, mut alice_rx) = join(&relay, "alice").await;
    let (gone, gone_rx) = join(&relay, "ghost").await;
    drop(gone_rx);

    relay
        .dispatcher()
        .submit(ChatMessage::received_now("alice", "anyone?"))
        .unwrap();

    wait_until_absent(&relay, gone).await;
    let (chats, roster) = settle(&mut alice_rx).await;
    assert_eq!(chats, vec!["anyone?"]);
    assert_eq!(roster, Some(vec!["alice".to_string()]));
}

#[tokio::test]
async fn messages_are_persisted_in_submission_order() {
    let (relay, store) = relay_with_capacity(16);
    let dispatcher = relay.dispatcher();
    for content in ["first", "second", "third"] {
        dispatcher
            .submit(ChatMessage::received_now("alice", content))
            .unwrap();
    }

    let history = timeout(WAIT, async {
        loop {
            let history = store.chat_history().await.unwrap();
            if history.len() == 3 {
                return history;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages were never stored");

    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[derive(Default)]
struct FailingStore {
    attempts: Mutex<usize>,
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn save_message(&self, _msg: &ChatMessage) -> Result<(), StoreError> {
        *self.attempts.lock().unwrap() += 1;
        Err(StoreError::Unavailable("database is down".to_string()))
    }

    async fn chat_history(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Err(StoreError::Unavailable("database is down".to_string()))
    }

    async fn delete_all_messages(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database is down".to_string()))
    }
}

#[tokio::test]
async fn store_failure_does_not_affect_delivery() {
    let store = Arc::new(FailingStore::default());
    let relay = Relay::start(store.clone(), RelayOptions { outbound_capacity: 16 });
    let (_alice, mut alice_rx) = join(&relay, "alice").await;

    let dispatcher = relay.dispatcher();
    dispatcher.submit(ChatMessage::received_now("alice", "one")).unwrap();
    dispatcher.submit(ChatMessage::received_now("alice", "two")).unwrap();

    assert_eq!(next_chat(&mut alice_rx).await.content, "one");
    assert_eq!(next_chat(&mut alice_rx).await.content, "two");

    timeout(WAIT, async {
        while *store.attempts.lock().unwrap() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("store was never asked to save");
}

#[tokio::test]
async fn submit_fails_once_relay_is_shut_down() {
    let (relay, _store) = relay_with_capacity(1);
    let dispatcher = relay.dispatcher();
    timeout(WAIT, relay.shutdown())
        .await
        .expect("shutdown never finished");

    assert!(dispatcher.is_closed());
    assert_eq!(
        dispatcher.submit(ChatMessage::received_now("alice", "late")),
        Err(RelayError::DispatcherClosed)
    );
}

#[tokio::test]
async fn shutdown_saves_everything_already_submitted() {
    let (relay, store) = relay_with_capacity(1);
    let dispatcher = relay.dispatcher();
    for i in 0..50 {
        dispatcher
            .submit(ChatMessage::received_now("alice", format!("msg {i}")))
            .unwrap();
    }

    timeout(WAIT, relay.shutdown())
        .await
        .expect("shutdown never finished");

    let history = store.chat_history().await.unwrap();
    assert_eq!(history.len(), 50);
    assert_eq!(history[49].content, "msg 49");

    // A second call has nothing left to stop.
    timeout(WAIT, relay.shutdown())
        .await
        .expect("second shutdown hung");
}

/// Join with a writer already draining the outbound queue, the way a
/// connection does, and return what that writer has passed on.
async fn join_with_writer(relay: &Relay, name: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
    let (handle, mut rx) = relay.open_client(Some(name));
    let (tx, written) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if tx.send(msg).is_err() {
                break;
            }
        }
    });
    assert!(relay.registry().register(handle).await);
    written
}

async fn written_roster(written: &mut mpsc::UnboundedReceiver<OutboundMessage>, users: &[&str]) {
    let expected = PresenceSnapshot::new(users.iter().map(|u| u.to_string()).collect());
    timeout(WAIT, async {
        loop {
            match written.recv().await {
                Some(OutboundMessage::Presence(snapshot)) if *snapshot == expected => return,
                Some(_) => continue,
                None => panic!("writer stopped while waiting for {:?}", users),
            }
        }
    })
    .await
    .expect("roster never written");
}

async fn written_chat(written: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> String {
    timeout(WAIT, async {
        loop {
            match written.recv().await {
                Some(OutboundMessage::Chat(msg)) => return msg.content.clone(),
                Some(_) => continue,
                None => panic!("writer stopped while waiting for chat"),
            }
        }
    })
    .await
    .expect("chat never written")
}

#[tokio::test]
async fn joins_at_handoff_capacity_keep_ready_clients() {
    let (relay, _store) = relay_with_capacity(1);

    let mut carol = join_with_writer(&relay, "carol").await;
    written_roster(&mut carol, &["carol"]).await;

    // carol's writer is now idle but ready; two more join back to back.
    let mut alice = join_with_writer(&relay, "alice").await;
    let mut bob = join_with_writer(&relay, "bob").await;

    for written in [&mut carol, &mut alice, &mut bob] {
        written_roster(written, &["alice", "bob", "carol"]).await;
    }
    assert_eq!(relay.registry().len().await, 3);

    relay
        .dispatcher()
        .submit(ChatMessage::received_now("alice", "hello all"))
        .unwrap();
    for written in [&mut carol, &mut alice, &mut bob] {
        assert_eq!(written_chat(written).await, "hello all");
    }
    assert_eq!(relay.registry().len().await, 3);
}

#[tokio::test]
async fn sequential_joins_at_handoff_capacity_keep_everyone() {
    let (relay, _store) = relay_with_capacity(1);

    let mut writers = Vec::new();
    let mut names = Vec::new();
    for i in 0..20 {
        let name = format!("user{i:02}");
        writers.push(join_with_writer(&relay, &name).await);
        names.push(name);
    }

    let expected: Vec<&str> = names.iter().map(String::as_str).collect();
    for written in writers.iter_mut() {
        written_roster(written, &expected).await;
    }
    assert_eq!(relay.registry().len().await, 20);
}
