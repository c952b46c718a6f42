//! End-to-end engine tests against the in-process fake IMAP server:
//! each test boots the engine with an in-memory cache, points it at a
//! scripted server on localhost and exercises one public operation.

mod fake_imap;

use fake_imap::FakeImapServer;
use mailbeam::modules::cache::memory::MemoryCache;
use mailbeam::modules::imap::command::AppendPayload;
use mailbeam::{Encryption, Engine, EngineConfig, EngineHandle, ImapServerConfig};
use std::time::Duration;

async fn engine_for(server: &FakeImapServer) -> EngineHandle {
    let mut imap = ImapServerConfig::new("127.0.0.1", server.port(), Encryption::None);
    imap.auth.username = "testuser".into();
    imap.auth.password = "testpass".into();
    let config = EngineConfig::new(imap);
    let (engine, handle) = Engine::new(config, Box::new(MemoryCache::new()));
    tokio::spawn(engine.run());
    handle
}

async fn with_timeout<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("test timed out")
}

#[tokio::test]
async fn lists_mailboxes_with_inbox_first() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    let mailboxes = with_timeout(handle.list_mailboxes("")).await.unwrap();
    let names: Vec<&str> = mailboxes.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["INBOX", "alpha", "archive", "Beta", "gamma"]);
    assert!(mailboxes[2]
        .flags
        .iter()
        .any(|f| f.eq_ignore_ascii_case("\\Noselect")));

    handle.shutdown();
}

#[tokio::test]
async fn opening_a_mailbox_runs_the_full_sync() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    with_timeout(handle.list_mailboxes("")).await.unwrap();
    let exists = with_timeout(handle.open_mailbox("INBOX")).await.unwrap();
    assert_eq!(exists, 3);

    // the message list carries the three placeholder messages in UID
    // order
    let list = mailbeam::modules::tree::NodeHandle::MessageList {
        mailbox: "INBOX".into(),
    };
    let children = with_timeout(handle.child_handles(list)).await.unwrap();
    assert_eq!(children.len(), 3);
    match &children[1] {
        mailbeam::modules::tree::NodeHandle::Message { uid, .. } => assert_eq!(*uid, 5),
        other => panic!("unexpected: {other:?}"),
    }

    handle.shutdown();
}

#[tokio::test]
async fn metadata_and_part_fetches_populate_the_tree() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    with_timeout(handle.list_mailboxes("")).await.unwrap();
    with_timeout(handle.open_mailbox("INBOX")).await.unwrap();
    with_timeout(handle.fetch_message_metadata("INBOX", 5))
        .await
        .unwrap();

    let message = mailbeam::modules::tree::NodeHandle::Message {
        mailbox: "INBOX".into(),
        uid: 5,
    };
    match with_timeout(handle.node_snapshot(message)).await.unwrap() {
        Some(mailbeam::modules::engine::NodeSnapshot::Message {
            envelope, flags, ..
        }) => {
            assert_eq!(
                envelope.unwrap().subject.as_deref(),
                Some("fake subject")
            );
            assert_eq!(flags, vec!["\\Seen".to_string()]);
        }
        other => panic!("unexpected: {other:?}"),
    }

    let data = with_timeout(handle.fetch_part("INBOX", 5, "1")).await.unwrap();
    assert_eq!(data, b"hello world");

    // a second fetch is answered straight from the cache
    let again = with_timeout(handle.fetch_part("INBOX", 5, "1")).await.unwrap();
    assert_eq!(again, b"hello world");

    handle.shutdown();
}

#[tokio::test]
async fn status_preallocates_placeholders() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    with_timeout(handle.list_mailboxes("")).await.unwrap();
    with_timeout(handle.mailbox_status("INBOX")).await.unwrap();

    let list = mailbeam::modules::tree::NodeHandle::MessageList {
        mailbox: "INBOX".into(),
    };
    let children = with_timeout(handle.child_handles(list)).await.unwrap();
    assert_eq!(children.len(), 3);

    handle.shutdown();
}

#[tokio::test]
async fn append_delivers_the_appenduid() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    with_timeout(handle.list_mailboxes("")).await.unwrap();
    let message = b"From: a@b\r\nSubject: x\r\n\r\nbody\r\n".to_vec();
    let (uid_validity, uid) = with_timeout(handle.append(
        "INBOX",
        vec!["\\Seen".into()],
        None,
        AppendPayload::Literal(message),
    ))
    .await
    .unwrap();

    assert_eq!(uid_validity, Some(111));
    assert_eq!(uid, Some(23));
    assert_eq!(server.appends_seen(), 1);

    handle.shutdown();
}

#[tokio::test]
async fn genurlauth_returns_the_authorized_url() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;

    with_timeout(handle.list_mailboxes("")).await.unwrap();
    let url = with_timeout(handle.gen_url_auth(
        "imap://testuser@127.0.0.1/Sent;UIDVALIDITY=111;uid=23;urlauth=submit+testuser",
        "INTERNAL",
    ))
    .await
    .unwrap();
    assert!(url.ends_with(":internal:91354a"), "{url}");

    handle.shutdown();
}

#[tokio::test]
async fn offline_policy_defers_until_back_online() {
    let server = FakeImapServer::start().await;
    let handle = engine_for(&server).await;
    handle.set_network_policy(mailbeam::modules::settings::NetworkPolicy::Offline);

    let pending = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.list_mailboxes("").await })
    };
    // give the queued task a chance to (not) run
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pending.is_finished());

    handle.set_network_policy(mailbeam::modules::settings::NetworkPolicy::Online);
    let mailboxes = with_timeout(async { pending.await.unwrap() }).await.unwrap();
    assert_eq!(mailboxes.len(), 5);

    handle.shutdown();
}
