//! SessionManager multiplexing and cross-session isolation.

#[path = "../helpers/fake_inspector.rs"]
mod fake_inspector;

use assert_matches::assert_matches;
use debugger_cdp::debug::{SessionState, SessionTarget};
use debugger_cdp::{Error, SessionManager};
use fake_inspector::FakeInspector;
use std::time::Duration;

async fn create_attached(manager: &SessionManager, server: &FakeInspector) -> String {
    manager
        .create_session(SessionTarget::Attach {
            ws_url: server.ws_url.clone(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_and_lookup() {
    let server = FakeInspector::start().await;
    let manager = SessionManager::new();

    let id = create_attached(&manager, &server).await;
    assert!(manager.has_session(&id).await);
    assert_eq!(manager.session_count().await, 1);
    assert_eq!(manager.list_sessions().await, vec![id.clone()]);

    let session = manager.get_session(&id).await.unwrap();
    assert_eq!(session.id, id);
}

#[tokio::test]
async fn test_two_sessions_are_isolated() {
    let server1 = FakeInspector::start().await;
    let server2 = FakeInspector::start().await;
    let manager = SessionManager::new();

    let id1 = create_attached(&manager, &server1).await;
    let id2 = create_attached(&manager, &server2).await;
    assert_ne!(id1, id2);

    let s1 = manager.get_session(&id1).await.unwrap();
    let s2 = manager.get_session(&id2).await.unwrap();

    let bp1 = s1.set_breakpoint("/one.js", 1, None).await.unwrap();
    let bp2 = s2.set_breakpoint("/two.js", 2, None).await.unwrap();

    let all1 = s1.get_all_breakpoints();
    let all2 = s2.get_all_breakpoints();
    assert_eq!(all1.len(), 1);
    assert_eq!(all2.len(), 1);
    assert_eq!(all1[0].id, bp1);
    assert_eq!(all2[0].id, bp2);
    assert_eq!(all1[0].file(), Some("/one.js"));
    assert_eq!(all2[0].file(), Some("/two.js"));

    s1.add_watched_variable("only-in-s1", "x");
    assert!(s2.watched_variables().is_empty());

    // Each session talked to its own inspector.
    assert!(!server1.state.methods_seen().is_empty());
    assert!(!server2.state.methods_seen().is_empty());

    // Removing one leaves the other fully operational.
    manager.remove_session(&id1).await.unwrap();
    assert!(!manager.has_session(&id1).await);
    assert!(manager.has_session(&id2).await);

    let s2 = manager.get_session(&id2).await.unwrap();
    assert_eq!(s2.get_breakpoint_count(), 1);
    assert!(s2.get_state().is_live());
}

#[tokio::test]
async fn test_remove_unknown_session() {
    let manager = SessionManager::new();
    assert_matches!(
        manager.remove_session("missing").await,
        Err(Error::SessionNotFound(_))
    );
}

#[tokio::test]
async fn test_prune_terminated_sessions() {
    let server1 = FakeInspector::start().await;
    let server2 = FakeInspector::start().await;
    let manager = SessionManager::new();

    let id1 = create_attached(&manager, &server1).await;
    let id2 = create_attached(&manager, &server2).await;

    // Terminate one session out-of-band; prune should reap exactly it.
    manager
        .get_session(&id1)
        .await
        .unwrap()
        .cleanup()
        .await
        .unwrap();

    let pruned = manager.prune_terminated_sessions().await;
    assert_eq!(pruned, vec![id1.clone()]);
    assert!(!manager.has_session(&id1).await);
    assert!(manager.has_session(&id2).await);

    assert!(manager.prune_terminated_sessions().await.is_empty());
}

#[tokio::test]
async fn test_cleanup_all() {
    let server1 = FakeInspector::start().await;
    let server2 = FakeInspector::start().await;
    let manager = SessionManager::new();

    let id1 = create_attached(&manager, &server1).await;
    let id2 = create_attached(&manager, &server2).await;

    let s1 = manager.get_session(&id1).await.unwrap();
    let s2 = manager.get_session(&id2).await.unwrap();

    manager.cleanup_all().await;

    assert_eq!(manager.session_count().await, 0);
    assert_eq!(s1.get_state(), SessionState::Terminated);
    assert_eq!(s2.get_state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_sessions_share_nothing_after_concurrent_mutation() {
    let server1 = FakeInspector::start().await;
    let server2 = FakeInspector::start().await;
    let manager = SessionManager::new();

    let id1 = create_attached(&manager, &server1).await;
    let id2 = create_attached(&manager, &server2).await;
    let s1 = manager.get_session(&id1).await.unwrap();
    let s2 = manager.get_session(&id2).await.unwrap();

    let writer1 = {
        let s1 = s1.clone();
        tokio::spawn(async move {
            for line in 1..=20u32 {
                s1.set_breakpoint("/one.js", line, None).await.unwrap();
            }
        })
    };
    let writer2 = {
        let s2 = s2.clone();
        tokio::spawn(async move {
            for line in 1..=20u32 {
                s2.set_breakpoint("/two.js", line, None).await.unwrap();
            }
        })
    };
    writer1.await.unwrap();
    writer2.await.unwrap();

    assert_eq!(s1.get_breakpoint_count(), 20);
    assert_eq!(s2.get_breakpoint_count(), 20);
    assert!(s1.get_breakpoints_by_file("/two.js").is_empty());
    assert!(s2.get_breakpoints_by_file("/one.js").is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
}
