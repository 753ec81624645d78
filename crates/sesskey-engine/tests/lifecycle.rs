//! Session lifecycle against an in-memory chain.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{account, addr, harness, signer, NOW};
use sesskey_core::error::Rejection;
use sesskey_core::{Address, Limit, SessionSpec, SessionState, TransferPolicy};
use sesskey_engine::SessionSecret;

fn spec_for(signer: Address, lifetime: u64) -> SessionSpec {
    SessionSpec::builder(signer, NOW + lifetime)
        .transfer_policy(TransferPolicy::new(addr(0xBEEF), 100u32, Limit::lifetime(150u32)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn create_then_list_is_idempotent() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), Some(SessionSecret::new(vec![9; 32])))
        .await
        .unwrap();
    assert_eq!(rec.created_at, NOW);
    assert!(!rec.revoked);
    assert_eq!(h.manager.state_of(rec.session_id), Some(SessionState::Active));

    let first = h.manager.list_sessions(account()).await.unwrap();
    let second = h.manager.list_sessions(account()).await.unwrap();
    assert_eq!(*first, *second);
    assert_eq!(first.as_slice(), &[rec.clone()]);

    assert_eq!(h.manager.secret(rec.session_id).await.unwrap().unwrap().expose(), &[9; 32]);
    assert!(h.manager.ledger().is_open(rec.session_id));
}

#[tokio::test]
async fn failed_submission_leaves_nothing() {
    let h = harness();
    h.chain.fail_next.store(true, Ordering::SeqCst);
    let spec = spec_for(signer(), 3_600);
    let id = spec.session_id().unwrap();

    let err = h
        .manager
        .create_session(account(), spec, Some(SessionSecret::new(vec![1])))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "SUBMISSION_FAILED");
    assert!(err.rejection().is_none());

    assert!(h.manager.list_sessions(account()).await.unwrap().is_empty());
    assert_eq!(h.manager.state_of(id), None);
    assert!(h.keys.is_empty());
    assert_eq!(
        h.manager
            .metrics()
            .submissions
            .get(&[("op", "create"), ("result", "failed")]),
        1
    );
}

#[tokio::test]
async fn pending_while_in_flight_then_refetch_after_timeout() {
    let h = harness();
    h.chain.slow_confirm.store(true, Ordering::SeqCst);
    let spec = spec_for(signer(), 3_600);
    let id = spec.session_id().unwrap();

    let manager = Arc::clone(&h.manager);
    let task = tokio::spawn(async move { manager.create_session(account(), spec, None).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.manager.state_of(id), Some(SessionState::Pending));

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert_ne!(h.manager.state_of(id), Some(SessionState::Pending));

    // The registration landed anyway; the next access re-fetches.
    h.chain.slow_confirm.store(false, Ordering::SeqCst);
    let latest = h.manager.latest_active(account(), None).await.unwrap().unwrap();
    assert_eq!(latest.session_id, id);
}

#[tokio::test]
async fn create_rejects_bad_lifetimes_and_duplicates() {
    let h = harness();

    let expired = SessionSpec::builder(signer(), NOW).build().unwrap();
    let err = h.manager.create_session(account(), expired, None).await.unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_POLICY");

    let too_long = spec_for(signer(), 7_776_001);
    let err = h.manager.create_session(account(), too_long, None).await.unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_POLICY");
    assert_eq!(h.chain.event_count(), 0);

    h.manager.list_sessions(account()).await.unwrap();
    h.manager
        .create_session(account(), spec_for(signer(), 7_776_000), None)
        .await
        .unwrap();
    let err = h
        .manager
        .create_session(account(), spec_for(signer(), 7_776_000), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(Rejection::InvalidSessionState { state: SessionState::Active, .. })
    ));
}

#[tokio::test]
async fn select_then_deselect() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), None)
        .await
        .unwrap();

    h.manager.select_session(rec.session_id).await.unwrap();
    assert_eq!(h.manager.selected().await.unwrap().map(|r| r.session_id), Some(rec.session_id));

    h.manager.deselect_session().unwrap();
    assert!(h.manager.selected().await.unwrap().is_none());
}

#[tokio::test]
async fn selecting_expired_or_revoked_fails() {
    let h = harness();
    let short = h
        .manager
        .create_session(account(), spec_for(signer(), 60), None)
        .await
        .unwrap();
    let long = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), None)
        .await
        .unwrap();

    h.manager.revoke(long.session_id).await.unwrap();
    let err = h.manager.select_session(long.session_id).await.unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(Rejection::InvalidSessionState { state: SessionState::Revoked, .. })
    ));

    h.clock.set(NOW + 60);
    let err = h.manager.select_session(short.session_id).await.unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(Rejection::InvalidSessionState { state: SessionState::Expired, .. })
    ));
    assert!(h.manager.selected().await.unwrap().is_none());
}

#[tokio::test]
async fn revoke_is_terminal() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), Some(SessionSecret::new(vec![7])))
        .await
        .unwrap();
    h.manager.select_session(rec.session_id).await.unwrap();

    h.manager.revoke(rec.session_id).await.unwrap();
    assert!(h.manager.selected().await.unwrap().is_none());
    assert_eq!(h.manager.state_of(rec.session_id), Some(SessionState::Revoked));
    assert!(h.manager.secret(rec.session_id).await.unwrap().is_none());
    assert!(!h.manager.ledger().is_open(rec.session_id));

    let listed = h.manager.list_sessions(account()).await.unwrap();
    assert!(listed[0].revoked);

    let err = h.manager.revoke(rec.session_id).await.unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_SESSION_STATE");
}

#[tokio::test]
async fn failed_revocation_changes_nothing() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), None)
        .await
        .unwrap();
    h.manager.select_session(rec.session_id).await.unwrap();

    h.chain.fail_next.store(true, Ordering::SeqCst);
    assert!(h.manager.revoke(rec.session_id).await.is_err());
    assert_eq!(h.manager.state_of(rec.session_id), Some(SessionState::Active));
    assert!(h.manager.selected().await.unwrap().is_some());
}

#[tokio::test]
async fn refresh_drops_externally_revoked_selection() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), None)
        .await
        .unwrap();
    h.manager.select_session(rec.session_id).await.unwrap();

    h.chain.revoke_externally(account(), rec.session_id);
    // Not observed yet.
    assert!(h.manager.selected().await.unwrap().is_some());

    let listed = h.manager.list_sessions(account()).await.unwrap();
    assert!(listed[0].revoked);
    assert!(h.manager.selected().await.unwrap().is_none());
    assert_eq!(
        h.manager.metrics().selection_cleared.get(&[("reason", "revoked")]),
        1
    );
}

#[tokio::test]
async fn refresh_drops_expired_selection() {
    let h = harness();
    let rec = h
        .manager
        .create_session(account(), spec_for(signer(), 60), None)
        .await
        .unwrap();
    h.manager.select_session(rec.session_id).await.unwrap();

    h.clock.advance(61);
    h.manager.list_sessions(account()).await.unwrap();
    assert!(h.manager.selected().await.unwrap().is_none());
    assert!(!h.manager.ledger().is_open(rec.session_id));
}

#[tokio::test]
async fn latest_active_prefers_newest() {
    let h = harness();
    let other = addr(0x0B0B);
    let a1 = h
        .manager
        .create_session(account(), spec_for(signer(), 3_600), None)
        .await
        .unwrap();
    let b = h
        .manager
        .create_session(account(), spec_for(other, 3_600), None)
        .await
        .unwrap();
    let a2 = h
        .manager
        .create_session(account(), spec_for(signer(), 7_200), None)
        .await
        .unwrap();

    let latest = |s| {
        let m = Arc::clone(&h.manager);
        async move { m.latest_active(account(), s).await.unwrap().map(|r| r.session_id) }
    };
    assert_eq!(latest(None).await, Some(a2.session_id));
    assert_eq!(latest(Some(other)).await, Some(b.session_id));

    h.manager.revoke(a2.session_id).await.unwrap();
    assert_eq!(latest(Some(signer())).await, Some(a1.session_id));

    h.clock.advance(3_600);
    assert_eq!(latest(None).await, None);
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let h = harness();
    let err = h
        .manager
        .select_session(sesskey_core::SessionId([3; 32]))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "UNKNOWN_SESSION");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn select_racing_external_revocation_never_keeps_revoked() {
    for _ in 0..50 {
        let h = harness();
        let rec = h
            .manager
            .create_session(account(), spec_for(signer(), 3_600), None)
            .await
            .unwrap();
        h.manager.list_sessions(account()).await.unwrap();
        let id = rec.session_id;

        let selecting = {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.select_session(id).await })
        };
        let refreshing = {
            let manager = Arc::clone(&h.manager);
            let chain = Arc::clone(&h.chain);
            tokio::spawn(async move {
                chain.revoke_externally(account(), id);
                manager.list_sessions(account()).await.map(|_| ())
            })
        };

        match selecting.await.unwrap() {
            Ok(()) => {}
            Err(e) => assert!(matches!(
                e.rejection(),
                Some(Rejection::InvalidSessionState {
                    state: SessionState::Revoked,
                    ..
                })
            )),
        }
        refreshing.await.unwrap().unwrap();

        assert!(h.manager.selected().await.unwrap().is_none());
        assert_eq!(h.manager.state_of(id), Some(SessionState::Revoked));
    }
}
