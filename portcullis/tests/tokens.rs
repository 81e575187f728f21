mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{PASSWORD, harness, origin};
use portcullis::{ErrorKind, Identity, SubjectId, TokenKind};

#[tokio::test]
async fn test_access_token_claims() {
    let h = harness().await;
    let subject = h.register("a@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();

    let claims = h
        .portcullis
        .verify_access(&session.tokens.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, subject.id.as_str());
    assert_eq!(claims.sid, session.tokens.session_id);
    assert_eq!(claims.typ, TokenKind::Access);
    assert_eq!(claims.ver, 0);

    // A refresh token is not an access token.
    let err = h
        .portcullis
        .verify_access(&session.tokens.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenMalformed);
}

#[tokio::test]
async fn test_access_token_expires() {
    let h = harness().await;
    h.register("a@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();

    h.clock.advance(Duration::minutes(16));

    let err = h
        .portcullis
        .verify_access(&session.tokens.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExpired);
}

#[tokio::test]
async fn test_refresh_rotates_and_detects_replay() {
    let h = harness().await;
    let subject = h.register("a@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();

    let rotated = h
        .portcullis
        .refresh(&session.tokens.refresh_token, &subject.id, &origin())
        .await
        .unwrap();
    assert_ne!(rotated.session_id, session.tokens.session_id);
    h.portcullis
        .verify_access(&rotated.access_token)
        .await
        .unwrap();

    let err = h
        .portcullis
        .refresh(&session.tokens.refresh_token, &subject.id, &origin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenReplayed);

    let sessions = h.portcullis.active_sessions(&subject.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, rotated.session_id);

    h.portcullis
        .refresh(&rotated.refresh_token, &subject.id, &origin())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresh_for_another_subject_is_rejected() {
    let h = harness().await;
    h.register("a@x.com", None).await;
    let other = h.register("b@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();

    let err = h
        .portcullis
        .refresh(&session.tokens.refresh_token, &other.id, &origin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenMalformed);

    let err = h
        .portcullis
        .refresh(&session.tokens.refresh_token, &SubjectId::new("sub_missing"), &origin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenMalformed);
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let h = harness().await;
    let subject = h.register("a@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let portcullis = h.portcullis.clone();
        let token = session.tokens.refresh_token.clone();
        let subject_id = subject.id.clone();
        handles.push(tokio::spawn(async move {
            portcullis.refresh(&token, &subject_id, &origin()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::TokenReplayed),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.portcullis.active_sessions(&subject.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_logout_everywhere() {
    let h = harness().await;
    let subject = h.register("a@x.com", None).await;
    let first = h.login("a@x.com", PASSWORD).await.unwrap();
    let second = h.login("a@x.com", PASSWORD).await.unwrap();
    assert_eq!(h.portcullis.active_sessions(&subject.id).await.unwrap().len(), 2);

    let revoked = h.portcullis.logout_everywhere(&subject.id).await.unwrap();
    assert_eq!(revoked, 2);

    for session in [&first, &second] {
        let err = h
            .portcullis
            .verify_access(&session.tokens.access_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenVersionMismatch);

        let err = h
            .portcullis
            .refresh(&session.tokens.refresh_token, &subject.id, &origin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenRevoked);
    }

    // Tokens minted after the bump carry the new version.
    let fresh = h.login("a@x.com", PASSWORD).await.unwrap();
    let claims = h
        .portcullis
        .verify_access(&fresh.tokens.access_token)
        .await
        .unwrap();
    assert_eq!(claims.ver, 1);
}

#[tokio::test]
async fn test_logout_single_session_keeps_others() {
    let h = harness().await;
    let subject = h.register("a@x.com", None).await;
    let first = h.login("a@x.com", PASSWORD).await.unwrap();
    let second = h.login("a@x.com", PASSWORD).await.unwrap();

    h.portcullis
        .logout(&first.tokens.access_token, Some(&first.tokens.refresh_token))
        .await
        .unwrap();

    let sessions = h.portcullis.active_sessions(&subject.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, second.tokens.session_id);
    h.portcullis
        .verify_access(&second.tokens.access_token)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sweep_removes_expired_state() {
    let h = harness().await;
    h.register("a@x.com", None).await;
    let session = h.login("a@x.com", PASSWORD).await.unwrap();
    h.portcullis
        .logout(&session.tokens.access_token, None)
        .await
        .unwrap();
    for _ in 0..3 {
        h.login("a@x.com", "wrong-password").await.unwrap_err();
    }
    h.portcullis
        .request_recovery_code("a@x.com", &origin())
        .await
        .unwrap();

    h.clock.advance(Duration::days(31));
    let report = h.portcullis.sweep().await.unwrap();

    assert_eq!(report.lockouts, 1);
    assert_eq!(report.attempts, 4);
    assert_eq!(report.recovery_codes, 1);
    // The revoked access token and the expired refresh registration.
    assert_eq!(report.tokens, 2);
    assert!(report.rate_limit_keys > 0);

    assert!(h.portcullis.sweep().await.unwrap().is_empty());
    assert!(
        h.portcullis
            .recent_attempts(&Identity::email("a@x.com"), 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_sweeper_runs_until_shutdown() {
    let h = harness().await;
    h.register("a@x.com", None).await;
    h.login("a@x.com", "wrong-password").await.unwrap_err();
    h.clock.advance(Duration::days(31));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = h.portcullis.start_sweeper(shutdown_rx);

    // The first tick fires immediately.
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert!(
        h.portcullis
            .recent_attempts(&Identity::email("a@x.com"), 10)
            .await
            .unwrap()
            .is_empty()
    );

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
