//! The Recover exchange between two live gateways.

use std::time::Duration;

use crossgate::transport::{ErrorCode, TransportError};
use crossgate::{ErrorKind, GatewayError};
use crossgate_core::{
    Keypair, LogEntry, LogEntryDraft, LogKey, Recover, RecoverUpdate, Signed, ROLLBACK_LOG_TYPE,
};
use crossgate_testkit::fixtures::{
    node_config, node_keypair, GatewayPair, TestNode, BACKUP_PATH, CLIENT_PATH, SERVER_PATH,
};

fn recover_body(session_id: &crossgate_core::SessionId, watermark: i64) -> Recover {
    Recover {
        session_id: session_id.clone(),
        phase: Some("init".into()),
        sequence_number: 1,
        last_log_entry_timestamp: watermark,
        is_backup: false,
        new_base_path: None,
        new_gateway_public_key: None,
    }
}

#[tokio::test]
async fn test_valid_recover_advances_watermark() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;
    let before = pair.server.session(&s.session_id).unwrap().last_log_entry_timestamp.unwrap();

    let message = Signed::sign(recover_body(&s.session_id, before + 60_000), &pair.client.keypair)?;
    pair.server.gateway.check_valid_recover_message(&message)?;
    let watermark = || pair.server.session(&s.session_id).unwrap().last_log_entry_timestamp;
    assert_eq!(watermark(), Some(before + 60_000));

    // An older watermark is accepted but never regresses the local one.
    let older = Signed::sign(recover_body(&s.session_id, before), &pair.client.keypair)?;
    pair.server.gateway.check_valid_recover_message(&older)?;
    assert_eq!(watermark(), Some(before + 60_000));
    Ok(())
}

#[tokio::test]
async fn test_recover_over_different_content_rejected() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;
    let before = pair.server.session(&s.session_id).unwrap().last_log_entry_timestamp;

    let mut forged = Signed::sign(recover_body(&s.session_id, 1), &pair.client.keypair)?;
    forged.body.last_log_entry_timestamp = i64::MAX;

    let err = pair.server.gateway.check_valid_recover_message(&forged).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidSignature { message: "recover", .. }));
    assert_eq!(err.kind(), ErrorKind::Signature);
    assert_eq!(pair.server.session(&s.session_id).unwrap().last_log_entry_timestamp, before);

    // Signed by the responder's own key instead of the counterpart's.
    let wrong_key = Signed::sign(recover_body(&s.session_id, 1), &pair.server.keypair)?;
    assert_eq!(
        pair.server.gateway.check_valid_recover_message(&wrong_key).unwrap_err().kind(),
        ErrorKind::Signature
    );
    Ok(())
}

#[tokio::test]
async fn test_update_carries_newer_entries_and_converges() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    s.step = 1;
    pair.client.log_step(&s, "init", "start").await?;
    let base = pair.server.log_step(&s, "init", "start").await?;

    s.step = 2;
    s.last_sequence_number = Some(2);
    pair.server.log_step(&s, "exec", "lock").await?;
    s.step = 3;
    pair.server.log_step(&s, "exec", "transfer").await?;
    s.step = 4;
    s.last_sequence_number = Some(4);
    pair.server.log_step(&s, "done", "commit").await?;

    let update = pair
        .server
        .gateway
        .send_recover_update_message(&recover_body(&s.session_id, base.timestamp))
        .await?;
    let keys: Vec<&str> = update.body.recovered_logs.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["s-exec-lock", "s-exec-transfer", "s-done-commit"]);

    let outcome = pair.client.gateway.check_valid_recover_update_message(&update).await?;
    assert_eq!(outcome.applied.len(), 3);
    assert_eq!(pair.client.gateway.sessions().len(), 1);

    let client = pair.client.session(&s.session_id).unwrap();
    let server = pair.server.session(&s.session_id).unwrap();
    assert_eq!(client.step, 4);
    assert_eq!(client.phase.as_deref(), Some("done"));
    assert_eq!(client.last_sequence_number, Some(4));
    assert_eq!(client.last_log_entry_timestamp, server.last_log_entry_timestamp);
    assert_eq!(client.state_digest(), server.state_digest());

    // Applying the same update again changes nothing.
    let again = pair.client.gateway.check_valid_recover_update_message(&update).await?;
    assert!(again.applied.is_empty());
    assert_eq!(again.duplicates, 3);
    assert_eq!(pair.client.gateway.sessions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_update_with_unknown_signer_applies_nothing() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;
    s.step = 2;
    let good = pair.server.log_step(&s, "exec", "lock").await?;

    let stranger = Keypair::from_seed(&[9; 32]);
    let rogue = LogEntry::seal(
        LogEntryDraft::new(s.session_id.clone(), "done", "commit", s.to_snapshot().to_data()?),
        good.timestamp + 1,
        &stranger,
    );
    let message = Signed::sign(
        RecoverUpdate {
            session_id: s.session_id.clone(),
            recovered_logs: vec![good.clone(), rogue],
        },
        &pair.server.keypair,
    )?;

    let err = pair
        .client
        .gateway
        .check_valid_recover_update_message(&message)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownSigner { .. }));
    assert!(pair.client.gateway.audit_log().get_by_key(&good.key).await?.is_none());
    assert_eq!(pair.client.session(&s.session_id).unwrap().step, 0);
    Ok(())
}

#[tokio::test]
async fn test_update_with_unreadable_snapshot_is_not_persisted() -> anyhow::Result<()> {
    let mut pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    s.step = 1;
    pair.log_on_both(&s, "init", "start").await?;
    s.step = 2;
    let good = pair.server.log_step(&s, "exec", "lock").await?;

    let garbled = LogEntry::seal(
        LogEntryDraft::new(s.session_id.clone(), "done", "commit", "garbage"),
        good.timestamp + 1,
        &pair.server.keypair,
    );
    let message = Signed::sign(
        RecoverUpdate {
            session_id: s.session_id.clone(),
            recovered_logs: vec![good.clone(), garbled.clone()],
        },
        &pair.server.keypair,
    )?;

    let err = pair
        .client
        .gateway
        .check_valid_recover_update_message(&message)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Core(crossgate_core::CoreError::MalformedSnapshot { .. })
    ));
    assert!(pair.client.gateway.audit_log().get_by_key(&good.key).await?.is_none());
    assert!(pair.client.gateway.audit_log().get_by_key(&garbled.key).await?.is_none());
    assert_eq!(pair.client.session(&s.session_id).unwrap().step, 1);

    // The session still rebuilds from the local log.
    pair.client.restart().await?;
    let report = pair.client.gateway.recover_open_sessions(false).await?;
    assert_eq!(report.rebuild.restored, vec![s.session_id.clone()]);
    assert!(report.rebuild.skipped.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_update_signed_by_wrong_party_rejected() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;
    s.step = 2;
    let good = pair.server.log_step(&s, "exec", "lock").await?;

    let message = Signed::sign(
        RecoverUpdate {
            session_id: s.session_id.clone(),
            recovered_logs: vec![good.clone()],
        },
        &pair.client.keypair,
    )?;
    let err = pair
        .client
        .gateway
        .check_valid_recover_update_message(&message)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Signature);
    assert!(pair.client.gateway.audit_log().get_by_key(&good.key).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_full_round_after_client_crash() -> anyhow::Result<()> {
    let mut pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    s.step = 1;
    pair.log_on_both(&s, "init", "start").await?;

    pair.client.crash().await;
    s.step = 2;
    let missed = pair.server.log_step(&s, "exec", "lock").await?;
    let server_entries = pair.server.gateway.audit_log().get_session_entries(&s.session_id).await?;

    pair.client.restart().await?;
    let report = pair.client.gateway.recover_open_sessions(true).await?;

    assert_eq!(report.rebuild.restored, vec![s.session_id.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(report.recovered.len(), 1);
    assert_eq!(report.recovered[0].applied, 1);
    assert!(!report.recovered[0].as_backup);
    assert_eq!(report.recovered[0].watermark, Some(missed.timestamp));

    let client = pair.client.session(&s.session_id).unwrap();
    assert_eq!(client.step, 2);
    assert_eq!(client.phase.as_deref(), Some("exec"));
    assert!(pair.client.gateway.audit_log().get_by_key(&missed.key).await?.is_some());

    // The responder logs nothing while answering.
    assert_eq!(
        pair.server.gateway.audit_log().get_session_entries(&s.session_id).await?,
        server_entries
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_rejected_by_responder() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("only-on-client");
    pair.client.log_step(&s, "init", "start").await?;

    let err = pair.client.gateway.send_recover_message(&s.session_id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Rejected {
            code: ErrorCode::SessionNotFound,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_incomplete_session_fails_before_sending() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    s.max_retries = None;
    pair.client.log_step(&s, "init", "start").await?;

    let err = pair.client.gateway.send_recover_message(&s.session_id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::IncompleteSession {
            field: "max_retries",
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(pair.network.call_count(SERVER_PATH).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_counterpart_exhausts_retries() -> anyhow::Result<()> {
    let mut pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;

    pair.server.crash().await;
    let err = pair.client.gateway.send_recover_message(&s.session_id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Transport(TransportError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(pair.network.call_count(SERVER_PATH).await, 3);

    // Nothing was corrupted: a later round succeeds.
    pair.server.restart().await?;
    pair.server.gateway.bootstrap().await?;
    pair.client.gateway.send_recover_message(&s.session_id).await?;
    Ok(())
}

#[tokio::test]
async fn test_slow_counterpart_times_out() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let mut s = pair.session("s");
    s.max_timeout_ms = Some(50);
    s.max_retries = Some(2);
    pair.log_on_both(&s, "init", "start").await?;

    pair.network.set_delay(SERVER_PATH, Duration::from_millis(500)).await;
    let err = pair.client.gateway.send_recover_message(&s.session_id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Transport(TransportError::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    Ok(())
}

#[tokio::test]
async fn test_rollback_recorded_on_both_sides() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "exec", "lock").await?;

    pair.client
        .gateway
        .send_rollback_message(&s.session_id, vec!["unlock-asset".into()], vec!["0xrefund".into()])
        .await?;

    for node in [&pair.client, &pair.server] {
        let session = node.session(&s.session_id).unwrap();
        assert!(session.rollback);
        assert_eq!(session.rollback_actions_performed, vec!["unlock-asset".to_string()]);
        assert_eq!(session.rollback_proofs, vec!["0xrefund".to_string()]);
        assert_eq!(session.phase.as_deref(), Some("exec"));
    }

    let received = LogKey::derive(&s.session_id, ROLLBACK_LOG_TYPE, "rollback-received-1");
    assert!(pair.server.gateway.audit_log().get_by_key(&received).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_second_rollback_keeps_both_records() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "exec", "lock").await?;

    pair.client
        .gateway
        .send_rollback_message(&s.session_id, vec!["unlock-asset".into()], vec!["0xrefund".into()])
        .await?;
    pair.client
        .gateway
        .send_rollback_message(&s.session_id, vec!["burn-wrapped".into()], vec!["0xburn".into()])
        .await?;

    for node in [&pair.client, &pair.server] {
        let session = node.session(&s.session_id).unwrap();
        assert_eq!(
            session.rollback_actions_performed,
            vec!["unlock-asset".to_string(), "burn-wrapped".to_string()]
        );
        assert_eq!(session.rollback_proofs, vec!["0xrefund".to_string(), "0xburn".to_string()]);
    }

    for (node, prefix) in [(&pair.client, "rollback"), (&pair.server, "rollback-received")] {
        for n in 1..=2 {
            let key = LogKey::derive(&s.session_id, ROLLBACK_LOG_TYPE, &format!("{prefix}-{n}"));
            assert!(node.gateway.audit_log().get_by_key(&key).await?.is_some(), "{key}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_allowed_backup_takes_over_source_role() -> anyhow::Result<()> {
    let backup_keypair = node_keypair(3);
    let mut config = node_config("server", SERVER_PATH);
    config.allowed_backup_gateways = vec![backup_keypair.public_key().to_hex()];
    let pair = GatewayPair::with_server_config(config).await?;

    let mut s = pair.session("s");
    s.step = 1;
    pair.log_on_both(&s, "init", "start").await?;
    s.step = 2;
    pair.server.log_step(&s, "exec", "lock").await?;
    pair.client.crash().await;

    // The backup starts from the client's log.
    let backup = TestNode::start(&pair.network, backup_keypair, node_config("backup", BACKUP_PATH)).await?;
    for entry in pair.client.gateway.audit_log().get_session_entries(&s.session_id).await? {
        backup.gateway.audit_log().ingest(&entry).await?;
    }
    backup.gateway.bootstrap().await?;
    assert_eq!(backup.gateway.role_in(&backup.session(&s.session_id).unwrap()), None);

    let report = backup.gateway.send_recover_message(&s.session_id).await?;
    assert!(report.as_backup);
    assert_eq!(report.applied, 1);

    let at_server = pair.server.session(&s.session_id).unwrap();
    assert_eq!(at_server.source_gateway_public_key, backup.public_key());
    assert_eq!(at_server.source_base_path.as_deref(), Some(BACKUP_PATH));

    let at_backup = backup.session(&s.session_id).unwrap();
    assert_eq!(at_backup.source_gateway_public_key, backup.public_key());
    assert_eq!(at_backup.step, 2);
    assert!(backup.gateway.is_client_gateway(&s.session_id)?);
    Ok(())
}

#[tokio::test]
async fn test_unlisted_backup_rejected() -> anyhow::Result<()> {
    let pair = GatewayPair::new().await?;
    let s = pair.session("s");
    pair.log_on_both(&s, "init", "start").await?;

    let backup = TestNode::start(&pair.network, node_keypair(3), node_config("backup", BACKUP_PATH)).await?;
    for entry in pair.client.gateway.audit_log().get_session_entries(&s.session_id).await? {
        backup.gateway.audit_log().ingest(&entry).await?;
    }
    backup.gateway.bootstrap().await?;

    let err = backup.gateway.send_recover_message(&s.session_id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Rejected {
            code: ErrorCode::NotAuthorized,
            ..
        }
    ));
    assert_eq!(
        pair.server.session(&s.session_id).unwrap().source_gateway_public_key,
        pair.client.public_key()
    );

    // The backup gives the source role back after the failed round.
    let at_backup = backup.session(&s.session_id).unwrap();
    assert_eq!(at_backup.source_gateway_public_key, pair.client.public_key());
    assert_eq!(at_backup.source_base_path.as_deref(), Some(CLIENT_PATH));
    Ok(())
}
