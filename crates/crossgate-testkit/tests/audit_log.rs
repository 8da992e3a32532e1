//! Audit log behavior over real and in-memory stores.

use std::sync::Arc;

use crossgate::{AuditLog, ErrorKind, GatewayError, SignatureService};
use crossgate_core::canonical::canonical_content_bytes;
use crossgate_core::{Keypair, LogEntryDraft, SessionId, Sha256Hash};
use crossgate_store::{ContentStore, FsContentStore, MemoryContentStore, MemoryLogStore, SqliteLogStore};

fn signer() -> Arc<SignatureService> {
    Arc::new(SignatureService::new(Keypair::from_seed(&[7; 32])))
}

fn draft(session: &str, phase: &str, op: &str) -> LogEntryDraft {
    LogEntryDraft::new(SessionId::new(session), phase, op, "{\"step\":1}")
}

#[tokio::test]
async fn test_stored_entry_matches_both_stores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = AuditLog::open(
        SqliteLogStore::open(dir.path().join("log.db"))?,
        FsContentStore::open(dir.path().join("content"))?,
        signer(),
    )
    .await?;

    let entry = log.store(draft("s", "init", "start")).await?;
    let row = log.get_by_key(&entry.key).await?.expect("row");

    let bytes = canonical_content_bytes(&entry.content());
    assert_eq!(row.hash, Sha256Hash::hash(&bytes));
    assert_eq!(log.content_store().get(&row.hash).await?, Some(bytes));
    assert_eq!(log.get_from_content_store(&entry.key).await?, Some(row.content()));
    log.verify_integrity(&entry.key).await?;
    Ok(())
}

#[tokio::test]
async fn test_get_latest_of_three() -> anyhow::Result<()> {
    let log = AuditLog::open(MemoryLogStore::new(), MemoryContentStore::new(), signer()).await?;
    let t1 = log.store(draft("s", "init", "a")).await?;
    let t2 = log.store(draft("s", "exec", "b")).await?;
    let t3 = log.store(draft("s", "done", "c")).await?;
    log.store(draft("other", "init", "a")).await?;

    assert!(t1.timestamp < t2.timestamp && t2.timestamp < t3.timestamp);
    assert_eq!(log.get_latest(&SessionId::new("s")).await?, Some(t3));
    assert_eq!(log.get_latest(&SessionId::new("none")).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_get_since_is_strict_and_ascending() -> anyhow::Result<()> {
    let log = AuditLog::open(MemoryLogStore::new(), MemoryContentStore::new(), signer()).await?;
    let first = log.store(draft("a", "init", "x")).await?;
    let second = log.store(draft("b", "init", "x")).await?;
    let third = log.store(draft("a", "exec", "y")).await?;

    let since = log.get_since(first.timestamp).await?;
    assert_eq!(since, vec![second, third.clone()]);

    assert!(log.get_since(third.timestamp).await?.is_empty());
    assert!(log.get_since(i64::MAX).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_store_is_idempotent_on_key() -> anyhow::Result<()> {
    let log = AuditLog::open(MemoryLogStore::new(), MemoryContentStore::new(), signer()).await?;
    let first = log.store(draft("s", "init", "start")).await?;
    assert_eq!(log.store(draft("s", "init", "start")).await?, first);

    let err = log
        .store(LogEntryDraft::new(SessionId::new("s"), "init", "start", "{\"step\":2}"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict { .. }));
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(log.get_by_key(&first.key).await?, Some(first));
    assert_eq!(log.get_session_entries(&SessionId::new("s")).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_content_store_failure_is_not_success() -> anyhow::Result<()> {
    let content = Arc::new(MemoryContentStore::new());
    let log = AuditLog::open(MemoryLogStore::new(), content.clone(), signer()).await?;

    content.set_offline(true);
    let err = log.store(draft("s", "init", "start")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(log.get_by_key(&draft("s", "init", "start").key()).await?.is_none());

    content.set_offline(false);
    log.store(draft("s", "init", "start")).await?;
    Ok(())
}

#[tokio::test]
async fn test_tampered_blob_detected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = AuditLog::open(
        SqliteLogStore::open_memory()?,
        FsContentStore::open(dir.path())?,
        signer(),
    )
    .await?;
    let entry = log.store(draft("s", "init", "start")).await?;

    std::fs::write(log.content_store().blob_path(&entry.hash), b"rewritten")?;

    let err = log.verify_integrity(&entry.key).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    Ok(())
}

#[tokio::test]
async fn test_ingest_keeps_foreign_signature() -> anyhow::Result<()> {
    let remote = AuditLog::open(
        MemoryLogStore::new(),
        MemoryContentStore::new(),
        Arc::new(SignatureService::new(Keypair::from_seed(&[8; 32]))),
    )
    .await?;
    let local = AuditLog::open(MemoryLogStore::new(), MemoryContentStore::new(), signer()).await?;

    let foreign = remote.store(draft("s", "exec", "lock")).await?;
    local.ingest(&foreign).await?;

    assert_eq!(local.get_by_key(&foreign.key).await?, Some(foreign.clone()));
    local.verify_integrity(&foreign.key).await?;

    // Entries logged afterwards are newer than the ingested one.
    let next = local.store(draft("s", "done", "commit")).await?;
    assert!(next.timestamp > foreign.timestamp);

    let mut forged = foreign.clone();
    forged.operation = "unlock".into();
    assert!(matches!(local.ingest(&forged).await, Err(GatewayError::Core(_))));
    Ok(())
}

#[tokio::test]
async fn test_clock_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("log.db");

    let before = {
        let log = AuditLog::open(SqliteLogStore::open(&db)?, MemoryContentStore::new(), signer()).await?;
        let mut last = log.store(draft("s", "init", "0")).await?;
        for i in 1..5 {
            last = log.store(draft("s", "exec", &i.to_string())).await?;
        }
        last
    };

    let log = AuditLog::open(SqliteLogStore::open(&db)?, MemoryContentStore::new(), signer()).await?;
    let after = log.store(draft("s", "done", "commit")).await?;
    assert!(after.timestamp > before.timestamp);
    Ok(())
}
