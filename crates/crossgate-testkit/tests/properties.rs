//! Property tests over generated session logs.

use std::sync::Arc;

use proptest::prelude::*;

use crossgate::{AuditLog, SessionStore, SignatureService};
use crossgate_core::{fold_entries, Keypair, LogEntry, PhaseOrder};
use crossgate_store::{MemoryContentStore, MemoryLogStore};
use crossgate_testkit::generators::session_log;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn log_with(entries: &[LogEntry]) -> AuditLog<MemoryLogStore, MemoryContentStore> {
    let signer = Arc::new(SignatureService::new(Keypair::from_seed(&[5; 32])));
    let log = AuditLog::open(MemoryLogStore::new(), MemoryContentStore::new(), signer)
        .await
        .unwrap();
    for entry in entries {
        log.ingest(entry).await.unwrap();
    }
    log
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_get_since_returns_exactly_newer_entries(
        log in session_log(10),
        pivot in 0usize..10,
    ) {
        runtime().block_on(async {
            let audit_log = log_with(&log).await;
            let t = log[pivot % log.len()].timestamp;

            let since = audit_log.get_since(t).await.unwrap();
            let mut expected: Vec<LogEntry> = log.iter().filter(|e| e.timestamp > t).cloned().collect();
            expected.sort_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)));

            prop_assert_eq!(since, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn test_rebuild_is_deterministic(log in session_log(10)) {
        runtime().block_on(async {
            let audit_log = log_with(&log).await;
            let store = SessionStore::new(PhaseOrder::default());

            let first_report = store.rebuild_from_log(&audit_log).await.unwrap();
            let first = store.list();
            let second_report = store.rebuild_from_log(&audit_log).await.unwrap();

            prop_assert_eq!(&first_report, &second_report);
            prop_assert_eq!(first, store.list());
            prop_assert_eq!(first_report.restored.len() + first_report.skipped.len(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn test_rebuild_matches_fold(log in session_log(10)) {
        runtime().block_on(async {
            let audit_log = log_with(&log).await;
            let store = SessionStore::new(PhaseOrder::default());
            store.rebuild_from_log(&audit_log).await.unwrap();

            let folded = fold_entries(&log, &PhaseOrder::default()).unwrap().unwrap();
            match store.get(&log[0].session_id) {
                Some(session) => prop_assert_eq!(session.to_snapshot().step, folded.step.or(Some(0))),
                None => prop_assert!(
                    folded.source_gateway_public_key.is_none()
                        || folded.recipient_gateway_public_key.is_none()
                        || folded.source_base_path.is_none()
                        || folded.recipient_base_path.is_none()
                ),
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
