//! The session fold.
//!
//! One deterministic function turns a session's log entries into its state.
//! It is used by the crash-recovery rebuild, by recovery merges and by normal
//! step logging, so all three agree on how an entry is applied.
//!
//! Merge rule per field:
//!
//! | field | rule |
//! |---|---|
//! | keys, base paths, retry policy | last writer wins (if the entry carries it) |
//! | `step`, `last_sequence_number`, receive time | maximum |
//! | `last_log_entry_timestamp` | maximum of itself and every entry timestamp |
//! | `phase` | highest rank in the [`PhaseOrder`]; unknown tags never move it |
//! | `rollback` | sticky once true |
//! | rollback lists | union in order of first appearance |
//!
//! Proof entries are not folded.

use crate::error::CoreError;
use crate::log_entry::LogEntry;
use crate::phase::PhaseOrder;
use crate::session::SessionSnapshot;

/// Fold one entry into an existing snapshot.
pub fn fold(
    existing: Option<SessionSnapshot>,
    entry: &LogEntry,
    phases: &PhaseOrder,
) -> Result<SessionSnapshot, CoreError> {
    let mut merged = existing.unwrap_or_default();
    if entry.is_proof() {
        return Ok(merged);
    }

    let incoming = SessionSnapshot::from_data(&entry.session_id, &entry.data)?;

    // Last writer wins.
    overwrite(&mut merged.source_gateway_public_key, incoming.source_gateway_public_key);
    overwrite(&mut merged.recipient_gateway_public_key, incoming.recipient_gateway_public_key);
    overwrite(&mut merged.source_base_path, incoming.source_base_path);
    overwrite(&mut merged.recipient_base_path, incoming.recipient_base_path);
    overwrite(&mut merged.max_retries, incoming.max_retries);
    overwrite(&mut merged.max_timeout_ms, incoming.max_timeout_ms);

    // Monotonic.
    merged.step = max_opt(merged.step, incoming.step);
    merged.last_sequence_number = max_opt(merged.last_sequence_number, incoming.last_sequence_number);
    merged.last_message_received_timestamp = max_opt(
        merged.last_message_received_timestamp,
        incoming.last_message_received_timestamp,
    );
    merged.last_log_entry_timestamp = max_opt(
        max_opt(merged.last_log_entry_timestamp, incoming.last_log_entry_timestamp),
        Some(entry.timestamp),
    );

    for candidate in [incoming.phase.as_deref(), Some(entry.log_type.as_str())]
        .into_iter()
        .flatten()
    {
        if phases.advances(merged.phase.as_deref(), candidate) {
            merged.phase = Some(candidate.to_string());
        }
    }

    let rolled_back = merged.rollback.unwrap_or(false)
        || incoming.rollback.unwrap_or(false)
        || entry.is_rollback();
    if rolled_back || merged.rollback.is_some() || incoming.rollback.is_some() {
        merged.rollback = Some(rolled_back);
    }
    union_into(&mut merged.rollback_proofs, incoming.rollback_proofs);
    union_into(&mut merged.rollback_actions_performed, incoming.rollback_actions_performed);

    Ok(merged)
}

/// Fold a whole session's entries.
///
/// Entries are applied in ascending `(timestamp, key)` order whatever order
/// they are given in. All entries must belong to the same session.
pub fn fold_entries(entries: &[LogEntry], phases: &PhaseOrder) -> Result<Option<SessionSnapshot>, CoreError> {
    let Some(first) = entries.first() else {
        return Ok(None);
    };

    let mut ordered: Vec<&LogEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)));

    let mut state = None;
    for entry in ordered {
        if entry.session_id != first.session_id {
            return Err(CoreError::SessionMismatch {
                expected: first.session_id.clone(),
                found: entry.session_id.clone(),
            });
        }
        state = Some(fold(state, entry, phases)?);
    }
    Ok(state)
}

fn overwrite<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn union_into(target: &mut Vec<String>, incoming: Vec<String>) {
    for item in incoming {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::log_entry::LogEntryDraft;
    use crate::types::SessionId;

    fn entry(log_type: &str, op: &str, ts: i64, snap: &SessionSnapshot) -> LogEntry {
        let draft = LogEntryDraft::new(SessionId::new("s"), log_type, op, snap.to_data().unwrap());
        LogEntry::seal(draft, ts, &Keypair::from_seed(&[9; 32]))
    }

    #[test]
    fn test_monotonic_fields_keep_maximum() {
        let phases = PhaseOrder::default();
        let high = SessionSnapshot {
            step: Some(4),
            last_sequence_number: Some(8),
            ..Default::default()
        };
        let low = SessionSnapshot {
            step: Some(2),
            last_sequence_number: Some(3),
            ..Default::default()
        };

        let s = fold(None, &entry("exec", "a", 10, &high), &phases).unwrap();
        let s = fold(Some(s), &entry("init", "b", 20, &low), &phases).unwrap();

        assert_eq!(s.step, Some(4));
        assert_eq!(s.last_sequence_number, Some(8));
        assert_eq!(s.phase.as_deref(), Some("exec"));
        assert_eq!(s.last_log_entry_timestamp, Some(20));
    }

    #[test]
    fn test_last_writer_wins() {
        let phases = PhaseOrder::default();
        let a = SessionSnapshot {
            source_base_path: Some("http://a".into()),
            max_retries: Some(3),
            ..Default::default()
        };
        let b = SessionSnapshot {
            source_base_path: Some("http://b".into()),
            ..Default::default()
        };
        let s = fold_entries(&[entry("init", "x", 1, &a), entry("exec", "y", 2, &b)], &phases)
            .unwrap()
            .unwrap();
        assert_eq!(s.source_base_path.as_deref(), Some("http://b"));
        assert_eq!(s.max_retries, Some(3));
    }

    #[test]
    fn test_order_independent_input() {
        let phases = PhaseOrder::default();
        let e1 = entry("init", "a", 1, &SessionSnapshot { step: Some(1), ..Default::default() });
        let e2 = entry("exec", "b", 2, &SessionSnapshot { step: Some(3), ..Default::default() });
        let e3 = entry("done", "c", 3, &SessionSnapshot { step: Some(5), ..Default::default() });

        let forward = fold_entries(&[e1.clone(), e2.clone(), e3.clone()], &phases).unwrap();
        let backward = fold_entries(&[e3, e1, e2], &phases).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_proof_not_folded() {
        let phases = PhaseOrder::default();
        let proof = LogEntry::seal(
            LogEntryDraft::proof(SessionId::new("s"), "lock", "not json at all"),
            5,
            &Keypair::generate(),
        );
        let s = fold(None, &proof, &phases).unwrap();
        assert_eq!(s, SessionSnapshot::default());
    }

    #[test]
    fn test_unknown_phase_does_not_move() {
        let phases = PhaseOrder::default();
        let s = fold(None, &entry("exec", "a", 1, &SessionSnapshot::default()), &phases).unwrap();
        let s = fold(Some(s), &entry("custom", "b", 2, &SessionSnapshot::default()), &phases).unwrap();
        assert_eq!(s.phase.as_deref(), Some("exec"));
        assert_eq!(s.last_log_entry_timestamp, Some(2));
    }

    #[test]
    fn test_rollback_sticky_and_union() {
        let phases = PhaseOrder::default();
        let first = SessionSnapshot {
            rollback_actions_performed: vec!["unlock".into()],
            ..Default::default()
        };
        let second = SessionSnapshot {
            rollback: Some(false),
            rollback_actions_performed: vec!["unlock".into(), "burn".into()],
            ..Default::default()
        };
        let s = fold(None, &entry("rollback", "a", 1, &first), &phases).unwrap();
        let s = fold(Some(s), &entry("exec", "b", 2, &second), &phases).unwrap();
        assert_eq!(s.rollback, Some(true));
        assert_eq!(s.rollback_actions_performed, vec!["unlock".to_string(), "burn".to_string()]);
    }

    #[test]
    fn test_malformed_data_is_error() {
        let phases = PhaseOrder::default();
        let bad = LogEntry::seal(
            LogEntryDraft::new(SessionId::new("s"), "init", "x", "{oops"),
            1,
            &Keypair::generate(),
        );
        assert!(matches!(
            fold(None, &bad, &phases),
            Err(CoreError::MalformedSnapshot { .. })
        ));
    }

    #[test]
    fn test_mixed_sessions_rejected() {
        let phases = PhaseOrder::default();
        let other = LogEntry::seal(
            LogEntryDraft::new(SessionId::new("t"), "init", "x", "{}"),
            2,
            &Keypair::generate(),
        );
        let err = fold_entries(&[entry("init", "a", 1, &SessionSnapshot::default()), other], &phases);
        assert!(matches!(err, Err(CoreError::SessionMismatch { .. })));
    }

    #[test]
    fn test_empty() {
        assert_eq!(fold_entries(&[], &PhaseOrder::default()).unwrap(), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn step_and_watermark_are_maxima(
                steps in prop::collection::vec((0u64..100, 0i64..10_000), 1..12)
            ) {
                let phases = PhaseOrder::default();
                let entries: Vec<LogEntry> = steps
                    .iter()
                    .enumerate()
                    .map(|(i, (step, ts))| {
                        let snap = SessionSnapshot { step: Some(*step), ..Default::default() };
                        entry("exec", &format!("op{}", i), *ts, &snap)
                    })
                    .collect();

                let folded = fold_entries(&entries, &phases).unwrap().unwrap();
                prop_assert_eq!(folded.step, steps.iter().map(|(s, _)| *s).max());
                prop_assert_eq!(
                    folded.last_log_entry_timestamp,
                    steps.iter().map(|(_, t)| *t).max()
                );
            }
        }
    }
}
