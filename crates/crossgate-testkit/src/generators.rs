//! Proptest generators for property-based testing.

use proptest::prelude::*;

use crossgate_core::{
    Ed25519PublicKey, Keypair, LogEntry, LogEntryDraft, PhaseOrder, SessionId, SessionSnapshot,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a session ID.
pub fn session_id() -> impl Strategy<Value = SessionId> {
    "[a-z][a-z0-9-]{0,23}".prop_map(SessionId::new)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_102_444_800_000i64
}

/// Generate a phase tag from the default vocabulary.
pub fn phase() -> impl Strategy<Value = String> {
    prop::sample::select(PhaseOrder::DEFAULT.to_vec()).prop_map(String::from)
}

/// Generate an operation name.
pub fn operation() -> impl Strategy<Value = String> {
    "[a-z]{1,12}".prop_map(String::from)
}

/// Generate a partial session snapshot.
pub fn snapshot() -> impl Strategy<Value = SessionSnapshot> {
    (
        (
            proptest::option::of(phase()),
            proptest::option::of(0u64..1_000),
            proptest::option::of(0u64..1_000),
            proptest::option::of(timestamp()),
            proptest::option::of(timestamp()),
        ),
        (
            proptest::option::of(public_key()),
            proptest::option::of(public_key()),
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(0u32..10),
            proptest::option::of(1u64..60_000),
        ),
        (
            proptest::option::of(any::<bool>()),
            prop::collection::vec("[a-z0-9]{1,8}", 0..3),
            prop::collection::vec("[a-z]{1,8}", 0..3),
        ),
    )
        .prop_map(
            |(
                (phase, step, seq, watermark, received),
                (source_key, recipient_key, source_path, recipient_path, retries, timeout),
                (rollback, proofs, actions),
            )| SessionSnapshot {
                phase,
                step,
                last_sequence_number: seq,
                last_log_entry_timestamp: watermark,
                last_message_received_timestamp: received,
                source_gateway_public_key: source_key,
                recipient_gateway_public_key: recipient_key,
                source_base_path: source_path,
                recipient_base_path: recipient_path,
                max_retries: retries,
                max_timeout_ms: timeout,
                rollback,
                rollback_proofs: proofs,
                rollback_actions_performed: actions,
            },
        )
}

/// Parameters for generating a log entry.
#[derive(Debug, Clone)]
pub struct EntryParams {
    pub keypair: Keypair,
    pub session_id: SessionId,
    pub log_type: String,
    pub operation: String,
    pub timestamp: i64,
    pub snapshot: SessionSnapshot,
}

impl Arbitrary for EntryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(), // seed
            session_id(),
            phase(),
            operation(),
            timestamp(),
            snapshot(),
        )
            .prop_map(|(seed, session_id, log_type, operation, timestamp, snapshot)| EntryParams {
                keypair: Keypair::from_seed(&seed),
                session_id,
                log_type,
                operation,
                timestamp,
                snapshot,
            })
            .boxed()
    }
}

/// Seal a log entry from parameters.
pub fn entry_from_params(params: &EntryParams) -> LogEntry {
    let data = params
        .snapshot
        .to_data()
        .unwrap_or_else(|_| String::from("{}"));
    let draft = LogEntryDraft::new(
        params.session_id.clone(),
        params.log_type.clone(),
        params.operation.clone(),
        data,
    );
    LogEntry::seal(draft, params.timestamp, &params.keypair)
}

/// Generate the log of one session: up to `max_len` entries with distinct
/// keys, signed by one gateway.
pub fn session_log(max_len: usize) -> impl Strategy<Value = Vec<LogEntry>> {
    (
        keypair(),
        session_id(),
        prop::collection::vec((phase(), timestamp(), snapshot()), 1..=max_len),
    )
        .prop_map(|(keypair, session_id, steps)| {
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (log_type, timestamp, snapshot))| {
                    entry_from_params(&EntryParams {
                        keypair: keypair.clone(),
                        session_id: session_id.clone(),
                        log_type,
                        operation: format!("op{}", i),
                        timestamp,
                        snapshot,
                    })
                })
                .collect()
        })
}
