//! Golden test vectors for the canonical log content encoding.
//!
//! Entry hashes and content IDs are computed over these bytes, so any
//! change to the encoding shows up here first.

use crossgate_core::canonical::{canonical_content_bytes, content_hash};
use crossgate_core::{LogContent, LogEntryDraft, SessionId};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub session_id: &'static str,
    pub log_type: &'static str,
    pub operation: &'static str,
    pub timestamp: i64,
    pub data: &'static str,
    /// Expected canonical CBOR bytes (hex).
    pub expected_bytes: &'static str,
    /// Expected SHA-256 of the canonical bytes (hex).
    pub expected_hash: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "init step with snapshot data",
            session_id: "s-1",
            log_type: "init",
            operation: "validate",
            timestamp: 1_736_870_400_000,
            data: "{\"step\":1}",
            expected_bytes: "a60063732d310164696e69740271732d312d696e69742d76616c6964617465\
                             036876616c6964617465041b00000194658b1000056a7b2273746570223a317d",
            expected_hash: "43897dd6e001a71b4778c49851a9e8ec714c8484ab5811a770ac968ea4c72eee",
        },
        GoldenVector {
            name: "proof entry",
            session_id: "s-1",
            log_type: "proof",
            operation: "lock",
            timestamp: 1_736_870_401_000,
            data: "0xdeadbeef",
            expected_bytes: "a60063732d31016570726f6f66026e732d312d70726f6f662d6c6f636b0364\
                             6c6f636b041b00000194658b13e8056a30786465616462656566",
            expected_hash: "733be251f282760aeae63be1d672963c851591af14a0cb712ca46a7629133b99",
        },
        GoldenVector {
            name: "empty data at epoch",
            session_id: "a",
            log_type: "t",
            operation: "o",
            timestamp: 0,
            data: "",
            expected_bytes: "a60061610161740265612d742d6f03616f04000560",
            expected_hash: "187d585fb4e1b270d525f63c10a50ccdfe0bd39a980fe71d0e7a3d1199b02655",
        },
        GoldenVector {
            name: "negative timestamp",
            session_id: "pre-epoch",
            log_type: "init",
            operation: "start",
            timestamp: -1,
            data: "{}",
            expected_bytes: "a600697072652d65706f63680164696e697402747072652d65706f63682d69\
                             6e69742d737461727403657374617274042005627b7d",
            expected_hash: "e4707ebf8b6adff30afe4f4380744d613ed858233de82efa996a0da646a70917",
        },
    ]
}

/// Build the log content a vector describes.
pub fn content_from_vector(vector: &GoldenVector) -> LogContent {
    LogEntryDraft::new(
        SessionId::new(vector.session_id),
        vector.log_type,
        vector.operation,
        vector.data,
    )
    .into_content(vector.timestamp)
}

/// Check every vector, returning the names of the ones that do not match.
pub fn verify_all_vectors() -> Vec<&'static str> {
    all_vectors()
        .iter()
        .filter(|v| {
            let content = content_from_vector(v);
            hex::encode(canonical_content_bytes(&content)) != v.expected_bytes
                || content_hash(&content).to_hex() != v.expected_hash
        })
        .map(|v| v.name)
        .collect()
}
