use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::Checklist;
use crate::error::CssdResult;

#[derive(Serialize)]
struct SignedContent<'a> {
    cycle_id: &'a str,
    checklist: &'a Checklist,
    comments: &'a str,
}

/// Hash a signer acknowledges when releasing a load.
///
/// Stable for identical content: the serialized form has a fixed field order.
pub fn content_hash(cycle_id: &str, checklist: &Checklist, comments: &str) -> CssdResult<String> {
    let content = SignedContent {
        cycle_id,
        checklist,
        comments,
    };
    let bytes = serde_json::to_vec(&content)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
