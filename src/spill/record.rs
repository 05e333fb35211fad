//! Spill record payload encoding
//!
//! A spilled batch carries its destination with it:
//! `percent_encode(db) ' ' percent_encode(rp) ' ' compressed_batch`.
//! Percent-encoding keeps db and rp free of spaces, so the separator
//! appears exactly twice and the batch bytes may contain anything.

use crate::error::{SpillError, SpillResult};

/// Build the on-disk payload for one failed batch.
pub fn encode(db: &str, rp: &str, compressed: &[u8]) -> Vec<u8> {
    let db = urlencoding::encode(db);
    let rp = urlencoding::encode(rp);
    let mut payload = Vec::with_capacity(db.len() + rp.len() + compressed.len() + 2);
    payload.extend_from_slice(db.as_bytes());
    payload.push(b' ');
    payload.extend_from_slice(rp.as_bytes());
    payload.push(b' ');
    payload.extend_from_slice(compressed);
    payload
}

/// Split a spill payload back into (db, rp, compressed batch).
///
/// Splits on the first two spaces only; anything after them is the batch.
pub fn decode(payload: &[u8]) -> SpillResult<(String, String, Vec<u8>)> {
    let mut parts = payload.splitn(3, |&b| b == b' ');
    let db = parts.next();
    let rp = parts.next();
    let batch = parts.next();

    let (db, rp, batch) = match (db, rp, batch) {
        (Some(db), Some(rp), Some(batch)) => (db, rp, batch),
        _ => {
            let found = [db, rp, batch].iter().filter(|p| p.is_some()).count();
            return Err(SpillError::MalformedRecord(found));
        }
    };

    let db = std::str::from_utf8(db)
        .map_err(|_| SpillError::InvalidIdentifier)
        .and_then(|s| urlencoding::decode(s).map_err(|_| SpillError::InvalidIdentifier))?;
    let rp = std::str::from_utf8(rp)
        .map_err(|_| SpillError::InvalidIdentifier)
        .and_then(|s| urlencoding::decode(s).map_err(|_| SpillError::InvalidIdentifier))?;

    Ok((db.into_owned(), rp.into_owned(), batch.to_vec()))
}
