//! Core data types shared across the proxy

use bytes::Bytes;

/// One unit of ingress: line-protocol bytes tagged with their destination
/// database and retention policy.
///
/// The `line` field holds one or more line-protocol records and is opaque
/// to the proxy beyond trailing-newline handling. `db` and `rp` are opaque
/// identifiers; they are percent-encoded whenever they cross a boundary
/// where a space would be ambiguous (URLs, spill records).
#[derive(Debug, Clone)]
pub struct LinePoint {
    /// Target database.
    pub db: String,
    /// Target retention policy.
    pub rp: String,
    /// Raw line-protocol bytes.
    pub line: Bytes,
}

impl LinePoint {
    /// Create a new point.
    pub fn new(db: impl Into<String>, rp: impl Into<String>, line: impl Into<Bytes>) -> Self {
        Self {
            db: db.into(),
            rp: rp.into(),
            line: line.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_point_new() {
        let p = LinePoint::new("db0", "rp0", "cpu,host=a value=1 1000\n".as_bytes());
        assert_eq!(p.db, "db0");
        assert_eq!(p.rp, "rp0");
        assert!(p.line.ends_with(b"\n"));
    }
}
