//! `history.json`: a JSON array of history records.

use crate::errors::NcdbResult;
use crate::models::HistoryNode;

pub fn serialize(history: &[HistoryNode]) -> NcdbResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(history)?)
}

pub fn parse(data: &[u8]) -> NcdbResult<Vec<HistoryNode>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryKind, TestStatus};

    #[test]
    fn test_round_trip() {
        let mut t = HistoryNode::test("smoke");
        t.seed = Some("1234".into());
        t.sim_time = Some(1.5e6);
        t.test_status = TestStatus::Error.code();
        let m = HistoryNode::new("merge", HistoryKind::Merge);
        let nodes = vec![t, m];
        assert_eq!(parse(&serialize(&nodes).unwrap()).unwrap(), nodes);
    }

    #[test]
    fn test_empty_array_and_blank() {
        assert!(parse(b"[]").unwrap().is_empty());
        assert!(parse(b"").unwrap().is_empty());
    }

    #[test]
    fn test_minimal_record_defaults() {
        let nodes = parse(br#"[{"logical_name":"t"}]"#).unwrap();
        assert_eq!(nodes[0].kind, HistoryKind::Test);
        assert_eq!(nodes[0].status().unwrap(), TestStatus::Ok);
    }
}
