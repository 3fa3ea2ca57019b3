//! `sources.json`: source file paths indexed by the file ids in the scope tree.

use crate::errors::NcdbResult;

pub fn serialize(files: &[String]) -> NcdbResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(files)?)
}

pub fn parse(data: &[u8]) -> NcdbResult<Vec<String>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_preserved() {
        let files = vec!["rtl/top.sv".to_string(), "rtl/core.sv".to_string()];
        assert_eq!(parse(&serialize(&files).unwrap()).unwrap(), files);
    }

    #[test]
    fn test_not_an_array() {
        assert!(parse(br#"{"a":1}"#).is_err());
    }
}
