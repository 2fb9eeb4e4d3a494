//! Bulk serial-number import parsing.

use std::collections::BTreeSet;

use equiptrack_core::{DomainError, DomainResult};

/// Parse a pasted block of serial numbers: one per line, trimmed, blank lines
/// ignored. Duplicates within the block are rejected up front so the batch
/// insert never has to guess which copy "won".
pub fn parse_serials(text: &str) -> DomainResult<Vec<String>> {
    let serials: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if serials.is_empty() {
        return Err(DomainError::validation("no serial numbers detected"));
    }

    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for serial in &serials {
        if !seen.insert(serial.as_str()) {
            repeated.insert(serial.as_str());
        }
    }
    if !repeated.is_empty() {
        let list: Vec<&str> = repeated.into_iter().collect();
        return Err(DomainError::duplicate_serial(format!(
            "repeated within the import: {}",
            list.join(", ")
        )));
    }

    Ok(serials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_skips_blank_lines() {
        let serials = parse_serials("  S-1\n\n S-2 \r\n\t\nS-3").unwrap();
        assert_eq!(serials, vec!["S-1", "S-2", "S-3"]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse_serials(" \n \n"), Err(DomainError::Validation(_))));
    }

    #[test]
    fn repeated_serials_are_listed_once() {
        match parse_serials("A\nB\nA\nA\nB").unwrap_err() {
            DomainError::DuplicateSerial(msg) => assert!(msg.ends_with("A, B")),
            other => panic!("expected DuplicateSerial, got {other:?}"),
        }
    }
}
