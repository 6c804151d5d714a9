//! Merge-Request trailer helpers.
//!
//! A commit that resolves a conflicted merge names the request in its
//! message:
//!
//! ```text
//! resolve cell1
//!
//! Merge-Request: 3f1c...
//! ```

/// Trailer key naming the merge request a commit resolves
pub const MERGE_REQUEST_TRAILER: &str = "Merge-Request:";

/// Return the first Merge-Request id found in a commit message.
pub fn find_merge_request_id(message: &str) -> Option<String> {
    for line in message.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(MERGE_REQUEST_TRAILER) {
            let value = rest.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Append a Merge-Request trailer unless the message already has one.
pub fn with_merge_request_trailer(message: &str, request_id: &str) -> String {
    if find_merge_request_id(message).is_some() {
        return message.to_string();
    }

    let trimmed = message.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return format!("{MERGE_REQUEST_TRAILER} {request_id}\n");
    }

    format!("{trimmed}\n\n{MERGE_REQUEST_TRAILER} {request_id}\n")
}
