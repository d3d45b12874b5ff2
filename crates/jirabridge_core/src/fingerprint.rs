use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::adf::AdfNode;
use crate::markup::markdown_to_wiki;

static HASH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Hash:\s+([0-9a-f]{64})$").expect("hash line pattern"));

/// SHA-256 of the raw GitHub issue body, 64 lowercase hex characters.
///
/// The digest always covers the original body bytes, never the converted
/// wiki text, so converter changes cannot spuriously trigger updates. An
/// absent body hashes like the empty string.
pub fn body_hash(body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compose the full Jira description: converted body, origin link, and hash
/// footer, in that fixed order.
pub fn build_description(body: Option<&str>, source_url: &str) -> String {
    let digest = body_hash(body);
    let converted = markdown_to_wiki(body.unwrap_or(""));

    let mut parts = Vec::new();
    if !converted.is_empty() {
        parts.push(converted);
    }
    parts.push(String::new());
    parts.push("----".to_string());
    parts.push(format!("Migrated from GitHub issue: [{source_url}]"));
    parts.push(format!("Hash: {digest}"));

    parts.join("\n")
}

/// Walk top-level ADF paragraph nodes looking for the `Hash: <64hex>`
/// footer line. Returns `None` for an absent, malformed, or footer-less
/// description; callers must treat that as "no verifiable fingerprint" and
/// leave the destination issue alone.
pub fn extract_hash(description: Option<&AdfNode>) -> Option<String> {
    let AdfNode::Doc { content } = description? else {
        return None;
    };
    for node in content {
        if !matches!(node, AdfNode::Paragraph { .. }) {
            continue;
        }
        let line = node.plain_text();
        if let Some(caps) = HASH_LINE.captures(line.trim()) {
            return Some(caps[1].to_string());
        }
    }
    None
}
