//! Stripping of diagnostic lines that kubeadm sometimes prints ahead of its
//! JSON output.
//!
//! The policy is literal: count every line that starts with the sentinel,
//! wherever it sits in the document, and drop that many lines from the front.
//! When the warnings form a leading run (the only shape kubeadm produces) this
//! removes exactly the warnings. If the sentinel also appears further down, real
//! payload lines are dropped instead and the parse that follows fails; that is
//! left as is.

use tracing::debug;

/// Default sentinel: klog warning prefix emitted by kubeadm.
pub const DEFAULT_SENTINEL: &str = "W0508";

/// Remove as many leading lines as there are sentinel-prefixed lines.
///
/// Input without the sentinel is returned unchanged.
pub fn clean(raw: &[u8], sentinel: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    if !text.contains(sentinel) {
        return raw.to_vec();
    }

    debug!(raw = %text, "cleaning command output");
    let lines: Vec<&str> = text.split('\n').collect();
    let noisy = lines
        .iter()
        .filter(|line| line.starts_with(sentinel))
        .count();

    let cleaned = lines[noisy.min(lines.len())..].join("\n");
    debug!(cleaned = %cleaned, dropped = noisy, "cleaned command output");
    cleaned.into_bytes()
}
