//! Length-safe, collision-resistant name and label derivation.
//!
//! Object names derived from user input (strategy name + branch) can exceed
//! the 255-character name limit or the 63-character label limit, and two
//! distinct inputs can collide after truncation. [`kube_safe_unique_name`]
//! appends an FNV-1a hash of the sanitized input before truncating so the
//! truncated tail still distinguishes them; [`kube_safe_label`] truncates
//! from the front so a uniqueness suffix at the tail survives.

use crate::proposed_commit::ProposedCommitSpec;

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over `data`.
fn fnv32a(data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET;
    for &b in data {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Replace every run of non-alphanumeric characters with a single `-`.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

fn truncate(s: &str, len: usize) -> String {
    s.chars().take(len).collect()
}

/// Keep the last `len` characters of `s`.
fn truncate_from_beginning(s: &str, len: usize) -> String {
    let count = s.chars().count();
    if count <= len {
        return s.to_string();
    }
    s.chars().skip(count - len).collect()
}

/// Derive a name-safe, unique identifier from `name`.
///
/// The hash is computed over the sanitized, lowercased input before the
/// trailing dash is stripped, and the truncation happens after the hash is
/// appended, so truncation cannot erase the uniqueness suffix.
pub fn kube_safe_unique_name(name: &str) -> String {
    let mut name = sanitize(name).to_ascii_lowercase();
    let hash = format!("{:x}", fnv32a(name.as_bytes()));
    if name.ends_with('-') {
        name.pop();
    }
    let full = format!("{name}-{hash}");
    truncate(&full, MAX_NAME_LEN.saturating_sub(hash.len() + 1))
}

/// Derive a label-safe value from `name`.
///
/// Truncates from the front so the uniqueness hash at the end of a
/// [`kube_safe_unique_name`] survives. Empty input stays empty.
pub fn kube_safe_label(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let name = sanitize(name);
    let name = truncate_from_beginning(&name, MAX_LABEL_LEN);
    match name.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None => name,
    }
}

/// Deterministic proposed-commit name for `(strategy, environment branch)`.
pub fn proposed_commit_name(strategy_name: &str, environment_branch: &str) -> String {
    kube_safe_unique_name(&format!("{strategy_name}-{environment_branch}"))
}

/// Deterministic pull-request name for a proposed commit's branch pair.
pub fn pull_request_name(spec: &ProposedCommitSpec) -> String {
    kube_safe_unique_name(&format!(
        "{}-{}-{}-{}",
        spec.repository.name, spec.repository.owner, spec.proposed_branch, spec.active_branch
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_is_deterministic() {
        let a = kube_safe_unique_name("demo-strategy-environment/development");
        let b = kube_safe_unique_name("demo-strategy-environment/development");
        assert_eq!(a, b);
    }

    #[test]
    fn unique_name_sanitizes_and_lowercases() {
        let name = kube_safe_unique_name("Demo/Strategy");
        assert!(name.starts_with("demo-strategy-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn unique_name_is_length_bounded() {
        let long = format!("{}-alpha", "x".repeat(300));
        let name = kube_safe_unique_name(&long);
        assert!(name.len() <= 255);
    }

    #[test]
    fn unique_name_distinguishes_inputs_differing_in_window() {
        let a = kube_safe_unique_name(&format!("alpha-{}", "x".repeat(100)));
        let b = kube_safe_unique_name(&format!("beta-{}", "x".repeat(100)));
        assert_ne!(a, b);
    }

    #[test]
    fn unique_name_guards_trailing_dash_collisions() {
        // The hash is computed before the trailing dash is stripped, so
        // "demo-" and "demo" stay distinct.
        let a = kube_safe_unique_name("demo-");
        let b = kube_safe_unique_name("demo");
        assert!(!a.contains("--"));
        assert_ne!(a, b);
    }

    #[test]
    fn label_replaces_non_alphanumeric_runs() {
        assert_eq!(kube_safe_label("environment/development"), "environment-development");
        assert_eq!(kube_safe_label("a//b..c"), "a-b-c");
    }

    #[test]
    fn label_truncates_from_front_and_strips_leading_dash() {
        let input = format!("{}/tail-suffix", "y".repeat(100));
        let label = kube_safe_label(&input);
        assert!(label.len() <= 63);
        assert!(label.ends_with("tail-suffix"));
        assert!(!label.starts_with('-'));
        assert!(label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'));
    }

    #[test]
    fn label_empty_input_is_empty() {
        assert_eq!(kube_safe_label(""), "");
    }

    #[test]
    fn fnv32a_known_vectors() {
        // Reference values for the 32-bit FNV-1a parameters.
        assert_eq!(fnv32a(b""), 0x811c9dc5);
        assert_eq!(fnv32a(b"a"), 0xe40c292c);
    }
}
