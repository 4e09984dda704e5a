//! Slug derivation and disambiguation.
//!
//! `"My Cool App!"` becomes `my-cool-app`. When that slug is taken the
//! first free of `my-cool-app-2`, `my-cool-app-3`, ... is used instead.

use std::collections::HashSet;

/// Longest derived slug, before any disambiguating suffix.
pub const MAX_SLUG_LEN: usize = 64;

/// Used when a name has no ASCII letters or digits at all.
const FALLBACK_SLUG: &str = "app";

/// Lowercases `name` and collapses every run of non-alphanumerics into one `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut separator_pending = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if separator_pending && !slug.is_empty() {
                slug.push('-');
            }
            separator_pending = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            separator_pending = true;
        }
    }

    // ASCII only, so byte truncation is safe
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// First of `base`, `base-2`, `base-3`, ... not present in `taken`.
///
/// `own` is the slug of the app being renamed, which does not count as taken.
pub fn disambiguate(base: &str, taken: &[String], own: Option<&str>) -> String {
    let taken: HashSet<&str> = taken
        .iter()
        .map(String::as_str)
        .filter(|slug| Some(*slug) != own)
        .collect();

    if !taken.contains(base) {
        return base.to_string();
    }

    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}
