//! Repository Identity
//!
//! Maps every spelling of a repository reference (full URL, scp-style git
//! remote, `owner/name` shorthand) onto one lowercase `repo_id`, and derives the
//! storage key from it.

use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::cache as cache_constants;

/// Upper bound on normalization passes (each pass strips at least one layer)
const MAX_PASSES: usize = 64;

/// Normalize a repository reference into a stable repository id.
///
/// Strips the scheme (and any `user@` part), a leading `www.`, the default host
/// prefix, `.git` suffixes and trailing slashes, then lowercases. The result is
/// a fixed point, so normalizing twice yields the same value.
pub fn normalize_repo_url(url: &str) -> String {
    let mut current = url.trim().to_lowercase();
    for _ in 0..MAX_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(input: &str) -> String {
    let without_scheme = strip_scheme(input);
    let mut s = without_scheme.as_str();

    s = s.strip_prefix("www.").unwrap_or(s);
    s = s
        .strip_prefix(cache_constants::DEFAULT_HOST_PREFIX)
        .unwrap_or(s);
    s = s.trim_end_matches('/');
    s = s.strip_suffix(".git").unwrap_or(s);
    s.trim_end_matches('/').to_string()
}

/// Drop `scheme://user@` or the scp-style `user@host:` form, keeping host + path
fn strip_scheme(input: &str) -> String {
    if let Ok(parsed) = Url::parse(input)
        && let Some(host) = parsed.host_str()
    {
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        return format!("{}{}", host, parsed.path());
    }

    if let Some((user_host, path)) = input.split_once(':')
        && let Some((_, host)) = user_host.split_once('@')
        && !host.is_empty()
        && !host.contains('/')
    {
        return format!("{}/{}", host, path.trim_start_matches('/'));
    }

    input.to_string()
}

/// Storage key for a repository.
///
/// Prefix, then the id with every run of characters outside `[a-z0-9]`
/// collapsed to a single `_`, then a digest of the full id. The readable part
/// alone is lossy (`acme/my-app` and `acme/my_app` share it); the digest keeps
/// distinct ids on distinct keys.
pub fn repo_cache_key(url: &str) -> String {
    let repo_id = normalize_repo_url(url);
    let mut key = String::with_capacity(
        cache_constants::CACHE_KEY_PREFIX.len()
            + repo_id.len()
            + cache_constants::KEY_DIGEST_WIDTH
            + 1,
    );
    key.push_str(cache_constants::CACHE_KEY_PREFIX);

    let mut last_was_sep = false;
    for c in repo_id.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            key.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            key.push('_');
            last_was_sep = true;
        }
    }
    if !last_was_sep {
        key.push('_');
    }
    key.push_str(&id_digest(&repo_id));
    key
}

fn id_digest(repo_id: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(repo_id.as_bytes()));
    hex.truncate(cache_constants::KEY_DIGEST_WIDTH);
    hex
}

/// Human project name: last segment of the repository id
pub fn project_name_from_repo(url: &str) -> Option<String> {
    normalize_repo_url(url)
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equivalent_references() {
        let expected = "foo/bar";
        for input in [
            "https://github.com/Foo/Bar.git",
            "https://github.com/foo/bar/",
            "http://www.github.com/foo/bar",
            "git@github.com:Foo/Bar.git",
            "ssh://git@github.com/foo/bar.git",
            "git://github.com/foo/bar",
            "github.com/foo/bar",
            "Foo/Bar",
            "  foo/bar  ",
        ] {
            assert_eq!(normalize_repo_url(input), expected, "input: {}", input);
        }
    }

    #[test]
    fn test_other_hosts_keep_host() {
        assert_eq!(
            normalize_repo_url("https://gitlab.com/group/proj.git"),
            "gitlab.com/group/proj"
        );
        assert_eq!(
            normalize_repo_url("git@gitlab.example.org:team/app"),
            "gitlab.example.org/team/app"
        );
    }

    #[test]
    fn test_repeated_suffixes_reach_fixed_point() {
        assert_eq!(normalize_repo_url("foo/bar.git.git//"), "foo/bar");
        assert_eq!(normalize_repo_url("git@github.com:a/b.git/"), "a/b");
    }

    #[test]
    fn test_repo_cache_key() {
        let key = repo_cache_key("https://github.com/Foo/Bar.git");
        assert!(key.starts_with("repo_cache_foo_bar_"), "{}", key);
        assert_eq!(key.len(), "repo_cache_foo_bar_".len() + 12);
        assert_eq!(repo_cache_key("foo/bar"), key);
        assert!(
            repo_cache_key("gitlab.com/my--group/x.y")
                .starts_with("repo_cache_gitlab_com_my_group_x_y_")
        );
    }

    #[test]
    fn test_repo_cache_key_separates_punctuation_variants() {
        let keys: std::collections::HashSet<_> =
            ["acme/my_app", "acme/my-app", "acme/my.app", "acme/myapp"]
                .into_iter()
                .map(repo_cache_key)
                .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name_from_repo("https://github.com/foo/Bar.git").as_deref(), Some("bar"));
        assert_eq!(project_name_from_repo(""), None);
    }

    proptest! {
        #[test]
        fn prop_normalization_idempotent(input in "[a-zA-Z0-9/._@:-]{0,40}") {
            let once = normalize_repo_url(&input);
            prop_assert_eq!(normalize_repo_url(&once), once.clone());
        }

        #[test]
        fn prop_spellings_agree(
            owner in "[a-zA-Z][a-zA-Z0-9-]{0,12}",
            name in "[a-zA-Z][a-zA-Z0-9_-]{0,12}",
            scheme in prop::sample::select(vec!["", "https://", "http://", "git://", "https://www."]),
            suffix in prop::sample::select(vec!["", ".git", "/", ".git/"]),
        ) {
            let host = if scheme.is_empty() { "" } else { "github.com/" };
            let full = format!("{}{}{}/{}{}", scheme, host, owner, name, suffix);
            let expected = format!("{}/{}", owner, name).to_lowercase();
            prop_assert_eq!(normalize_repo_url(&full), expected);
        }

        #[test]
        fn prop_cache_key_is_safe(input in "\\PC{0,40}") {
            let key = repo_cache_key(&input);
            prop_assert!(key.starts_with("repo_cache_"));
            prop_assert!(key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }

        #[test]
        fn prop_distinct_ids_get_distinct_keys(
            a in "[a-z0-9._-]{1,12}/[a-z0-9._-]{1,12}",
            b in "[a-z0-9._-]{1,12}/[a-z0-9._-]{1,12}",
        ) {
            prop_assume!(normalize_repo_url(&a) != normalize_repo_url(&b));
            prop_assert_ne!(repo_cache_key(&a), repo_cache_key(&b));
        }
    }
}
