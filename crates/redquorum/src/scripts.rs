//! The Lua scripts run server-side, and the registry that digests them.
//!
//! Every store call is a single atomic script evaluation; there are no
//! multi-round-trip protocols anywhere in this crate. Keeping the scripts
//! here as plain constants, rather than templated, keeps the digest stable
//! across process restarts as long as the text (or a caller's rewrite) does.

use sha1::{Digest, Sha1};

/// Sets every key to `value` with the given TTL, but only if none of them
/// already exist. Checks every key before mutating any of them, so a
/// single already-held key aborts the whole call without setting the
/// others. Returns the number of keys it actually set (0 or `#KEYS`).
pub const ACQUIRE_SCRIPT: &str = r#"
-- ACQUIRE_MARKER
for _, key in ipairs(KEYS) do
  if redis.call("exists", key) == 1 then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  redis.call("set", key, ARGV[1], "PX", ARGV[2])
end
return #KEYS
"#;

/// Refreshes the TTL on every key currently owned by `value`, but only if
/// every one of them is still owned by `value`. Checks every key before
/// mutating any of them, so a single mismatched key aborts the whole call
/// without touching the others. Returns the number of keys it refreshed
/// (0 or `#KEYS`).
pub const EXTEND_SCRIPT: &str = r#"
-- EXTEND_MARKER
for _, key in ipairs(KEYS) do
  if redis.call("get", key) ~= ARGV[1] then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  redis.call("set", key, ARGV[1], "PX", ARGV[2])
end
return #KEYS
"#;

/// Deletes every key currently owned by `value`. Returns the number of keys
/// it actually deleted.
pub const RELEASE_SCRIPT: &str = r#"
-- RELEASE_MARKER
local count = 0
for _, key in ipairs(KEYS) do
  if redis.call("get", key) == ARGV[1] then
    redis.call("del", key)
    count = count + 1
  end
end
return count
"#;

/// A script's text paired with its SHA-1 hex digest, computed once.
#[derive(Debug, Clone)]
pub struct ScriptDigest {
    pub text: &'static str,
    pub hash: String,
}

impl ScriptDigest {
    fn new(text: &'static str) -> Self {
        Self {
            text,
            hash: sha1_hex(text),
        }
    }
}

/// A caller-supplied hook to rewrite a script's text before it is digested.
///
/// Applied exactly once, at [`ScriptRegistry::new`] time; lets embedders
/// swap in variants (e.g. with extra bookkeeping) without forking this crate.
pub trait ScriptRewrites: Send + Sync {
    fn acquire(&self, script: &'static str) -> String {
        script.to_string()
    }
    fn extend(&self, script: &'static str) -> String {
        script.to_string()
    }
    fn release(&self, script: &'static str) -> String {
        script.to_string()
    }
}

/// The default rewrite hook: every script passes through unchanged.
pub struct NoRewrites;
impl ScriptRewrites for NoRewrites {}

/// Holds the three scripts this crate runs, each with its SHA-1 digest
/// precomputed so that every store invocation can attempt `EVALSHA` first.
pub struct ScriptRegistry {
    pub acquire: ScriptDigest,
    pub extend: ScriptDigest,
    pub release: ScriptDigest,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::with_rewrites(&NoRewrites)
    }

    pub fn with_rewrites(rewrites: &dyn ScriptRewrites) -> Self {
        Self {
            acquire: digest_rewritten(ACQUIRE_SCRIPT, rewrites.acquire(ACQUIRE_SCRIPT)),
            extend: digest_rewritten(EXTEND_SCRIPT, rewrites.extend(EXTEND_SCRIPT)),
            release: digest_rewritten(RELEASE_SCRIPT, rewrites.release(RELEASE_SCRIPT)),
        }
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A rewrite that returned the unmodified script text is stored as the
/// `'static` original so we never allocate on the default path; anything
/// else is leaked once at startup to obtain a `'static` str. Script
/// registries are process-lifetime singletons in practice, so this is not
/// an unbounded leak.
fn digest_rewritten(original: &'static str, rewritten: String) -> ScriptDigest {
    if rewritten == original {
        ScriptDigest::new(original)
    } else {
        ScriptDigest::new(Box::leak(rewritten.into_boxed_str()))
    }
}

pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = sha1_hex(ACQUIRE_SCRIPT);
        let b = sha1_hex(ACQUIRE_SCRIPT);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn registry_digests_all_three() {
        let registry = ScriptRegistry::new();
        assert_eq!(registry.acquire.hash, sha1_hex(ACQUIRE_SCRIPT));
        assert_eq!(registry.extend.hash, sha1_hex(EXTEND_SCRIPT));
        assert_eq!(registry.release.hash, sha1_hex(RELEASE_SCRIPT));
        assert_ne!(registry.acquire.hash, registry.extend.hash);
    }

    struct UppercaseComment;
    impl ScriptRewrites for UppercaseComment {
        fn acquire(&self, script: &'static str) -> String {
            format!("{script}\n-- rewritten")
        }
    }

    #[test]
    fn rewrite_changes_digest() {
        let registry = ScriptRegistry::with_rewrites(&UppercaseComment);
        assert_ne!(registry.acquire.hash, sha1_hex(ACQUIRE_SCRIPT));
        assert_eq!(registry.extend.hash, sha1_hex(EXTEND_SCRIPT));
    }
}
