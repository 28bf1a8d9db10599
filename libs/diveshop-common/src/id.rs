use std::sync::Mutex;

use ulid::{Generator, Ulid};

// Monotonic within the process, so ids minted later always sort later.
static GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = diveshop_common::id::prefixed_ulid("enr");
/// assert!(id.starts_with("enr_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, next_ulid())
}

fn next_ulid() -> Ulid {
    let mut generator = GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    // Overflow needs 2^80 ids in one millisecond; fall back to a random one.
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

/// Returns true when `id` carries `prefix` followed by a well-formed ULID.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|ulid| Ulid::from_string(ulid).is_ok())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const COURSE: &str = "crs";
    pub const COURSE_SESSION: &str = "cses";
    pub const ENROLLMENT: &str = "enr";
    pub const ORDER: &str = "ord";
    pub const REFUND: &str = "rfd";
    pub const AUDIT: &str = "aud";
}
