pub mod id;

pub use id::{has_prefix, prefixed_ulid};
