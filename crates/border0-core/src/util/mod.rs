//! Small data-shape helpers used around the SDK.

mod ipv6;
mod json;
mod maps;

pub use ipv6::{ipv6_to_uuid, uuid_to_ipv6};
pub use json::{canonical_json, json_equal};
pub use maps::reverse_map;
