//! World-country data: API wire types, the remote client, and the cached
//! repository that callers use.

pub mod api_types;
pub mod client;
pub mod repository;
pub mod types;
