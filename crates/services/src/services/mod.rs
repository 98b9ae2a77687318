pub mod app_error;
pub mod config;
pub mod profile_sync;
pub mod query_cache;
pub mod record_store;
pub mod team_mutations;
pub mod team_queries;

#[cfg(test)]
pub(crate) mod test_support;
