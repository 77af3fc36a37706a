use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
}

/// Settings for one sync run, assembled from CLI flags and environment
/// variables before any network call is made.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub promoter_id: String,
    pub cockpit_url: String,
    pub cockpit_api_key: String,
    pub dry_run: bool,
    pub strict: bool,
    pub list_limit: u32,
    pub concurrency: usize,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.promoter_id.trim().is_empty() {
            return Err(ConfigError::Missing("promoter id"));
        }
        if self.cockpit_url.trim().is_empty() {
            return Err(ConfigError::Missing("cockpit api url"));
        }
        if self.cockpit_api_key.trim().is_empty() {
            return Err(ConfigError::Missing("cockpit api key"));
        }
        Ok(())
    }
}
