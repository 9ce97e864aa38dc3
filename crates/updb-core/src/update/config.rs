//! Update run configuration.

use super::status::StatusOptions;

/// Options controlling what a run includes and how it treats the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Include the entity definition update unit.
    pub entity_updates: bool,

    /// Include pending post-updates.
    pub post_updates: bool,

    /// Flush caches and rebuild the service container after a run that executed anything.
    pub cache_clear: bool,

    /// Enable maintenance mode while units execute.
    pub maintenance_mode: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            entity_updates: false,
            post_updates: true,
            cache_clear: true,
            maintenance_mode: true,
        }
    }
}

impl UpdateOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include or exclude entity definition updates.
    pub fn with_entity_updates(mut self, enabled: bool) -> Self {
        self.entity_updates = enabled;
        self
    }

    /// Include or exclude post-updates.
    pub fn with_post_updates(mut self, enabled: bool) -> Self {
        self.post_updates = enabled;
        self
    }

    /// Enable or disable the final cache clear.
    pub fn with_cache_clear(mut self, enabled: bool) -> Self {
        self.cache_clear = enabled;
        self
    }

    /// Enable or disable maintenance mode during the run.
    pub fn with_maintenance_mode(mut self, enabled: bool) -> Self {
        self.maintenance_mode = enabled;
        self
    }

    /// The matching status listing options.
    pub fn status_options(&self) -> StatusOptions {
        StatusOptions {
            entity_updates: self.entity_updates,
            post_updates: self.post_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = UpdateOptions::default();
        assert!(!options.entity_updates);
        assert!(options.post_updates);
        assert!(options.cache_clear);
        assert!(options.maintenance_mode);
    }

    #[test]
    fn test_builders_carry_into_status_options() {
        let options = UpdateOptions::new()
            .with_entity_updates(true)
            .with_post_updates(false)
            .with_cache_clear(false);

        assert!(!options.cache_clear);
        assert_eq!(
            options.status_options(),
            StatusOptions {
                entity_updates: true,
                post_updates: false,
            }
        );
    }
}
