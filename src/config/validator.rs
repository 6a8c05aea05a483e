use crate::config::{parse_duration, parse_size, Config, SCHEMA_VERSION};
use crate::error::{Result, SemdexError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_registry(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_tags(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SemdexError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        let valid_providers = ["hashing", "fastembed"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.max_chars == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chars",
                "Chunk size must be greater than 0",
            ));
        }

        if chunking.overlap_chars >= chunking.max_chars {
            errors.push(ValidationError::new(
                "chunking.overlap_chars",
                format!(
                    "Overlap ({}) must be smaller than max_chars ({})",
                    chunking.overlap_chars, chunking.max_chars
                ),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let index = &config.index;
        if index.initial_capacity == 0 {
            errors.push(ValidationError::new(
                "index.initial_capacity",
                "Initial capacity must be greater than 0",
            ));
        }

        if index.max_capacity < index.initial_capacity {
            errors.push(ValidationError::new(
                "index.max_capacity",
                "Max capacity cannot be smaller than initial capacity",
            ));
        }

        if index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if index.ef_search_floor == 0 || index.ef_search_multiplier == 0 {
            errors.push(ValidationError::new(
                "index.ef_search_floor",
                "Search ef floor and multiplier must be greater than 0",
            ));
        }
    }

    fn validate_registry(config: &Config, errors: &mut Vec<ValidationError>) {
        let registry = &config.registry;
        if registry.warm_limit == 0 {
            errors.push(ValidationError::new(
                "registry.warm_limit",
                "Warm limit must be greater than 0",
            ));
        }

        match parse_size(&registry.memory_budget) {
            Some(0) => errors.push(ValidationError::new(
                "registry.memory_budget",
                "Memory budget must be greater than 0",
            )),
            Some(_) => {}
            None => errors.push(ValidationError::new(
                "registry.memory_budget",
                format!("Invalid size format: {}", registry.memory_budget),
            )),
        }

        for (path, value) in [
            ("registry.idle_ttl", &registry.idle_ttl),
            ("registry.maintenance_interval", &registry.maintenance_interval),
        ] {
            if parse_duration(value).is_none() {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                ));
            }
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        if retrieval.max_query_chars == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_query_chars",
                "Max query length must be greater than 0",
            ));
        }

        let threshold = retrieval.poor_match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "retrieval.poor_match_threshold",
                format!("Threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if retrieval.min_good_hits == 0 {
            errors.push(ValidationError::new(
                "retrieval.min_good_hits",
                "Minimum good hits must be at least 1",
            ));
        }

        if parse_duration(&retrieval.max_duration).is_none() {
            errors.push(ValidationError::new(
                "retrieval.max_duration",
                format!("Invalid duration format: {}", retrieval.max_duration),
            ));
        }

        if retrieval.expansion_batch == 0 {
            errors.push(ValidationError::new(
                "retrieval.expansion_batch",
                "Expansion batch must be greater than 0",
            ));
        }

        if retrieval.max_k1 == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_k1",
                "Max search breadth must be greater than 0",
            ));
        }
    }

    fn validate_tags(config: &Config, errors: &mut Vec<ValidationError>) {
        let tags = &config.tags;
        if tags.boost_per_match < 0.0 || tags.max_boost < 0.0 {
            errors.push(ValidationError::new(
                "tags.boost_per_match",
                "Tag boosts cannot be negative",
            ));
        }

        if !(0.0..=1.0).contains(&tags.tag_only_similarity) {
            errors.push(ValidationError::new(
                "tags.tag_only_similarity",
                format!(
                    "Tag-only similarity must be between 0.0 and 1.0, got {}",
                    tags.tag_only_similarity
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(SemdexError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.embedding.provider = "invalid".to_string();
        assert_eq!(error_paths(&config), vec!["embedding.provider"]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = Config::default();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert_eq!(error_paths(&config), vec!["chunking.overlap_chars"]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.registry.memory_budget = "a lot".to_string();
        config.registry.idle_ttl = "forever".to_string();
        config.retrieval.poor_match_threshold = 1.5;

        let paths = error_paths(&config);
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&"registry.memory_budget".to_string()));
        assert!(paths.contains(&"registry.idle_ttl".to_string()));
        assert!(paths.contains(&"retrieval.poor_match_threshold".to_string()));
    }
}
