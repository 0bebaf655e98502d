use crate::error::ConfigurationError;
use crate::naming::NameTemplate;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Logical name of the activation model
pub const ACTIVATION: &str = "Activation";
/// Logical name of the configuration model
pub const CONFIGURATION: &str = "Configuration";
/// Logical name of the ping model
pub const PING: &str = "Ping";

/// Static description of a stored model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    /// Logical model name
    pub name: String,
    /// Known fields (documents are schema-less, this is informational)
    pub fields: BTreeSet<String>,
    /// Fields receiving a sparse single-field index
    pub indexed_fields: BTreeSet<String>,
    /// Physical collection name template
    pub name_template: NameTemplate,
}

impl ModelDefinition {
    /// Create a definition, parsing its name template
    pub fn new(
        name: &str,
        fields: &[&str],
        indexed_fields: &[&str],
        name_template: &str,
    ) -> Result<Self, ConfigurationError> {
        let definition = Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            indexed_fields: indexed_fields.iter().map(|f| f.to_string()).collect(),
            name_template: NameTemplate::parse(name_template)?,
        };

        if let Some(field) = definition
            .indexed_fields
            .iter()
            .find(|f| !definition.fields.contains(*f))
        {
            return Err(ConfigurationError::UnknownIndexField {
                model: definition.name.clone(),
                field: field.clone(),
            });
        }

        Ok(definition)
    }

    /// Whether the physical collection changes with the date
    pub fn is_sharded(&self) -> bool {
        self.name_template.is_dynamic()
    }
}

/// Ordered, validated set of model definitions
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    definitions: Vec<Arc<ModelDefinition>>,
}

impl ModelRegistry {
    /// Build a registry, rejecting duplicate logical names
    pub fn new(definitions: Vec<ModelDefinition>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.name.clone()) {
                return Err(ConfigurationError::DuplicateModel(definition.name.clone()));
            }
        }

        Ok(Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
        })
    }

    /// The models stored by the telemetry service
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::new(vec![
            ModelDefinition::new(
                ACTIVATION,
                &[
                    "image", "vendor", "product", "release", "serial", "live", "dualboot",
                    "mac_hash", "country", "region", "city", "latitude", "longitude",
                ],
                &[
                    "image", "vendor", "product", "release", "serial", "live", "country",
                    "region", "city", "latitude", "longitude",
                ],
                "activation",
            )?,
            ModelDefinition::new(
                CONFIGURATION,
                &["image", "vendor", "product", "dualboot"],
                &["image", "vendor", "product"],
                "configuration",
            )?,
            ModelDefinition::new(
                PING,
                &[
                    "config_id",
                    "count",
                    "country",
                    "release",
                    "metrics_enabled",
                    "metrics_environment",
                ],
                &["config_id", "count", "country"],
                "ping_$DATE",
            )?,
        ])
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> &[Arc<ModelDefinition>] {
        &self.definitions
    }

    /// Look up a definition by logical name
    pub fn get(&self, name: &str) -> Option<&Arc<ModelDefinition>> {
        self.definitions.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = ModelRegistry::builtin().unwrap();
        let names: Vec<_> = registry.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![ACTIVATION, CONFIGURATION, PING]);

        assert!(registry.get(PING).unwrap().is_sharded());
        assert!(!registry.get(ACTIVATION).unwrap().is_sharded());
        assert!(!registry.get(CONFIGURATION).unwrap().is_sharded());
    }

    #[test]
    fn test_configuration_identity_fields() {
        let registry = ModelRegistry::builtin().unwrap();
        let configuration = registry.get(CONFIGURATION).unwrap();

        for field in ["image", "vendor", "product", "dualboot"] {
            assert!(configuration.fields.contains(field));
        }
        assert!(!configuration.fields.contains("release"));
        assert!(!configuration.fields.contains("country"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ModelRegistry::new(vec![
            ModelDefinition::new("Ping", &["count"], &[], "ping").unwrap(),
            ModelDefinition::new("Ping", &["count"], &[], "ping_$DATE").unwrap(),
        ]);

        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::DuplicateModel("Ping".to_string())
        );
    }

    #[test]
    fn test_unknown_template_variable_rejected() {
        let result = ModelDefinition::new("Ping", &["count"], &[], "ping_$HOUR");
        assert!(matches!(
            result,
            Err(ConfigurationError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_index_on_unknown_field_rejected() {
        let result = ModelDefinition::new("Ping", &["count"], &["country"], "ping");
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::UnknownIndexField {
                model: "Ping".to_string(),
                field: "country".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_model_lookup() {
        let registry = ModelRegistry::builtin().unwrap();
        assert!(registry.get("Session").is_none());
    }
}
