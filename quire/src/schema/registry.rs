use super::types::CollectionDefinition;
use crate::error::{QuireError, Result};
use crate::pattern::SourcePattern;
use std::collections::HashMap;
use std::sync::Arc;

/// The registered collection definitions, in registration order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    definitions: Vec<Arc<CollectionDefinition>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of definitions, failing on the first bad one.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> Result<Self> {
        let mut registry = SchemaRegistry::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: CollectionDefinition) -> Result<Arc<CollectionDefinition>> {
        if self.contains(&definition.name) {
            return Err(QuireError::DuplicateCollection(definition.name));
        }
        definition.check()?;
        for source in &definition.sources {
            SourcePattern::parse(source)?;
        }

        let definition = Arc::new(definition);
        self.by_name
            .insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(Arc::clone(&definition));
        log::debug!("Registered collection '{}'", definition.name);
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<CollectionDefinition>> {
        self.by_name
            .get(name)
            .map(|&i| &self.definitions[i])
            .ok_or_else(|| QuireError::UnknownCollection(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CollectionDefinition>> {
        self.definitions.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType, Predicate, RecordKind};
    use pretty_assertions::assert_eq;

    fn project() -> CollectionDefinition {
        CollectionDefinition::new("project", RecordKind::Data, "projects/*.json")
            .field(FieldSpec::new("title", FieldType::LocalizedString).required())
            .field(FieldSpec::new("weight", FieldType::Number).required())
            .field(
                FieldSpec::new("link", FieldType::Url)
                    .required()
                    .with_predicate(Predicate::Url),
            )
    }

    #[test]
    fn test_register_then_get_returns_equal_definition() {
        let mut registry = SchemaRegistry::new();
        registry.register(project()).unwrap();
        assert_eq!(**registry.get("project").unwrap(), project());
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = SchemaRegistry::new();
        registry.register(project()).unwrap();
        let err = registry.register(project()).unwrap_err();
        assert!(matches!(err, QuireError::DuplicateCollection(ref name) if name == "project"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_collection() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.get("blog"),
            Err(QuireError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut registry = SchemaRegistry::new();
        let def = CollectionDefinition::new("broken", RecordKind::Data, "data/[*.json");
        assert!(matches!(
            registry.register(def),
            Err(QuireError::Pattern { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_order_kept() {
        let registry = SchemaRegistry::from_definitions(vec![
            CollectionDefinition::new("blog", RecordKind::Page, "blog/*/*.md"),
            project(),
            CollectionDefinition::new("pages", RecordKind::Page, "pages/*/*.md"),
        ])
        .unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["blog", "project", "pages"]
        );
    }
}
