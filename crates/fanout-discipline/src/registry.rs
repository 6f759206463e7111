//! Template registry

use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::DisciplineError;
use crate::template::DisciplineTemplate;

/// Templates by name, in registration order
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<DisciplineTemplate>>,
}

impl TemplateRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under its own name
    ///
    /// # Errors
    /// [`DisciplineError::Configuration`] if the name is taken.
    pub fn register(&mut self, template: DisciplineTemplate) -> Result<Arc<DisciplineTemplate>, DisciplineError> {
        let name = template.name().to_string();
        if self.templates.contains_key(&name) {
            return Err(DisciplineError::Configuration(format!(
                "template '{name}' already registered"
            )));
        }
        let template = Arc::new(template);
        self.templates.insert(name, Arc::clone(&template));
        Ok(template)
    }

    /// Look up a template
    ///
    /// # Errors
    /// [`DisciplineError::Configuration`] if unknown.
    pub fn get(&self, name: &str) -> Result<Arc<DisciplineTemplate>, DisciplineError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| DisciplineError::Configuration(format!("unknown template '{name}'")))
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// No templates
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
