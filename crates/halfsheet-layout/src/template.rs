use crate::types::*;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Id of the template that always exists
pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Named bundle of margin, safe gap and shrink policy
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "PascalCase", default))]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Inset from the printable area (mm)
    pub margin_mm: u32,
    /// Allow 90%-100% reduction when the page doesn't fit
    pub auto_shrink: bool,
    /// Clearance above the sheet's midline (mm)
    pub safe_gap_mm: u32,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            id: DEFAULT_TEMPLATE_ID.to_string(),
            name: "Default".to_string(),
            margin_mm: 3,
            auto_shrink: true,
            safe_gap_mm: 5,
        }
    }
}

impl Template {
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_TEMPLATE_ID
    }

    /// Validate the template before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LayoutError::Config("Template id must not be empty".to_string()));
        }
        if self.safe_gap_mm == 0 {
            return Err(LayoutError::Config(format!(
                "Template '{}' needs a safe gap greater than 0mm",
                self.id
            )));
        }
        Ok(())
    }
}

/// Source of templates for a print operation.
///
/// `get` never fails: unknown ids resolve to the default template.
pub trait TemplateStore: Send + Sync {
    fn get(&self, id: &str) -> Template;
}

/// Template collection with optional JSON file persistence.
///
/// The default template is always present and cannot be deleted.
#[derive(Debug)]
pub struct TemplateLibrary {
    templates: RwLock<Vec<Template>>,
    path: Option<PathBuf>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::in_memory(Vec::new())
    }
}

impl TemplateLibrary {
    /// Library that is never written to disk
    pub fn in_memory(templates: Vec<Template>) -> Self {
        Self {
            templates: RwLock::new(with_default(templates)),
            path: None,
        }
    }

    /// Open the library stored at `path`.
    ///
    /// A missing or unreadable file yields a library holding only the default
    /// template, which is written back immediately.
    #[cfg(feature = "serde")]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let loaded = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<Template>>(&bytes) {
                Ok(templates) => templates,
                Err(e) => {
                    log::warn!("Ignoring unreadable templates file {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let needs_write = !loaded.iter().any(Template::is_default);
        let library = Self {
            templates: RwLock::new(with_default(loaded)),
            path: Some(path),
        };
        if needs_write {
            library.persist().await?;
        }
        Ok(library)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a template by exact id
    pub fn find(&self, id: &str) -> Option<Template> {
        self.read().iter().find(|t| t.id == id).cloned()
    }

    /// All templates, default first
    pub fn all(&self) -> Vec<Template> {
        self.read().clone()
    }

    /// Insert or replace a template
    pub async fn save(&self, template: Template) -> Result<()> {
        template.validate()?;
        {
            let mut templates = self.write();
            match templates.iter_mut().find(|t| t.id == template.id) {
                Some(existing) => *existing = template,
                None => templates.push(template),
            }
        }
        self.persist().await
    }

    /// Remove a template. Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if id == DEFAULT_TEMPLATE_ID {
            return Err(LayoutError::Config(
                "The default template cannot be deleted".to_string(),
            ));
        }
        let removed = {
            let mut templates = self.write();
            let before = templates.len();
            templates.retain(|t| t.id != id);
            templates.len() != before
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn persist(&self) -> Result<()> {
        #[cfg(feature = "serde")]
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&self.all())?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, json).await?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Template>> {
        self.templates.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Template>> {
        self.templates.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl TemplateStore for TemplateLibrary {
    fn get(&self, id: &str) -> Template {
        let templates = self.read();
        templates
            .iter()
            .find(|t| t.id == id)
            .or_else(|| templates.iter().find(|t| t.is_default()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Put the default template first, adding one if missing
fn with_default(mut templates: Vec<Template>) -> Vec<Template> {
    match templates.iter().position(Template::is_default) {
        Some(0) => {}
        Some(index) => {
            let default = templates.remove(index);
            templates.insert(0, default);
        }
        None => templates.insert(0, Template::default()),
    }
    templates
}
