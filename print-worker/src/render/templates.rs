//! Order document templates on disk, rendered with Handlebars.
//!
//! Templates are read from the templates directory on every render so edits
//! made through the dashboard take effect immediately.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use handlebars::Handlebars;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::is_bare_file_name;
use crate::render::helpers;

pub const DEFAULT_TEMPLATE_NAME: &str = "default_packing_slip.html";
pub const DEFAULT_TEMPLATE: &str = include_str!("default_packing_slip.html");

const TEMPLATE_EXTENSION: &str = ".html";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),

    #[error("invalid template name '{0}'")]
    InvalidName(String),

    #[error("template '{name}' failed to render: {source}")]
    Render {
        name: String,
        #[source]
        source: handlebars::RenderError,
    },

    #[error("template storage error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Renders order payloads against the templates in one directory.
pub struct TemplateRenderer {
    dir: PathBuf,
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Open the templates directory, creating it and the default packing
    /// slip when no templates exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| TemplateError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut registry = Handlebars::new();
        helpers::register(&mut registry);

        let renderer = Self { dir, registry };
        renderer.ensure_default_template()?;
        Ok(renderer)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the default template if the directory holds no templates.
    ///
    /// Returns whether a template was created.
    pub fn ensure_default_template(&self) -> Result<bool, TemplateError> {
        if !self.list()?.is_empty() {
            return Ok(false);
        }

        let path = self.dir.join(DEFAULT_TEMPLATE_NAME);
        fs::write(&path, DEFAULT_TEMPLATE).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "default_template_created");
        Ok(true)
    }

    /// Render `name` with `{ order, now }` as the context.
    pub fn render(&self, name: &str, order: &Value) -> Result<String, TemplateError> {
        let source = self.load(name)?;
        let context = json!({
            "order": order,
            "now": Local::now().to_rfc3339(),
        });

        let html = self
            .registry
            .render_template(&source, &context)
            .map_err(|source| TemplateError::Render {
                name: name.to_string(),
                source,
            })?;

        debug!(template = name, html_length = html.len(), "template_rendered");
        Ok(html)
    }

    /// Save a template, appending `.html` when missing. Returns the stored
    /// name.
    pub fn save(&self, name: &str, content: &str) -> Result<String, TemplateError> {
        let name = if name.ends_with(TEMPLATE_EXTENSION) {
            name.to_string()
        } else {
            format!("{}{}", name, TEMPLATE_EXTENSION)
        };
        let path = self.path_for(&name)?;

        fs::write(&path, content).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;

        info!(template = %name, length = content.len(), "template_saved");
        Ok(name)
    }

    /// Names of all `.html` templates, sorted.
    pub fn list(&self) -> Result<Vec<String>, TemplateError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| TemplateError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map_or(false, |t| t.is_file()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(TEMPLATE_EXTENSION))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<String, TemplateError> {
        let path = self.path_for(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TemplateError::NotFound(name.to_string()))
            }
            Err(source) => Err(TemplateError::Io { path, source }),
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, TemplateError> {
        if !is_bare_file_name(name) || name.contains('\\') {
            return Err(TemplateError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}
