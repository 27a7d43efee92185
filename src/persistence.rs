//! Saving and loading projects.
//!
//! A project is persisted as one JSON document holding the full [`ModelState`]. Whatever
//! is read back is reconciled against the current skeleton and recalculated before it is
//! handed out, so stored derived values are never trusted.

use crate::engine::recalculate;
use crate::error::Result;
use crate::model::FinancialModel;
use crate::schema::{ModelMeta, ModelState};
use crate::utils::{slugify, sort_years};
use chrono::{DateTime, Utc};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Project {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ModelState,
}

impl Project {
    pub fn new(name: impl Into<String>, model: &FinancialModel) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            updated_at: now,
            state: model.state().clone(),
        }
    }

    /// Replaces the stored state and bumps `updated_at`.
    pub fn update(&mut self, model: &FinancialModel) {
        self.state = model.state().clone();
        self.updated_at = Utc::now();
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.state.meta
    }

    pub fn into_model(self) -> Result<FinancialModel> {
        FinancialModel::from_state(self.state)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a stored project and brings its state up to date.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut project: Project = serde_json::from_str(json)?;
        project.state.meta.validate()?;
        project.state.meta.years = sort_years(&project.state.meta.years);
        project.state = recalculate(&project.state);
        Ok(project)
    }
}

pub trait ModelStore {
    fn save(&mut self, project: &Project) -> Result<()>;

    /// `Ok(None)` when no project with that name exists.
    fn load(&self, name: &str) -> Result<Option<Project>>;

    fn list(&self) -> Result<Vec<String>>;
}

/// One pretty-printed JSON file per project inside a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", slugify(name)))
    }
}

impl ModelStore for JsonFileStore {
    fn save(&mut self, project: &Project) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(&project.name);
        fs::write(&path, project.to_json()?)?;
        info!("Saved project '{}' to {}", project.name, path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Project>> {
        let path = self.path_for(name);
        if !path.exists() {
            debug!("No stored project at {}", path.display());
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let project = Project::from_json(&json)?;
        info!("Loaded project '{}' from {}", project.name, path.display());
        Ok(Some(project))
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let project: Project = serde_json::from_str(&fs::read_to_string(&path)?)?;
            names.push(project.name);
        }
        names.sort();
        Ok(names)
    }
}

/// Keeps serialized projects in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: BTreeMap<String, String>,
}

impl ModelStore for MemoryStore {
    fn save(&mut self, project: &Project) -> Result<()> {
        self.documents
            .insert(project.name.clone(), project.to_json()?);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Project>> {
        self.documents
            .get(name)
            .map(|json| Project::from_json(json))
            .transpose()
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.documents.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Row, StatementKind};
    use crate::skeleton::{GROSS_PROFIT, REVENUE, SGA};
    use crate::tree;

    fn model() -> FinancialModel {
        let mut model = FinancialModel::new(ModelMeta::new(
            "Persist Co",
            vec!["2023A".to_string(), "2024E".to_string()],
        ))
        .unwrap();
        model.update_row_value(StatementKind::IncomeStatement, REVENUE, "2023A", 250.0);
        model
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::default();
        let project = Project::new("Acme Plan", &model());
        store.save(&project).unwrap();

        let loaded = store.load("Acme Plan").unwrap().unwrap();
        assert_eq!(loaded, project);
        assert!(store.load("Other").unwrap().is_none());
        assert_eq!(store.list().unwrap(), vec!["Acme Plan".to_string()]);
    }

    #[test]
    fn test_loading_repairs_and_recalculates_stale_state() {
        let mut project = Project::new("Stale", &model());
        project.state.income_statement = tree::remove_subtree(&project.state.income_statement, SGA);
        project.state.income_statement =
            tree::map_subtree(&project.state.income_statement, GROSS_PROFIT, |r| {
                r.with_value("2023A", -1.0)
            });
        let json = project.to_json().unwrap();

        let loaded = Project::from_json(&json).unwrap();
        let rows = &loaded.state.income_statement;
        assert!(tree::contains(rows, SGA));
        assert_eq!(
            tree::find_row(rows, GROSS_PROFIT).and_then(|r: &Row| r.value("2023A")),
            Some(250.0)
        );
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("fmb-store-{}", std::process::id()));
        let mut store = JsonFileStore::new(&dir);
        let project = Project::new("File Plan", &model());
        store.save(&project).unwrap();

        assert!(dir.join("file_plan.json").exists());
        let loaded = store.load("File Plan").unwrap().unwrap();
        assert_eq!(loaded.state, project.state);
        assert_eq!(store.list().unwrap(), vec!["File Plan".to_string()]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
