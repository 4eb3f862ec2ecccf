// src/index.rs

//! Formula index: name lookup plus installed state
//!
//! The engine never consults global state to decide whether something is
//! installed; it asks the [`FormulaIndex`] it was handed. Two implementations
//! ship here:
//!
//! - [`Formulary`]: a directory of `<name>.toml` formulas with receipts in a
//!   SQLite database. This is what the CLI uses.
//! - [`MemoryIndex`]: everything in memory, for embedding and tests.

use crate::db::{self, Receipt};
use crate::error::{Error, Result};
use crate::formula::{Formula, parse_formula_file};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Capability object the engine resolves and records installs through
pub trait FormulaIndex: Send + Sync {
    /// Look up a formula by name; `Ok(None)` when the index has no such formula
    fn lookup(&self, name: &str) -> Result<Option<Arc<Formula>>>;

    /// Receipt of a completed install, if any
    fn receipt(&self, name: &str) -> Result<Option<Receipt>>;

    /// Record a completed install
    fn mark_installed(&self, receipt: &Receipt) -> Result<()>;

    /// Names of every formula the index knows, sorted
    fn names(&self) -> Result<Vec<String>>;

    fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.receipt(name)?.is_some())
    }
}

/// In-memory index
#[derive(Default)]
pub struct MemoryIndex {
    formulas: HashMap<String, Arc<Formula>>,
    receipts: Mutex<HashMap<String, Receipt>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a set of formulas
    pub fn with_formulas(formulas: impl IntoIterator<Item = Formula>) -> Self {
        let mut index = Self::new();
        for formula in formulas {
            index.insert(formula);
        }
        index
    }

    pub fn insert(&mut self, formula: Formula) {
        self.formulas.insert(formula.name.clone(), Arc::new(formula));
    }
}

impl FormulaIndex for MemoryIndex {
    fn lookup(&self, name: &str) -> Result<Option<Arc<Formula>>> {
        Ok(self.formulas.get(name).cloned())
    }

    fn receipt(&self, name: &str) -> Result<Option<Receipt>> {
        Ok(self.receipts.lock().get(name).cloned())
    }

    fn mark_installed(&self, receipt: &Receipt) -> Result<()> {
        self.receipts
            .lock()
            .insert(receipt.name.clone(), receipt.clone());
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.formulas.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Directory-backed index with persistent receipts
///
/// Formulas are read lazily from `<formula_dir>/<name>.toml` and kept for the
/// lifetime of the index, so a formula is immutable once loaded even if the
/// file changes underneath.
pub struct Formulary {
    formula_dir: PathBuf,
    loaded: RwLock<HashMap<String, Arc<Formula>>>,
    conn: Mutex<Connection>,
}

impl Formulary {
    /// Open a formula directory and its receipt database
    pub fn open(formula_dir: impl Into<PathBuf>, db_path: &Path) -> Result<Self> {
        let formula_dir = formula_dir.into();
        if !formula_dir.is_dir() {
            return Err(Error::Config(format!(
                "formula directory not found: {}",
                formula_dir.display()
            )));
        }

        let conn = db::open(db_path)?;
        Ok(Self {
            formula_dir,
            loaded: RwLock::new(HashMap::new()),
            conn: Mutex::new(conn),
        })
    }

    pub fn formula_dir(&self) -> &Path {
        &self.formula_dir
    }

    /// All receipts, ordered by name
    pub fn receipts(&self) -> Result<Vec<Receipt>> {
        Receipt::list_all(&self.conn.lock())
    }

    fn formula_path(&self, name: &str) -> Option<PathBuf> {
        // Names map straight onto file names, so refuse anything path-like
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.formula_dir.join(format!("{name}.toml")))
    }
}

impl FormulaIndex for Formulary {
    fn lookup(&self, name: &str) -> Result<Option<Arc<Formula>>> {
        if let Some(formula) = self.loaded.read().get(name) {
            return Ok(Some(Arc::clone(formula)));
        }

        let Some(path) = self.formula_path(name) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }

        debug!("Loading formula {} from {}", name, path.display());
        let formula = parse_formula_file(&path)?;
        if formula.name != name {
            return Err(Error::InvalidFormula {
                name: name.to_string(),
                reason: format!(
                    "{} declares name '{}'",
                    path.display(),
                    formula.name
                ),
            });
        }

        let mut loaded = self.loaded.write();
        let formula = loaded
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(formula));
        Ok(Some(Arc::clone(formula)))
    }

    fn receipt(&self, name: &str) -> Result<Option<Receipt>> {
        Receipt::find_by_name(&self.conn.lock(), name)
    }

    fn mark_installed(&self, receipt: &Receipt) -> Result<()> {
        receipt.upsert(&self.conn.lock())
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.formula_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
