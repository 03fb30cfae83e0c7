//! # Handle Cache with Column Indexing
//!
//! External container and folder creation is the expensive part of every
//! write path: the backing stores are slow and rate-limited, and the only way
//! to find a container by name without a cache is to enumerate. This module
//! memoizes logical-name → opaque-handle mappings and persists them in the
//! key-value store, one serialized JSON blob per cache domain:
//!
//! - `sheet_cache` — container name → handle, plus per-(handle, table)
//!   column indexes.
//! - `drive_cache` — folder name → handle.
//!
//! ## Transaction Shape
//!
//! Each operation loads its domain blob once, works in memory, and commits
//! once at the end. An external creation failure propagates *before* the
//! commit, so no partial cache state is ever persisted for a failed creation.
//!
//! ## Column Indexes
//!
//! A repeated lookup like "find the row where column `dni` equals X" costs a
//! full table scan every time. [`HandleCache::build_column_index`] scans once
//! and stores a value → row-number map; [`HandleCache::find_by_column_value`]
//! uses it when present and falls back to the scan when not. Indexes are
//! built lazily and invalidated only by [`HandleCache::clear`] — rows
//! appended after an index was built are invisible to it until the next
//! rebuild. Callers that append and then look up must rebuild in between.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::kv::PersistentKv;
use crate::store::{FileStore, TabularStore};
use crate::types::{ContainerHandle, FolderHandle, Row};

/// Key of the container/index cache domain.
pub const SHEET_CACHE_KEY: &str = "sheet_cache";

/// Key of the folder cache domain.
pub const DRIVE_CACHE_KEY: &str = "drive_cache";

// =============================================================================
// Persisted State
// =============================================================================

/// A precomputed lookup structure for one (container, table) pair.
///
/// `kind` records what the index maps; the one built-in kind is
/// `column:<position>`, whose `data` maps a cell value (stringified) to the
/// 1-based grid row number it was found in (header = row 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// What this index maps, e.g. `column:0`.
    pub kind: String,
    /// Cell value → 1-based grid row number.
    pub data: HashMap<String, usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SheetCacheState {
    /// Logical container name → external handle.
    containers: HashMap<String, ContainerHandle>,
    /// Container handle → table name → index.
    indexes: HashMap<String, HashMap<String, IndexEntry>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DriveCacheState {
    /// Logical folder name → external handle.
    folders: HashMap<String, FolderHandle>,
}

// =============================================================================
// HandleCache
// =============================================================================

/// Memoized name → handle mapping over the external stores.
#[derive(Clone)]
pub struct HandleCache {
    kv: Arc<dyn PersistentKv>,
    tabular: Arc<dyn TabularStore>,
    files: Arc<dyn FileStore>,
}

impl HandleCache {
    /// Creates a cache over the shared key-value store and external stores.
    pub fn new(
        kv: Arc<dyn PersistentKv>,
        tabular: Arc<dyn TabularStore>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self { kv, tabular, files }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Returns the handle for `name`, creating the container externally on a
    /// cache miss. With `parent_folder` set, a newly created container is
    /// moved into that folder (which is itself resolved or created).
    ///
    /// Nothing is committed to the cache until every external call has
    /// succeeded.
    pub fn resolve_or_create_container(
        &self,
        name: &str,
        parent_folder: Option<&str>,
    ) -> Result<ContainerHandle> {
        let mut state = self.load_sheet()?;
        if let Some(handle) = state.containers.get(name) {
            return Ok(handle.clone());
        }

        let handle = self.tabular.create_container(name)?;
        if let Some(folder_name) = parent_folder {
            let folder = self.resolve_or_create_folder(folder_name)?;
            self.files.move_file(handle.as_str(), &folder)?;
        }

        debug!(name, handle = %handle, "container created");
        state.containers.insert(name.to_string(), handle.clone());
        self.commit_sheet(&state)?;
        Ok(handle)
    }

    /// Cached handle for `name`, if any. Never calls the external store.
    pub fn container_handle(&self, name: &str) -> Result<Option<ContainerHandle>> {
        Ok(self.load_sheet()?.containers.get(name).cloned())
    }

    /// Every cached container name, sorted.
    pub fn container_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.load_sheet()?.containers.into_keys().collect();
        names.sort();
        Ok(names)
    }

    /// Moves the cache mapping from `old_name` to `new_name` and renames the
    /// container externally. The handle identity is unchanged, so indexes
    /// keyed by it survive the rename.
    pub fn rename_container(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut state = self.load_sheet()?;
        let handle = state
            .containers
            .remove(old_name)
            .ok_or_else(|| Error::ContainerNotFound {
                name: old_name.to_string(),
            })?;
        self.tabular.rename_container(&handle, new_name)?;
        state.containers.insert(new_name.to_string(), handle);
        self.commit_sheet(&state)
    }

    /// Trashes the container externally and drops its mapping and indexes.
    pub fn trash_container(&self, name: &str) -> Result<()> {
        let mut state = self.load_sheet()?;
        let handle = state
            .containers
            .remove(name)
            .ok_or_else(|| Error::ContainerNotFound {
                name: name.to_string(),
            })?;
        self.tabular.trash_container(&handle)?;
        state.indexes.remove(handle.as_str());
        self.commit_sheet(&state)
    }

    // =========================================================================
    // Folders
    // =========================================================================

    /// Returns the handle for a folder name, creating the folder externally
    /// on a cache miss.
    pub fn resolve_or_create_folder(&self, name: &str) -> Result<FolderHandle> {
        let mut state = self.load_drive()?;
        if let Some(handle) = state.folders.get(name) {
            return Ok(handle.clone());
        }
        let handle = self.files.create_folder(name)?;
        debug!(name, handle = %handle, "folder created");
        state.folders.insert(name.to_string(), handle.clone());
        self.commit_drive(&state)?;
        Ok(handle)
    }

    /// Cached folder handle, if any.
    pub fn folder_handle(&self, name: &str) -> Result<Option<FolderHandle>> {
        Ok(self.load_drive()?.folders.get(name).cloned())
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Ensures `table` exists in the named container with `columns` as its
    /// header row.
    ///
    /// - Absent table: created with the header.
    /// - Present with a matching header: no-op.
    /// - Present, empty, different header: header is written.
    /// - Present with data rows and no matching header: rejected with
    ///   [`Error::TableNotEmpty`]. Creation never overwrites existing data.
    pub fn resolve_or_create_table(
        &self,
        container_name: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let handle = self.require_container(container_name)?;

        if !self.tabular.table_exists(&handle, table)? {
            self.tabular.create_table(&handle, table)?;
            self.tabular.set_header(&handle, table, columns)?;
            debug!(container = container_name, table, "table created");
            return Ok(());
        }

        let grid = self.tabular.read_all(&handle, table)?;
        let header_matches = grid
            .first()
            .map(|header| {
                header.len() == columns.len()
                    && header
                        .iter()
                        .zip(columns)
                        .all(|(cell, column)| cell_key(cell) == *column)
            })
            .unwrap_or(false);
        if header_matches {
            return Ok(());
        }
        if self.tabular.data_row_count(&handle, table)? > 0 {
            return Err(Error::TableNotEmpty {
                container: container_name.to_string(),
                table: table.to_string(),
            });
        }
        self.tabular.set_header(&handle, table, columns)
    }

    /// Appends rows to a table through the cached handle.
    pub fn append_rows(&self, container_name: &str, table: &str, rows: &[Row]) -> Result<()> {
        let handle = self.require_container(container_name)?;
        self.tabular.append_rows(&handle, table, rows)
    }

    // =========================================================================
    // Column Indexes
    // =========================================================================

    /// Scans the table once and stores a value → row-number map for the
    /// column at `column_pos` (0-based within the header).
    pub fn build_column_index(
        &self,
        container_name: &str,
        table: &str,
        column_pos: usize,
    ) -> Result<()> {
        let mut state = self.load_sheet()?;
        let handle = state
            .containers
            .get(container_name)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound {
                name: container_name.to_string(),
            })?;
        let grid = self.read_table(container_name, &handle, table)?;

        let mut data = HashMap::new();
        // Grid rows are 1-based with the header at row 1; data starts at 2.
        for (offset, row) in grid.iter().skip(1).enumerate() {
            if let Some(cell) = row.get(column_pos) {
                data.entry(cell_key(cell)).or_insert(offset + 2);
            }
        }

        let entry = IndexEntry {
            kind: format!("column:{column_pos}"),
            data,
        };
        state
            .indexes
            .entry(handle.as_str().to_string())
            .or_default()
            .insert(table.to_string(), entry);
        self.commit_sheet(&state)
    }

    /// Finds the first row whose `column_name` cell equals `value`.
    ///
    /// Uses the stored index when one exists for that column (assumed fresh;
    /// staleness is the caller's problem until the next rebuild or clear),
    /// otherwise falls back to a full scan. The row comes back as a
    /// column-name → value map.
    pub fn find_by_column_value(
        &self,
        container_name: &str,
        table: &str,
        column_name: &str,
        value: &serde_json::Value,
    ) -> Result<Option<Row>> {
        let state = self.load_sheet()?;
        let handle = state
            .containers
            .get(container_name)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound {
                name: container_name.to_string(),
            })?;
        let grid = self.read_table(container_name, &handle, table)?;

        let header = match grid.first() {
            Some(header) => header,
            None => return Ok(None),
        };
        let column_pos = match header.iter().position(|cell| cell_key(cell) == column_name) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let index = state
            .indexes
            .get(handle.as_str())
            .and_then(|tables| tables.get(table))
            .filter(|entry| entry.kind == format!("column:{column_pos}"));

        let row_pos = match index {
            Some(entry) => match entry.data.get(&cell_key(value)) {
                Some(&row_number) => Some(row_number - 1),
                None => None,
            },
            None => grid
                .iter()
                .skip(1)
                .position(|row| {
                    row.get(column_pos)
                        .map(|cell| cell_key(cell) == cell_key(value))
                        .unwrap_or(false)
                })
                .map(|offset| offset + 1),
        };

        Ok(row_pos.and_then(|pos| grid.get(pos)).map(|cells| {
            header
                .iter()
                .zip(cells)
                .map(|(column, cell)| (cell_key(column), cell.clone()))
                .collect()
        }))
    }

    // =========================================================================
    // Clear
    // =========================================================================

    /// Wipes both cache domains unconditionally: names, handles, and indexes.
    /// The external containers and folders themselves are untouched.
    pub fn clear(&self) -> Result<()> {
        self.kv.delete(SHEET_CACHE_KEY)?;
        self.kv.delete(DRIVE_CACHE_KEY)?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn require_container(&self, name: &str) -> Result<ContainerHandle> {
        self.container_handle(name)?
            .ok_or_else(|| Error::ContainerNotFound {
                name: name.to_string(),
            })
    }

    fn read_table(
        &self,
        container_name: &str,
        handle: &ContainerHandle,
        table: &str,
    ) -> Result<crate::types::Grid> {
        if !self.tabular.table_exists(handle, table)? {
            return Err(Error::TableNotFound {
                container: container_name.to_string(),
                table: table.to_string(),
            });
        }
        self.tabular.read_all(handle, table)
    }

    fn load_sheet(&self) -> Result<SheetCacheState> {
        match self.kv.get(SHEET_CACHE_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SheetCacheState::default()),
        }
    }

    fn commit_sheet(&self, state: &SheetCacheState) -> Result<()> {
        self.kv.set(SHEET_CACHE_KEY, &serde_json::to_string(state)?)
    }

    fn load_drive(&self) -> Result<DriveCacheState> {
        match self.kv.get(DRIVE_CACHE_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(DriveCacheState::default()),
        }
    }

    fn commit_drive(&self, state: &DriveCacheState) -> Result<()> {
        self.kv.set(DRIVE_CACHE_KEY, &serde_json::to_string(state)?)
    }
}

/// Canonical string form of a cell value for index keys and comparisons.
///
/// Strings compare by their contents (no surrounding quotes); everything else
/// by its JSON rendering. `"42"` and `42` are therefore equal as index keys,
/// matching how the spreadsheet-like hosts render cells.
fn cell_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
