//! # External Store Interfaces
//!
//! The tabular store (containers of headered tables) and the file store
//! (folders and files) are external collaborators; this module specifies them
//! at their interface boundary and provides in-memory implementations used by
//! tests and the stress driver.
//!
//! Handles are opaque strings minted by the store. A container's handle also
//! works as its file handle in the file store, mirroring hosts where a
//! spreadsheet is simultaneously a drive file.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{ContainerHandle, FolderHandle, Grid, Row};

// =============================================================================
// Traits
// =============================================================================

/// A spreadsheet-like store: named containers holding headered tables.
pub trait TabularStore: Send + Sync {
    /// Creates a container and returns its opaque handle.
    fn create_container(&self, name: &str) -> Result<ContainerHandle>;

    /// Verifies a handle still refers to a live container.
    fn open_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Moves a container to the trash.
    fn trash_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Renames a container; the handle stays valid.
    fn rename_container(&self, handle: &ContainerHandle, new_name: &str) -> Result<()>;

    /// Creates an empty, headerless table.
    fn create_table(&self, container: &ContainerHandle, table: &str) -> Result<()>;

    /// Renames a table within its container.
    fn rename_table(&self, container: &ContainerHandle, table: &str, new_name: &str)
        -> Result<()>;

    /// Writes the header row of a table.
    fn set_header(
        &self,
        container: &ContainerHandle,
        table: &str,
        columns: &[String],
    ) -> Result<()>;

    /// Appends rows (column-name → value maps) after the last data row.
    /// Cells are laid out in header order; columns a row does not mention are
    /// left blank.
    fn append_rows(&self, container: &ContainerHandle, table: &str, rows: &[Row]) -> Result<()>;

    /// Reads the whole table as a grid, header row first.
    fn read_all(&self, container: &ContainerHandle, table: &str) -> Result<Grid>;

    /// Number of data rows (excludes the header).
    fn data_row_count(&self, container: &ContainerHandle, table: &str) -> Result<usize>;

    /// Whether a table with this name exists in the container.
    fn table_exists(&self, container: &ContainerHandle, table: &str) -> Result<bool>;
}

/// A drive-like store: folders and files.
pub trait FileStore: Send + Sync {
    /// Creates a folder and returns its opaque handle.
    fn create_folder(&self, name: &str) -> Result<FolderHandle>;

    /// Creates a file from raw bytes, optionally inside a folder.
    fn create_file(&self, name: &str, bytes: &[u8], folder: Option<&FolderHandle>)
        -> Result<String>;

    /// Moves a file into a folder.
    fn move_file(&self, file_handle: &str, folder: &FolderHandle) -> Result<()>;

    /// Moves a file or folder to the trash.
    fn trash(&self, handle: &str) -> Result<()>;

    /// Renames a file or folder.
    fn rename(&self, handle: &str, new_name: &str) -> Result<()>;
}

// =============================================================================
// In-Memory Tabular Store
// =============================================================================

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    header: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Clone)]
struct MemoryContainer {
    name: String,
    tables: HashMap<String, MemoryTable>,
    trashed: bool,
}

#[derive(Default)]
struct TabularState {
    containers: HashMap<String, MemoryContainer>,
    next_id: u64,
    append_calls: u64,
}

/// In-memory [`TabularStore`].
///
/// Also counts `append_rows` invocations so tests can assert the "one batched
/// append per destination group" property.
#[derive(Default)]
pub struct MemoryTabular {
    state: Mutex<TabularState>,
}

impl MemoryTabular {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `append_rows` calls made against this store.
    pub fn append_calls(&self) -> u64 {
        self.lock().append_calls
    }

    /// The table's grid, for test assertions. Header row first.
    pub fn grid(&self, handle: &ContainerHandle, table: &str) -> Option<Grid> {
        let state = self.lock();
        let container = state.containers.get(handle.as_str())?;
        let table = container.tables.get(table)?;
        let mut grid = vec![table.header.iter().cloned().map(Into::into).collect()];
        grid.extend(table.rows.iter().cloned());
        Some(grid)
    }

    /// The current name of a container, trashed or not.
    pub fn container_name(&self, handle: &ContainerHandle) -> Option<String> {
        Some(self.lock().containers.get(handle.as_str())?.name.clone())
    }

    /// Number of live (non-trashed) containers.
    pub fn live_containers(&self) -> usize {
        self.lock()
            .containers
            .values()
            .filter(|c| !c.trashed)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TabularState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn missing_container(handle: &ContainerHandle) -> Error {
    Error::store(format!("no container with handle '{handle}'"))
}

fn missing_table(table: &str) -> Error {
    Error::store(format!("no table named '{table}'"))
}

impl TabularStore for MemoryTabular {
    fn create_container(&self, name: &str) -> Result<ContainerHandle> {
        let mut state = self.lock();
        state.next_id += 1;
        let handle = format!("container-{:04}", state.next_id);
        state.containers.insert(
            handle.clone(),
            MemoryContainer {
                name: name.to_string(),
                ..MemoryContainer::default()
            },
        );
        Ok(ContainerHandle::new(handle))
    }

    fn open_container(&self, handle: &ContainerHandle) -> Result<()> {
        let state = self.lock();
        match state.containers.get(handle.as_str()) {
            Some(c) if !c.trashed => Ok(()),
            _ => Err(missing_container(handle)),
        }
    }

    fn trash_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(handle.as_str())
            .ok_or_else(|| missing_container(handle))?;
        container.trashed = true;
        Ok(())
    }

    fn rename_container(&self, handle: &ContainerHandle, new_name: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(handle.as_str())
            .ok_or_else(|| missing_container(handle))?;
        container.name = new_name.to_string();
        Ok(())
    }

    fn create_table(&self, container: &ContainerHandle, table: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        container
            .tables
            .entry(table.to_string())
            .or_insert_with(MemoryTable::default);
        Ok(())
    }

    fn rename_table(
        &self,
        container: &ContainerHandle,
        table: &str,
        new_name: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        let entry = container
            .tables
            .remove(table)
            .ok_or_else(|| missing_table(table))?;
        container.tables.insert(new_name.to_string(), entry);
        Ok(())
    }

    fn set_header(
        &self,
        container: &ContainerHandle,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        let table = container
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(table))?;
        table.header = columns.to_vec();
        Ok(())
    }

    fn append_rows(&self, container: &ContainerHandle, table: &str, rows: &[Row]) -> Result<()> {
        let mut state = self.lock();
        state.append_calls += 1;
        let container = state
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        let table = container
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(table))?;
        for row in rows {
            let cells = table
                .header
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            table.rows.push(cells);
        }
        Ok(())
    }

    fn read_all(&self, container: &ContainerHandle, table: &str) -> Result<Grid> {
        let state = self.lock();
        let container = state
            .containers
            .get(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        let table = container.tables.get(table).ok_or_else(|| missing_table(table))?;
        let mut grid: Grid = vec![table.header.iter().cloned().map(Into::into).collect()];
        grid.extend(table.rows.iter().cloned());
        Ok(grid)
    }

    fn data_row_count(&self, container: &ContainerHandle, table: &str) -> Result<usize> {
        let state = self.lock();
        let container = state
            .containers
            .get(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        let table = container.tables.get(table).ok_or_else(|| missing_table(table))?;
        Ok(table.rows.len())
    }

    fn table_exists(&self, container: &ContainerHandle, table: &str) -> Result<bool> {
        let state = self.lock();
        let container = state
            .containers
            .get(container.as_str())
            .ok_or_else(|| missing_container(container))?;
        Ok(container.tables.contains_key(table))
    }
}

// =============================================================================
// In-Memory File Store
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    name: String,
    folder: Option<String>,
    trashed: bool,
}

#[derive(Default)]
struct DriveState {
    entries: HashMap<String, MemoryEntry>,
    next_id: u64,
}

/// In-memory [`FileStore`].
#[derive(Default)]
pub struct MemoryDrive {
    state: Mutex<DriveState>,
}

impl MemoryDrive {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The folder handle a file currently sits in, for test assertions.
    pub fn folder_of(&self, file_handle: &str) -> Option<String> {
        self.lock().entries.get(file_handle)?.folder.clone()
    }

    /// The current name of an entry, for test assertions.
    pub fn name_of(&self, handle: &str) -> Option<String> {
        Some(self.lock().entries.get(handle)?.name.clone())
    }

    /// Whether an entry has been trashed.
    pub fn is_trashed(&self, handle: &str) -> Option<bool> {
        Some(self.lock().entries.get(handle)?.trashed)
    }

    /// Registers an externally minted handle (e.g. a container handle from
    /// the tabular store) so it can be moved and trashed like a file.
    pub fn adopt(&self, handle: &str, name: &str) {
        self.lock().entries.insert(
            handle.to_string(),
            MemoryEntry {
                name: name.to_string(),
                folder: None,
                trashed: false,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileStore for MemoryDrive {
    fn create_folder(&self, name: &str) -> Result<FolderHandle> {
        let mut state = self.lock();
        state.next_id += 1;
        let handle = format!("folder-{:04}", state.next_id);
        state.entries.insert(
            handle.clone(),
            MemoryEntry {
                name: name.to_string(),
                folder: None,
                trashed: false,
            },
        );
        Ok(FolderHandle::new(handle))
    }

    fn create_file(
        &self,
        name: &str,
        _bytes: &[u8],
        folder: Option<&FolderHandle>,
    ) -> Result<String> {
        let mut state = self.lock();
        state.next_id += 1;
        let handle = format!("file-{:04}", state.next_id);
        state.entries.insert(
            handle.clone(),
            MemoryEntry {
                name: name.to_string(),
                folder: folder.map(|f| f.as_str().to_string()),
                trashed: false,
            },
        );
        Ok(handle)
    }

    fn move_file(&self, file_handle: &str, folder: &FolderHandle) -> Result<()> {
        let mut state = self.lock();
        // Files minted by another store (container handles) are adopted on
        // first move rather than rejected.
        let entry = state
            .entries
            .entry(file_handle.to_string())
            .or_insert_with(|| MemoryEntry {
                name: file_handle.to_string(),
                folder: None,
                trashed: false,
            });
        entry.folder = Some(folder.as_str().to_string());
        Ok(())
    }

    fn trash(&self, handle: &str) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(handle)
            .ok_or_else(|| Error::store(format!("no drive entry '{handle}'")))?;
        entry.trashed = true;
        Ok(())
    }

    fn rename(&self, handle: &str, new_name: &str) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(handle)
            .ok_or_else(|| Error::store(format!("no drive entry '{handle}'")))?;
        entry.name = new_name.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_lays_cells_out_in_header_order() {
        let store = MemoryTabular::new();
        let handle = store.create_container("data").unwrap();
        store.create_table(&handle, "rows").unwrap();
        store
            .set_header(&handle, "rows", &["a".to_string(), "b".to_string()])
            .unwrap();

        let mut row = Row::new();
        row.insert("b".to_string(), serde_json::json!(2));
        row.insert("a".to_string(), serde_json::json!(1));
        row.insert("ignored".to_string(), serde_json::json!(9));
        store.append_rows(&handle, "rows", &[row]).unwrap();

        let grid = store.read_all(&handle, "rows").unwrap();
        assert_eq!(grid[1], vec![serde_json::json!(1), serde_json::json!(2)]);
        assert_eq!(store.data_row_count(&handle, "rows").unwrap(), 1);
    }

    #[test]
    fn trashed_container_no_longer_opens() {
        let store = MemoryTabular::new();
        let handle = store.create_container("gone").unwrap();
        store.open_container(&handle).unwrap();
        store.trash_container(&handle).unwrap();
        assert!(store.open_container(&handle).is_err());
    }

    #[test]
    fn move_file_adopts_foreign_handles() {
        let drive = MemoryDrive::new();
        let folder = drive.create_folder("data").unwrap();
        drive.move_file("container-0001", &folder).unwrap();
        assert_eq!(
            drive.folder_of("container-0001"),
            Some(folder.as_str().to_string())
        );
    }
}
