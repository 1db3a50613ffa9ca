//! File repository.

use redb::ReadableTable;

use super::db::{get_record, DatabaseError, Reader};
use super::models::FileRecord;
use super::tables::*;
use super::unit_of_work::Transaction;

/// Get a file by its UUID
pub fn get<R: Reader>(r: &R, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
    let table = r.table(FILES)?;
    get_record(&table, id)
}

/// Get all files owned by `owner_id`
pub fn list_by_owner<R: Reader>(r: &R, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
    let owner_table = r.table(OWNER_FILES)?;
    let files_table = r.table(FILES)?;

    let file_ids: Vec<String> = match owner_table.get(owner_id)? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => return Ok(Vec::new()),
    };

    let mut files = Vec::new();
    for file_id in file_ids {
        if let Some(file) = get_record(&files_table, &file_id)? {
            files.push(file);
        }
    }

    Ok(files)
}

/// Store a file record and maintain the owner index
pub fn save(tx: &Transaction, file: &FileRecord) -> Result<(), DatabaseError> {
    debug_assert!(!file.id.is_empty(), "file id must not be empty");

    {
        let mut table = tx.table(FILES)?;
        let data = rmp_serde::to_vec_named(file)?;
        table.insert(file.id.as_str(), data.as_slice())?;
    }

    let mut owner_table = tx.table(OWNER_FILES)?;
    let mut file_ids: Vec<String> = match owner_table.get(file.owner_id.as_str())? {
        Some(v) => rmp_serde::from_slice(v.value())?,
        None => Vec::new(),
    };

    if !file_ids.contains(&file.id) {
        file_ids.push(file.id.clone());
        let index_data = rmp_serde::to_vec_named(&file_ids)?;
        owner_table.insert(file.owner_id.as_str(), index_data.as_slice())?;
    }

    Ok(())
}

/// Delete a file record and clean up the owner index. Versions are not touched.
pub fn delete(tx: &Transaction, id: &str) -> Result<bool, DatabaseError> {
    let existing: Option<FileRecord> = {
        let table = tx.table(FILES)?;
        get_record(&table, id)?
    };

    let Some(file) = existing else {
        return Ok(false);
    };

    {
        let mut table = tx.table(FILES)?;
        table.remove(id)?;
    }

    let file_ids: Option<Vec<String>> = {
        let owner_table = tx.table(OWNER_FILES)?;
        let result = match owner_table.get(file.owner_id.as_str())? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        result
    };

    if let Some(mut ids) = file_ids {
        ids.retain(|fid| fid != id);
        let mut owner_table = tx.table(OWNER_FILES)?;
        if ids.is_empty() {
            owner_table.remove(file.owner_id.as_str())?;
        } else {
            let data = rmp_serde::to_vec_named(&ids)?;
            owner_table.insert(file.owner_id.as_str(), data.as_slice())?;
        }
    }

    Ok(true)
}
