//! File version repository.

use redb::ReadableTable;

use super::db::{get_record, DatabaseError, Reader};
use super::models::FileVersionRecord;
use super::tables::*;
use super::unit_of_work::Transaction;
use crate::state_machine::VersionStatus;

/// Get a version by its UUID
pub fn get<R: Reader>(r: &R, id: &str) -> Result<Option<FileVersionRecord>, DatabaseError> {
    let table = r.table(FILE_VERSIONS)?;
    get_record(&table, id)
}

/// Get the version of `file_id` numbered `version_num`
pub fn get_by_number<R: Reader>(
    r: &R,
    file_id: &str,
    version_num: u32,
) -> Result<Option<FileVersionRecord>, DatabaseError> {
    let id = {
        let numbers = r.table(FILE_VERSION_NUMBERS)?;
        let result = numbers
            .get((file_id, version_num))?
            .map(|v| v.value().to_string());
        result
    };

    match id {
        Some(id) => get(r, &id),
        None => Ok(None),
    }
}

/// All versions of a file, ordered by version number
pub fn list_by_file<R: Reader>(
    r: &R,
    file_id: &str,
) -> Result<Vec<FileVersionRecord>, DatabaseError> {
    let numbers = r.table(FILE_VERSION_NUMBERS)?;
    let versions = r.table(FILE_VERSIONS)?;

    let mut out = Vec::new();
    for entry in numbers.range((file_id, 0u32)..=(file_id, u32::MAX))? {
        let (_, id) = entry?;
        if let Some(version) = get_record(&versions, id.value())? {
            out.push(version);
        }
    }

    Ok(out)
}

/// Highest version number still stored for a file (0 when none)
pub fn latest_number<R: Reader>(r: &R, file_id: &str) -> Result<u32, DatabaseError> {
    let numbers = r.table(FILE_VERSION_NUMBERS)?;
    let last = numbers
        .range((file_id, 0u32)..=(file_id, u32::MAX))?
        .next_back()
        .transpose()?
        .map(|(k, _)| k.value().1);
    Ok(last.unwrap_or(0))
}

/// All versions currently in `status`
pub fn list_by_status<R: Reader>(
    r: &R,
    status: VersionStatus,
) -> Result<Vec<FileVersionRecord>, DatabaseError> {
    let index = r.table(VERSION_STATUS)?;
    let versions = r.table(FILE_VERSIONS)?;

    let mut out = Vec::new();
    for entry in index.range((status.as_str(), "")..)? {
        let (key, _) = entry?;
        let (entry_status, id) = key.value();
        if entry_status != status.as_str() {
            break;
        }
        if let Some(version) = get_record(&versions, id)? {
            out.push(version);
        }
    }

    Ok(out)
}

/// Whether `version_num` is already taken for `file_id`
pub fn number_taken<R: Reader>(
    r: &R,
    file_id: &str,
    version_num: u32,
) -> Result<bool, DatabaseError> {
    let numbers = r.table(FILE_VERSION_NUMBERS)?;
    let taken = numbers.get((file_id, version_num))?.is_some();
    Ok(taken)
}

/// Insert or update a version, maintaining the number and status indexes
pub fn save(tx: &Transaction, version: &FileVersionRecord) -> Result<(), DatabaseError> {
    debug_assert!(!version.id.is_empty(), "version id must not be empty");

    let previous: Option<FileVersionRecord> = {
        let table = tx.table(FILE_VERSIONS)?;
        get_record(&table, &version.id)?
    };

    {
        let mut table = tx.table(FILE_VERSIONS)?;
        let data = rmp_serde::to_vec_named(version)?;
        table.insert(version.id.as_str(), data.as_slice())?;
    }

    {
        let mut numbers = tx.table(FILE_VERSION_NUMBERS)?;
        numbers.insert(
            (version.file_id.as_str(), version.version_num),
            version.id.as_str(),
        )?;
    }

    let mut index = tx.table(VERSION_STATUS)?;
    if let Some(prev) = previous {
        if prev.status != version.status {
            index.remove((prev.status.as_str(), prev.id.as_str()))?;
        }
    }
    index.insert((version.status.as_str(), version.id.as_str()), ())?;

    Ok(())
}

/// Remove a version and its index entries
pub fn delete(tx: &Transaction, id: &str) -> Result<bool, DatabaseError> {
    let existing: Option<FileVersionRecord> = {
        let table = tx.table(FILE_VERSIONS)?;
        get_record(&table, id)?
    };

    let Some(version) = existing else {
        return Ok(false);
    };

    {
        let mut table = tx.table(FILE_VERSIONS)?;
        table.remove(id)?;
    }
    {
        let mut numbers = tx.table(FILE_VERSION_NUMBERS)?;
        numbers.remove((version.file_id.as_str(), version.version_num))?;
    }
    {
        let mut index = tx.table(VERSION_STATUS)?;
        index.remove((version.status.as_str(), id))?;
    }

    Ok(true)
}
