use redb::TableDefinition;

/// File records: uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Owner index: owner_id -> msgpack Vec of file UUIDs
pub const OWNER_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_files");

/// Version records: uuid -> FileVersionRecord (msgpack)
pub const FILE_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("file_versions");

/// Version number uniqueness: (file_id, version_num) -> version uuid
pub const FILE_VERSION_NUMBERS: TableDefinition<(&str, u32), &str> =
    TableDefinition::new("file_version_numbers");

/// Status index: (status, version uuid) -> ()
pub const VERSION_STATUS: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("version_status");

/// Outbox events: uuid -> EventRecord (msgpack)
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// FIFO index of unsent, unparked events: (created_at micros, event uuid) -> ()
pub const PENDING_EVENTS: TableDefinition<(i64, &str), ()> =
    TableDefinition::new("pending_events");

/// Parked events (retries exhausted): event uuid -> parked_at micros
pub const PARKED_EVENTS: TableDefinition<&str, i64> = TableDefinition::new("parked_events");
