//! Key construction for catalog, row and index entries.
//!
//! Every key written by the engine starts with the caller-supplied engine
//! prefix byte followed by a one-byte entry kind:
//!
//! | Kind | Entry                 | Remaining key                                        |
//! |------|-----------------------|------------------------------------------------------|
//! | `C`  | catalog database      | dbId                                                 |
//! | `T`  | catalog table         | dbId, tableId, pkColId                               |
//! | `L`  | catalog column        | dbId, tableId, colId, typeTag, nameLen, name         |
//! | `I`  | catalog index         | dbId, tableId, colId                                 |
//! | `R`  | row                   | dbId, tableId, orderedPkValue                        |
//! | `X`  | secondary-index entry | dbId, tableId, colId, orderedColValue, orderedPkValue|
//!
//! All integers are big-endian so lexicographic byte order matches numeric
//! order. Readers of the catalog ranges must ignore kind bytes they do not
//! recognize; those are reserved.

use strata_kv::Key;

use crate::error::{SqlError, SqlResult};
use crate::value::SqlType;

/// Kind byte of database catalog entries.
pub const KIND_DATABASE: u8 = b'C';
/// Kind byte of table catalog entries.
pub const KIND_TABLE: u8 = b'T';
/// Kind byte of column catalog entries.
pub const KIND_COLUMN: u8 = b'L';
/// Kind byte of index catalog entries.
pub const KIND_INDEX: u8 = b'I';
/// Kind byte of row entries.
pub const KIND_ROW: u8 = b'R';
/// Kind byte of secondary-index entries.
pub const KIND_INDEX_ENTRY: u8 = b'X';

fn header(prefix: u8, kind: u8, capacity: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + capacity);
    buf.push(prefix);
    buf.push(kind);
    buf
}

/// Key of a database catalog entry. The value holds the database name.
pub fn database_key(prefix: u8, db_id: u32) -> Key {
    let mut buf = header(prefix, KIND_DATABASE, 4);
    buf.extend_from_slice(&db_id.to_be_bytes());
    Key::from_vec(buf)
}

/// Key of a table catalog entry. The value holds the table name.
pub fn table_key(prefix: u8, db_id: u32, table_id: u32, pk_col_id: u32) -> Key {
    let mut buf = header(prefix, KIND_TABLE, 12);
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(&pk_col_id.to_be_bytes());
    Key::from_vec(buf)
}

/// Key of a column catalog entry. The column name travels in the key; the
/// value is empty.
pub fn column_key(
    prefix: u8,
    db_id: u32,
    table_id: u32,
    col_id: u32,
    ty: SqlType,
    name: &str,
) -> Key {
    let name_bytes = name.as_bytes();
    let mut buf = header(prefix, KIND_COLUMN, 17 + name_bytes.len());
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(&col_id.to_be_bytes());
    buf.push(ty.tag());
    buf.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(name_bytes);
    Key::from_vec(buf)
}

/// Key of an index catalog entry; the value is empty.
pub fn index_key(prefix: u8, db_id: u32, table_id: u32, col_id: u32) -> Key {
    let mut buf = header(prefix, KIND_INDEX, 12);
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(&col_id.to_be_bytes());
    Key::from_vec(buf)
}

/// Key of a row entry; `ordered_pk` is the order-preserving encoding of the
/// row's primary-key value. The value holds the row payload.
pub fn row_key(prefix: u8, db_id: u32, table_id: u32, ordered_pk: &[u8]) -> Key {
    let mut buf = header(prefix, KIND_ROW, 8 + ordered_pk.len());
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(ordered_pk);
    Key::from_vec(buf)
}

/// Key of a secondary-index entry; the value is empty.
pub fn index_entry_key(
    prefix: u8,
    db_id: u32,
    table_id: u32,
    col_id: u32,
    ordered_value: &[u8],
    ordered_pk: &[u8],
) -> Key {
    let mut buf = header(prefix, KIND_INDEX_ENTRY, 12 + ordered_value.len() + ordered_pk.len());
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(&col_id.to_be_bytes());
    buf.extend_from_slice(ordered_value);
    buf.extend_from_slice(ordered_pk);
    Key::from_vec(buf)
}

/// Half-open range covering one whole entry kind under the prefix.
pub fn kind_range(prefix: u8, kind: u8) -> (Key, Key) {
    let from = Key::from_vec(vec![prefix, kind]);
    let to = from.successor();
    (from, to)
}

/// Half-open range covering all rows of one table.
pub fn table_rows_range(prefix: u8, db_id: u32, table_id: u32) -> (Key, Key) {
    let from = row_key(prefix, db_id, table_id, &[]);
    let to = from.successor();
    (from, to)
}

/// Half-open range covering all entries of one secondary index.
pub fn index_entries_range(prefix: u8, db_id: u32, table_id: u32, col_id: u32) -> (Key, Key) {
    let from = index_key_prefix(prefix, db_id, table_id, col_id);
    let to = from.successor();
    (from, to)
}

fn index_key_prefix(prefix: u8, db_id: u32, table_id: u32, col_id: u32) -> Key {
    let mut buf = header(prefix, KIND_INDEX_ENTRY, 12);
    buf.extend_from_slice(&db_id.to_be_bytes());
    buf.extend_from_slice(&table_id.to_be_bytes());
    buf.extend_from_slice(&col_id.to_be_bytes());
    Key::from_vec(buf)
}

// ============================================================================
// Key parsing (catalog load and index scans)
// ============================================================================

fn read_u32(bytes: &[u8], offset: usize) -> SqlResult<u32> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SqlError::CorruptedCatalog("truncated catalog key".to_string()))?;
    Ok(u32::from_be_bytes(raw))
}

/// Parses a database catalog key into its database id.
pub fn parse_database_key(key: &[u8]) -> SqlResult<u32> {
    if key.len() != 6 {
        return Err(SqlError::CorruptedCatalog("malformed database key".to_string()));
    }
    read_u32(key, 2)
}

/// Parses a table catalog key into (dbId, tableId, pkColId).
pub fn parse_table_key(key: &[u8]) -> SqlResult<(u32, u32, u32)> {
    if key.len() != 14 {
        return Err(SqlError::CorruptedCatalog("malformed table key".to_string()));
    }
    Ok((read_u32(key, 2)?, read_u32(key, 6)?, read_u32(key, 10)?))
}

/// Parses a column catalog key into (dbId, tableId, colId, type, name).
pub fn parse_column_key(key: &[u8]) -> SqlResult<(u32, u32, u32, SqlType, String)> {
    if key.len() < 19 {
        return Err(SqlError::CorruptedCatalog("malformed column key".to_string()));
    }
    let db_id = read_u32(key, 2)?;
    let table_id = read_u32(key, 6)?;
    let col_id = read_u32(key, 10)?;
    let ty = SqlType::from_tag(key[14])
        .ok_or_else(|| SqlError::CorruptedCatalog(format!("unknown type tag {}", key[14])))?;
    let name_len = read_u32(key, 15)? as usize;
    let name_bytes = key
        .get(19..19 + name_len)
        .ok_or_else(|| SqlError::CorruptedCatalog("truncated column name".to_string()))?;
    if key.len() != 19 + name_len {
        return Err(SqlError::CorruptedCatalog("trailing bytes in column key".to_string()));
    }
    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| SqlError::CorruptedCatalog("column name is not UTF-8".to_string()))?
        .to_string();
    Ok((db_id, table_id, col_id, ty, name))
}

/// Parses an index catalog key into (dbId, tableId, colId).
pub fn parse_index_key(key: &[u8]) -> SqlResult<(u32, u32, u32)> {
    if key.len() != 14 {
        return Err(SqlError::CorruptedCatalog("malformed index key".to_string()));
    }
    Ok((read_u32(key, 2)?, read_u32(key, 6)?, read_u32(key, 10)?))
}

/// Splits an index-entry key suffix into its encoded column value and
/// encoded primary-key parts.
///
/// `suffix` is everything after the fixed 14-byte header of an `X` key; the
/// column type decides where the value ends and the primary key begins.
pub fn split_index_entry(ty: SqlType, suffix: &[u8]) -> SqlResult<(&[u8], &[u8])> {
    let value_len = match ty {
        SqlType::Integer | SqlType::Timestamp => 8,
        SqlType::Boolean => 1,
        SqlType::String | SqlType::Blob => {
            let raw: [u8; 4] = suffix
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .ok_or(SqlError::InvalidValue)?;
            4 + u32::from_be_bytes(raw) as usize
        }
    };
    if suffix.len() <= value_len {
        return Err(SqlError::InvalidValue);
    }
    Ok(suffix.split_at(value_len))
}

// ============================================================================
// Row payload
// ============================================================================

/// Encodes a row payload from `(columnId, payloadBytes)` pairs.
///
/// Entries are written in ascending column-id order as
/// `colId (u32) || len (u32) || bytes` triples.
pub fn encode_row_payload(mut columns: Vec<(u32, Vec<u8>)>) -> Vec<u8> {
    columns.sort_by_key(|(id, _)| *id);
    let total: usize = columns.iter().map(|(_, v)| 8 + v.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for (col_id, bytes) in columns {
        buf.extend_from_slice(&col_id.to_be_bytes());
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&bytes);
    }
    buf
}

/// Decodes a row payload into `(columnId, payloadBytes)` pairs.
pub fn decode_row_payload(payload: &[u8]) -> SqlResult<Vec<(u32, Vec<u8>)>> {
    let mut columns = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        if payload.len() - pos < 8 {
            return Err(SqlError::InvalidValue);
        }
        let col_id = u32::from_be_bytes(payload[pos..pos + 4].try_into().unwrap());
        let len = u32::from_be_bytes(payload[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        let bytes = payload.get(pos..pos + len).ok_or(SqlError::InvalidValue)?;
        pos += len;
        columns.push((col_id, bytes.to_vec()));
    }
    Ok(columns)
}

// ============================================================================
// Selectors
// ============================================================================

/// Encodes the fully qualified selector used as a row map key.
pub fn encode_selector(db: &str, table: &str, column: &str) -> String {
    format!("{db}.{table}.{column}")
}
