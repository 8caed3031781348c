//! Durable lease records.
//!
//! Only the `(id, ttl)` pair of a lease is persisted; expiry is recomputed on
//! promotion and item sets are rebuilt from the main key-value store. Records
//! live in their own bucket, keyed by the big-endian 8-byte lease ID so
//! ranged scans enumerate leases in ID order. Values use the field-tagged
//! varint wire format of the legacy records (field 1 = id, field 2 = ttl).

use prost::Message;
use strata_backend::Backend;

use crate::error::LeaseError;
use crate::lessor::LeaseId;

/// Bucket holding one record per live lease.
pub(crate) const LEASE_BUCKET: &[u8] = b"lease";

/// Wire representation of a persisted lease.
#[derive(Clone, PartialEq, Message)]
struct LeaseRecord {
    #[prost(int64, tag = "1")]
    id: i64,
    #[prost(int64, tag = "2")]
    ttl: i64,
}

/// Backend key for a lease ID.
pub(crate) fn id_key(id: LeaseId) -> [u8; 8] {
    id.0.to_be_bytes()
}

/// Writes the record for `id` under the batch-transaction lock.
pub(crate) fn persist(backend: &dyn Backend, id: LeaseId, ttl: i64) -> Result<(), LeaseError> {
    let record = LeaseRecord { id: id.0, ttl };
    let mut tx = backend.batch_tx();
    tx.put(LEASE_BUCKET, &id_key(id), &record.encode_to_vec())?;
    Ok(())
}

/// Deletes the record for `id` under the batch-transaction lock.
pub(crate) fn unpersist(backend: &dyn Backend, id: LeaseId) -> Result<(), LeaseError> {
    let mut tx = backend.batch_tx();
    tx.delete(LEASE_BUCKET, &id_key(id))?;
    Ok(())
}

/// Loads every persisted `(id, ttl)` pair, creating the bucket if absent.
///
/// # Panics
///
/// Panics if a stored value fails to decode: the store is corrupt, and
/// best-effort recovery here would mask data loss.
pub(crate) fn load_all(backend: &dyn Backend) -> Result<Vec<(LeaseId, i64)>, LeaseError> {
    let values = {
        let mut tx = backend.batch_tx();
        tx.create_bucket(LEASE_BUCKET)?;
        let (_, values) = tx.range(
            LEASE_BUCKET,
            &id_key(LeaseId(0)),
            &id_key(LeaseId(i64::MAX)),
            0,
        )?;
        values
    };

    // The values are owned copies, so decoding happens outside the lock.
    let mut records = Vec::with_capacity(values.len());
    for value in values {
        let record = LeaseRecord::decode(value.as_slice())
            .expect("failed to decode persisted lease record");
        records.push((LeaseId(record.id), record.ttl));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_backend::SqliteBackend;

    use super::*;

    #[test]
    fn test_wire_format_is_field_tagged_varints() {
        // field 1 (id) varint, field 2 (ttl) varint: the legacy layout.
        let record = LeaseRecord { id: 1, ttl: 10 };
        assert_eq!(record.encode_to_vec(), vec![0x08, 0x01, 0x10, 0x0a]);
    }

    #[test]
    fn test_zero_fields_encode_empty() {
        // Proto3 omits default-valued fields on the wire.
        let record = LeaseRecord { id: 0, ttl: 0 };
        assert!(record.encode_to_vec().is_empty());
    }

    #[test]
    fn test_persist_load_unpersist() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());

        persist(backend.as_ref(), LeaseId(7), 30).unwrap();
        persist(backend.as_ref(), LeaseId(3), 10).unwrap();

        // Scan order follows the big-endian keys, not insertion order.
        let records = load_all(backend.as_ref()).unwrap();
        assert_eq!(records, vec![(LeaseId(3), 10), (LeaseId(7), 30)]);

        unpersist(backend.as_ref(), LeaseId(3)).unwrap();
        let records = load_all(backend.as_ref()).unwrap();
        assert_eq!(records, vec![(LeaseId(7), 30)]);
    }

    #[test]
    fn test_load_all_creates_bucket_on_empty_store() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        assert!(load_all(backend.as_ref()).unwrap().is_empty());
    }
}
