// Stable per-installation device identifier, sent as the `DeviceId` header
// and in the hub URL.

use bds_config::KeyValueStore;
use bds_config::storage::DEVICE_ID;
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;

/// Read the persisted device id, generating and persisting a v4 UUID on
/// first use.
pub fn device_id(store: &dyn KeyValueStore) -> Result<String, CoreError> {
    if let Some(existing) = store.get(DEVICE_ID)?.filter(|id| !id.is_empty()) {
        return Ok(existing);
    }
    let generated = Uuid::new_v4().to_string();
    store.set(DEVICE_ID, &generated)?;
    debug!(device_id = %generated, "generated new device id");
    Ok(generated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bds_config::MemoryStore;

    #[test]
    fn device_id_is_generated_once() {
        let store = MemoryStore::new();
        let first = device_id(&store).unwrap();
        let second = device_id(&store).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn existing_id_is_kept() {
        let store = MemoryStore::new();
        store.set(DEVICE_ID, "legacy-fingerprint").unwrap();
        assert_eq!(device_id(&store).unwrap(), "legacy-fingerprint");
    }
}
