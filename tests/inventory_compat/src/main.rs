fn main() {
    println!("Run `cargo test -p inventory-compat` to execute inventory compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use coldvault_inventory::{
        Inventory, InventoryError, InventoryStore, JsonFileStore, PersistentStore, SCHEMA_VERSION,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values.
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
    }

    /// Copies a fixture into a scratch directory and opens it as a store.
    fn fixture_store(name: &str) -> (tempfile::TempDir, JsonFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        fs::copy(fixtures_dir().join(name), &path).unwrap();
        (dir, JsonFileStore::new(path))
    }

    #[test]
    fn fixture_inventory_v1_roundtrip() {
        roundtrip_test::<Inventory>("inventory_v1.json");
    }

    #[test]
    fn fixture_inventory_v1_fields() {
        let inventory: Inventory = serde_json::from_value(load_fixture("inventory_v1.json")).unwrap();
        assert_eq!(inventory.version, 1);
        assert_eq!(inventory.items.len(), 2);

        let notes = &inventory.items[0];
        assert_eq!(notes.archive_id, "archive-notes");
        assert_eq!(notes.upload_date, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        assert!(notes.tree_hash.is_some());
        assert!(inventory.items[1].tree_hash.is_none());

        let job = &inventory.jobs[0];
        assert!(job.urgent);
        assert_eq!(
            job.last_status_check,
            Some(Utc.timestamp_millis_opt(1_700_007_200_000).unwrap())
        );
        assert!(inventory.jobs[1].last_status_check.is_none());
    }

    #[test]
    fn fixture_legacy_inventory_loads() {
        let (_dir, store) = fixture_store("legacy_inventory.json");
        let inventory = store.load().unwrap();

        assert_eq!(inventory.version, SCHEMA_VERSION);
        let item = &inventory.items[0];
        assert_eq!(item.name, "holiday-2015.tar");
        assert_eq!(item.size, 73_400_320);
        assert!(item.checksum.is_empty());
        assert!(item.tree_hash.is_none());

        let job = &inventory.jobs[0];
        assert_eq!(job.name, "holiday-2015.tar");
        assert_eq!(job.archive_id, item.archive_id);
        assert!(!job.urgent);
        assert_eq!(
            job.last_status_check,
            Some(Utc.timestamp_millis_opt(1_442_588_400_000).unwrap())
        );
    }

    #[test]
    fn fixture_legacy_inventory_is_rewritten_in_current_format() {
        let (_dir, store) = fixture_store("legacy_inventory.json");
        let mut registry = InventoryStore::open(store).unwrap();
        let job = registry.jobs()[0].clone();
        let at = Utc.timestamp_millis_opt(1_442_600_000_000).unwrap();
        registry.mark_job_checked_at(&job, at).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.backend().path()).unwrap()).unwrap();
        assert_eq!(written["version"], 1);
        assert!(written.get("awsKey").is_none());
        let job = &written["jobs"][0];
        assert_eq!(job["name"], "holiday-2015.tar");
        assert_eq!(job["lastStatusCheck"], 1_442_600_000_000_i64);
        assert!(job.get("fileName").is_none());
        assert!(job.get("lastStatus").is_none());
        assert!(written["items"][0].get("treeHash").is_none());
    }

    #[test]
    fn fixture_legacy_checksumless_items_never_dedup() {
        let (_dir, store) = fixture_store("legacy_inventory.json");
        let registry = InventoryStore::open(store).unwrap();
        assert!(registry.find_item_by_checksum("").is_none());
        assert!(registry.find_item_by_name("holiday-2015.tar").is_some());
    }

    #[test]
    fn fixture_future_version_is_rejected() {
        let (_dir, store) = fixture_store("future_version.json");
        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            InventoryError::UnsupportedVersion { found: 2, supported: 1 }
        ));
    }
}
