use crate::core::config::{
    ConfigStore, PresetCatalog, DEFAULT_PRESET_NAME, FALLBACK_SYSTEM_MESSAGE,
};

/// Per-session view of a user's named system-message presets.
///
/// Mutations persist synchronously through the [`ConfigStore`] before the
/// in-memory copy is refreshed, so the catalog on disk never lags what a
/// session observes.
pub struct CatalogManager {
    username: String,
    entries: PresetCatalog,
}

impl CatalogManager {
    pub fn load_for_user(store: &ConfigStore, username: &str) -> Self {
        Self {
            username: username.to_string(),
            entries: store.catalog_for(username),
        }
    }

    pub fn entries(&self) -> &PresetCatalog {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// The `default` entry, falling back to the built-in system message
    /// for catalogs that lost theirs before the delete guard existed.
    pub fn default_text(&self) -> &str {
        self.get(DEFAULT_PRESET_NAME)
            .unwrap_or(FALLBACK_SYSTEM_MESSAGE)
    }

    /// Upsert a preset and persist it before returning. A user still
    /// riding on the shared catalog gets their own copy-on-write fork of
    /// it first, so the shared entries survive under their key.
    pub fn save(
        &mut self,
        store: &ConfigStore,
        name: &str,
        text: &str,
    ) -> Result<(), String> {
        let username = self.username.clone();
        let seed = self.entries.clone();
        let name_owned = name.to_string();
        let text_owned = text.to_string();
        let updated = store
            .mutate_catalogs(&self.username, move |catalogs| {
                catalogs
                    .entry(username)
                    .or_insert(seed)
                    .insert(name_owned, text_owned);
            })
            .map_err(|err| format!("Failed to save preset '{name}': {err}"))?;
        self.entries = updated;
        Ok(())
    }

    /// Delete a preset and persist the removal. The `default` entry is the
    /// seed for every new conversation and cannot be deleted.
    pub fn delete(&mut self, store: &ConfigStore, name: &str) -> Result<(), String> {
        if name == DEFAULT_PRESET_NAME {
            return Err(format!(
                "The '{DEFAULT_PRESET_NAME}' preset seeds new conversations and cannot be deleted"
            ));
        }
        if !self.entries.contains_key(name) {
            return Err(format!(
                "Preset '{}' not found. Available presets: {}",
                name,
                self.names().join(", ")
            ));
        }

        let username = self.username.clone();
        let seed = self.entries.clone();
        let name_owned = name.to_string();
        let updated = store
            .mutate_catalogs(&self.username, move |catalogs| {
                catalogs.entry(username).or_insert(seed).remove(&name_owned);
            })
            .map_err(|err| format!("Failed to delete preset '{name}': {err}"))?;
        self.entries = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::write_store;

    #[test]
    fn save_then_get_returns_the_text_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = write_store(&dir);
        let mut catalog = CatalogManager::load_for_user(&store, "alice");

        catalog
            .save(&store, "poet", "答案以五言絕句呈現。")
            .expect("save preset");
        assert_eq!(catalog.get("poet"), Some("答案以五言絕句呈現。"));

        // A fresh load from the store sees the persisted entry.
        let reloaded = CatalogManager::load_for_user(&store, "alice");
        assert_eq!(reloaded.get("poet"), Some("答案以五言絕句呈現。"));
    }

    #[test]
    fn delete_removes_from_memory_and_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = write_store(&dir);
        let mut catalog = CatalogManager::load_for_user(&store, "alice");

        catalog.delete(&store, "翻譯小幫手").expect("delete preset");
        assert!(catalog.get("翻譯小幫手").is_none());

        let reloaded = CatalogManager::load_for_user(&store, "alice");
        assert!(reloaded.get("翻譯小幫手").is_none());
    }

    #[test]
    fn the_default_preset_cannot_be_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = write_store(&dir);
        let mut catalog = CatalogManager::load_for_user(&store, "alice");

        let result = catalog.delete(&store, "default");
        assert!(result.is_err());
        assert_eq!(catalog.get("default"), Some("alice default"));
    }

    #[test]
    fn deleting_an_unknown_preset_reports_the_available_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = write_store(&dir);
        let mut catalog = CatalogManager::load_for_user(&store, "alice");

        let err = catalog.delete(&store, "missing").unwrap_err();
        assert!(err.contains("not found"));
        assert!(err.contains("default"));
    }

    #[test]
    fn saving_under_a_fallback_catalog_creates_the_users_own_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = write_store(&dir);
        // bob starts on the shared catalog.
        let mut catalog = CatalogManager::load_for_user(&store, "bob");
        assert_eq!(catalog.default_text(), "shared default");

        catalog.save(&store, "mine", "own entry").expect("save preset");
        assert_eq!(catalog.get("mine"), Some("own entry"));
        // The fork keeps the inherited entries under bob's own key.
        assert_eq!(catalog.get("default"), Some("shared default"));
        // The shared catalog is untouched.
        assert!(store.catalog_for("shared").get("mine").is_none());
    }
}
