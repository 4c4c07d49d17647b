use crate::{PreferenceBackend, Result, StorageError};
use async_trait::async_trait;
use wasm_bindgen::{JsCast, JsValue};

/// Browser preference backend using LocalStorage or SessionStorage
pub struct LocalStorageBackend {
    use_session: bool,
}

impl LocalStorageBackend {
    /// Backend over LocalStorage
    pub fn local() -> Self {
        Self { use_session: false }
    }

    /// Backend over SessionStorage
    pub fn session() -> Self {
        Self { use_session: true }
    }

    fn get_storage(&self) -> Result<web_sys::Storage> {
        let window =
            web_sys::window().ok_or_else(|| StorageError::Unavailable("No window object".into()))?;

        let storage = if self.use_session {
            window.session_storage()
        } else {
            window.local_storage()
        };

        storage
            .map_err(|_| StorageError::Unavailable("Storage not available".into()))?
            .ok_or_else(|| StorageError::Unavailable("Storage not supported".into()))
    }
}

/// Browsers raise a `QuotaExceededError` DOMException when storage is full
fn classify(err: JsValue) -> StorageError {
    match err.dyn_ref::<web_sys::DomException>() {
        Some(dom) if dom.name() == "QuotaExceededError" => StorageError::QuotaExceeded(dom.message()),
        Some(dom) => StorageError::Unavailable(dom.message()),
        None => StorageError::Unavailable(format!("{err:?}")),
    }
}

#[async_trait]
impl PreferenceBackend for LocalStorageBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.get_storage()?.get_item(key).map_err(classify)
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.get_storage()?.set_item(key, &value).map_err(classify)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.get_storage()?.remove_item(key).map_err(classify)
    }
}
