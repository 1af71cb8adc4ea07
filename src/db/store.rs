//! Raw key-value slots: browser storage on the web, a map in tests.

use crate::error::StoreError;

/// One storage area holding string values.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(target_arch = "wasm32")]
pub use web::BrowserStore;

#[cfg(target_arch = "wasm32")]
mod web {
    use super::KeyValueStore;
    use crate::error::StoreError;
    use gloo_storage::{LocalStorage, SessionStorage, Storage};
    use wasm_bindgen::JsValue;
    use web_sys::window;

    /// `sessionStorage` or `localStorage`, accessed through `gloo-storage`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BrowserStore {
        Session,
        Local,
    }

    impl BrowserStore {
        /// Returns `None` when the area is missing or blocked (private modes,
        /// disabled cookies), so callers never touch a storage that throws.
        pub fn session() -> Option<Self> {
            window()?.session_storage().ok()??;
            Some(BrowserStore::Session)
        }

        pub fn local() -> Option<Self> {
            window()?.local_storage().ok()??;
            Some(BrowserStore::Local)
        }

        fn raw(&self) -> web_sys::Storage {
            match self {
                BrowserStore::Session => SessionStorage::raw(),
                BrowserStore::Local => LocalStorage::raw(),
            }
        }
    }

    fn js_error(err: JsValue) -> StoreError {
        let name = js_sys::Reflect::get(&err, &"name".into())
            .ok()
            .and_then(|value| value.as_string())
            .unwrap_or_default();
        let message = js_sys::Reflect::get(&err, &"message".into())
            .ok()
            .and_then(|value| value.as_string())
            .unwrap_or_else(|| format!("{err:?}"));
        if name == "QuotaExceededError" {
            StoreError::Quota(message)
        } else {
            StoreError::Unavailable(message)
        }
    }

    impl KeyValueStore for BrowserStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.raw().get_item(key).map_err(js_error)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.raw().set_item(key, value).map_err(js_error)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            match self {
                BrowserStore::Session => SessionStorage::delete(key),
                BrowserStore::Local => LocalStorage::delete(key),
            }
            Ok(())
        }
    }
}

/// In-memory store with optional write failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: std::cell::RefCell<std::collections::HashMap<String, String>>,
    fail_writes: std::cell::Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail with a quota error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn raw_insert(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Quota(format!("cannot write {key}")));
        }
        self.raw_insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}
