use serde_json::Value;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

/// Application configuration handed to every middleware and handler.
///
/// Built once before the server starts and only read afterwards, so it is
/// shared between workers without locking. Holds named settings as JSON
/// values and typed state (database pools, template engines, ...) looked up
/// by type.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use trellis_web::Context;
///
/// struct Greeting(&'static str);
///
/// let context = Context::new()
///     .debug(true)
///     .setting("SITE_NAME", json!("Trellis"))
///     .with_state(Greeting("hello"));
///
/// assert!(context.is_debug());
/// assert_eq!(context.get_setting("SITE_NAME"), Some(&json!("Trellis")));
/// assert_eq!(context.state::<Greeting>().unwrap().0, "hello");
/// assert!(context.state::<String>().is_none());
/// ```
#[derive(Default, Clone)]
pub struct Context {
    debug: bool,
    settings: HashMap<String, Value>,
    state: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables debug mode: `404` and panic pages describe what went wrong.
    #[inline]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[inline]
    pub fn setting<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Stores a value by its type, replacing one of the same type.
    #[inline]
    pub fn with_state<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    #[inline(always)]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    #[inline]
    pub fn get_setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    #[inline]
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<&T> {
        let value = self.state.get(&TypeId::of::<T>())?;
        (**value).downcast_ref::<T>()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("debug", &self.debug)
            .field("settings", &self.settings)
            .field("state", &self.state.len())
            .finish()
    }
}
