/// Umbra Engine - Singleton manager for the logger and render backends
///
/// This module provides global singleton management for the logger and the
/// named `RenderBackend` instances. It uses thread-safe static storage with
/// RwLock for safe concurrent access.

use std::sync::{OnceLock, RwLock, Arc, Mutex};
use std::time::SystemTime;
use rustc_hash::FxHashMap;
use crate::backend::RenderBackend;
use crate::error::{Result, Error};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Internal state structure holding all engine singletons
struct EngineState {
    /// Named render backends (one per output, usually just "main")
    backends: RwLock<FxHashMap<String, Arc<Mutex<RenderBackend>>>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            backends: RwLock::new(FxHashMap::default()),
        }
    }
}

// ===== PUBLIC API =====

/// Main engine singleton manager
///
/// # Example
///
/// ```ignore
/// use umbra_backend::umbra::{Engine, BackendConfig, RenderBackend};
///
/// Engine::initialize()?;
/// let backend = RenderBackend::new(device, BackendConfig::default(), caches)?;
/// Engine::create_backend("main", backend)?;
///
/// let main = Engine::backend("main")?;
/// main.lock().unwrap().end_frame()?;
///
/// Engine::shutdown();
/// # Ok::<(), umbra_backend::umbra::Error>(())
/// ```
pub struct Engine;

impl Engine {
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::engine_error!("umbra::Engine", "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::engine_error!("umbra::Engine", "Backend error: {}", msg);
            }
            _ => {
                crate::engine_error!("umbra::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get().ok_or_else(|| Self::log_and_return_error(
            Error::InitializationFailed("Engine not initialized. Call Engine::initialize() first.".to_string())
        ))
    }

    /// Initialize the engine
    ///
    /// Idempotent. Must be called before registering any backend.
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Shutdown the engine and destroy every registered backend
    ///
    /// Each backend's stages are shut down before the backend is released.
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut backends) = state.backends.write() {
                for (name, backend) in backends.drain() {
                    if let Ok(mut backend) = backend.lock() {
                        backend.shutdown();
                    }
                    crate::engine_debug!("umbra::Engine", "Backend '{}' released", name);
                }
            }
        }
    }

    // ===== RENDER BACKEND API =====

    /// Register a render backend under `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized or a backend with the
    /// same name already exists.
    pub fn create_backend(name: &str, backend: RenderBackend) -> Result<Arc<Mutex<RenderBackend>>> {
        let state = Self::state()?;

        let mut lock = state.backends.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Backend registry lock poisoned".to_string())
            ))?;

        if lock.contains_key(name) {
            return Err(Self::log_and_return_error(
                Error::InitializationFailed(format!(
                    "Backend '{}' already exists. Call Engine::destroy_backend() first.", name
                ))
            ));
        }

        let backend = Arc::new(Mutex::new(backend));
        lock.insert(name.to_string(), Arc::clone(&backend));

        crate::engine_info!("umbra::Engine", "Backend '{}' created successfully", name);

        Ok(backend)
    }

    /// Get a registered render backend by name
    pub fn backend(name: &str) -> Result<Arc<Mutex<RenderBackend>>> {
        let state = Self::state()?;

        let lock = state.backends.read()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Backend registry lock poisoned".to_string())
            ))?;

        lock.get(name).cloned()
            .ok_or_else(|| Self::log_and_return_error(
                Error::InitializationFailed(format!(
                    "Backend '{}' not created. Call Engine::create_backend() first.", name
                ))
            ))
    }

    /// Destroy a registered render backend
    ///
    /// Existing `Arc` handles keep the backend alive until dropped; its stages
    /// are shut down immediately.
    pub fn destroy_backend(name: &str) -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.backends.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Backend registry lock poisoned".to_string())
            ))?;

        match lock.remove(name) {
            Some(backend) => {
                if let Ok(mut backend) = backend.lock() {
                    backend.shutdown();
                }
                crate::engine_info!("umbra::Engine", "Backend '{}' destroyed", name);
                Ok(())
            }
            None => Err(Self::log_and_return_error(
                Error::InvalidResource(format!("Backend '{}' does not exist", name))
            )),
        }
    }

    /// Number of registered backends
    pub fn backend_count() -> usize {
        ENGINE_STATE.get()
            .and_then(|state| state.backends.read().ok().map(|lock| lock.len()))
            .unwrap_or(0)
    }

    /// Names of all registered backends
    pub fn backend_names() -> Vec<String> {
        ENGINE_STATE.get()
            .and_then(|state| state.backends.read().ok()
                .map(|lock| lock.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Reset all singletons for testing (only available in test builds)
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut backends) = state.backends.write() {
                backends.clear();
            }
        }
    }

    // ===== LOGGING API =====

    /// Replace the logger
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(mut lock) = logger_lock.write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(mut lock) = logger_lock.write() {
            *lock = Box::new(DefaultLogger);
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like engine_info!, engine_warn!, etc.
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(lock) = logger_lock.read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information
    ///
    /// Used by engine_error!, engine_err! and the bail macros.
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(lock) = logger_lock.read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
