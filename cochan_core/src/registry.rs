use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::boundary::call_guarded;
use crate::config::Config;
use crate::coroutine::{Coroutine, CoroutineId, ExitHook};
use crate::entry::{EntryPoint, IntoEntryPoint};
use crate::error::{CoroutineError, Result};
use crate::status::Status;
use crate::value::Value;

/// Outcome of an [`Registry::async_resume`]. Nobody drains it but the caller:
/// if the receiver is dropped unobserved, the error is lost.
pub type ErrorSignal = oneshot::Receiver<Result<()>>;

#[derive(Debug)]
struct RegistryEntry {
    handle: Coroutine,
    // Body of a wrapped coroutine that has not been called yet.
    pending: Mutex<Option<EntryPoint>>,
}

type EntryMap = HashMap<CoroutineId, RegistryEntry>;

/// Token-based addressing on top of [`Coroutine`] handles.
///
/// Ids stay valid until the body finishes; then the entry is dropped and the
/// id reads as [`Status::Closed`]. Using an unknown id to drive a coroutine
/// is a programming error and panics.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<EntryMap>>,
    config: Config,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Registry {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Allocate a coroutine for `entry` without starting its task.
    pub fn wrap<M>(&self, entry: impl IntoEntryPoint<M>) -> CoroutineId {
        self.insert(entry.into_entry_point())
    }

    pub fn wrap_dyn(&self, entry: Box<dyn Any + Send>) -> Result<CoroutineId> {
        Ok(self.insert(EntryPoint::from_any(entry)?))
    }

    fn insert(&self, entry: EntryPoint) -> CoroutineId {
        let handle = Coroutine::allocate(self.config);
        let id = handle.id();
        self.entries.write().insert(
            id,
            RegistryEntry {
                handle,
                pending: Mutex::new(Some(entry)),
            },
        );
        log::debug!("coroutine {} wrapped", id);
        id
    }

    /// Start the body of a wrapped coroutine and run it to its first yield.
    /// `args` become the body's arguments.
    ///
    /// Calling an id that was already started just resumes it.
    ///
    /// # Panics
    ///
    /// If `id` is not registered.
    pub async fn call(&self, id: CoroutineId, args: Vec<Value>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current();
        let (handle, pending) = {
            let entries = self.entries.read();
            let entry = entries
                .get(&id)
                .unwrap_or_else(|| panic!("unknown coroutine id {}", id));
            let mut slot = entry.pending.lock();
            if slot.is_some() && runtime.is_err() {
                // Nothing can be spawned; the body stays for a later call.
                return Err(CoroutineError::NoRuntime);
            }
            let body = slot.take();
            (entry.handle.clone(), body)
        };

        if let (Some(body), Ok(runtime)) = (pending, &runtime) {
            handle.launch_on(runtime, body, Some(self.exit_hook()));
        }

        handle.resume(args).await.map(|_| ())
    }

    fn exit_hook(&self) -> ExitHook {
        let entries: Weak<RwLock<EntryMap>> = Arc::downgrade(&self.entries);
        Box::new(move |id| {
            if let Some(entries) = entries.upgrade() {
                entries.write().remove(&id);
                log::debug!("coroutine {} discarded", id);
            }
        })
    }

    /// # Panics
    ///
    /// If `id` is not registered.
    pub async fn resume(&self, id: CoroutineId, args: Vec<Value>) -> Result<Vec<Value>> {
        self.expect(id).resume(args).await
    }

    /// # Panics
    ///
    /// If `id` is not registered.
    pub async fn resume_with_timeout(
        &self,
        id: CoroutineId,
        timeout: Duration,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.expect(id).resume_with_timeout(timeout, args).await
    }

    /// Resume on a separate task and pass the output to `callback`.
    ///
    /// Errors from the resume, and panics inside `callback`, are reported on
    /// the returned signal only.
    ///
    /// # Panics
    ///
    /// If `id` is not registered.
    pub fn async_resume<F>(&self, id: CoroutineId, callback: F, args: Vec<Value>) -> ErrorSignal
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let handle = self.expect(id);
        let (tx, rx) = oneshot::channel();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                let _ = tx.send(Err(CoroutineError::NoRuntime));
                return rx;
            }
        };

        runtime.spawn(async move {
            let outcome = match handle.resume(args).await {
                Ok(output) => call_guarded(move || callback(output)),
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                log::debug!("async resume of coroutine {} failed: {}", id, err);
            }
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Resume only if the coroutine is parked in a yield right now.
    ///
    /// Returns `None` without touching the coroutine when it is in any other
    /// state or unknown, and also when the resume itself fails.
    pub async fn try_resume(&self, id: CoroutineId, args: Vec<Value>) -> Option<Vec<Value>> {
        let handle = self.get(id)?;
        if handle.status() != Status::Suspended {
            return None;
        }
        handle.resume(args).await.ok()
    }

    /// Status by id; unknown or discarded ids read as `Closed`.
    pub fn status(&self, id: CoroutineId) -> Status {
        self.get(id)
            .map(|handle| handle.status())
            .unwrap_or(Status::Closed)
    }

    pub fn get(&self, id: CoroutineId) -> Option<Coroutine> {
        self.entries.read().get(&id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, id: CoroutineId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<CoroutineId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn expect(&self, id: CoroutineId) -> Coroutine {
        self.get(id)
            .unwrap_or_else(|| panic!("unknown coroutine id {}", id))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
