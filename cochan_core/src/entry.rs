//! Entry-point normalization.
//!
//! A coroutine body can be written in six shapes. All of them are folded into
//! the canonical [`EntryPoint`]: `(Coroutine, Vec<Value>) -> anyhow::Result<()>`
//! returning a `Send + 'static` future.
//!
//! Rust closures are checked at compile time through [`IntoEntryPoint`].
//! Callers that only hold a type-erased callable (plugin tables, registries
//! fed from configuration) go through [`EntryPoint::from_any`], which checks
//! the shape at run time and rejects anything else with
//! [`CoroutineError::InvalidFunction`].

use std::any::Any;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::coroutine::Coroutine;
use crate::error::{CoroutineError, Result};
use crate::value::Value;

pub type BodyFuture = BoxFuture<'static, anyhow::Result<()>>;

// Boxed shapes accepted by `EntryPoint::from_any`.
pub type BoxedBody = Box<dyn FnOnce(Coroutine, Vec<Value>) -> BodyFuture + Send>;
pub type BoxedBodyUnit = Box<dyn FnOnce(Coroutine, Vec<Value>) -> BoxFuture<'static, ()> + Send>;
pub type BoxedHandleBody = Box<dyn FnOnce(Coroutine) -> BodyFuture + Send>;
pub type BoxedHandleBodyUnit = Box<dyn FnOnce(Coroutine) -> BoxFuture<'static, ()> + Send>;
pub type BoxedThunk = Box<dyn FnOnce() -> BodyFuture + Send>;
pub type BoxedThunkUnit = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A normalized coroutine body. Invoked exactly once.
pub struct EntryPoint {
    body: BoxedBody,
}

impl EntryPoint {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Coroutine, Vec<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        EntryPoint {
            body: Box::new(move |co, args| f(co, args).boxed()),
        }
    }

    /// Normalize a type-erased callable.
    ///
    /// The box must hold one of [`BoxedBody`], [`BoxedBodyUnit`],
    /// [`BoxedHandleBody`], [`BoxedHandleBodyUnit`], [`BoxedThunk`] or
    /// [`BoxedThunkUnit`].
    pub fn from_any(callable: Box<dyn Any + Send>) -> Result<Self> {
        let callable = match callable.downcast::<BoxedBody>() {
            Ok(f) => return Ok(EntryPoint { body: *f }),
            Err(other) => other,
        };
        let callable = match callable.downcast::<BoxedBodyUnit>() {
            Ok(f) => return Ok(EntryPoint::new(move |co, args| f(co, args).map(Ok))),
            Err(other) => other,
        };
        let callable = match callable.downcast::<BoxedHandleBody>() {
            Ok(f) => return Ok(EntryPoint::new(move |co, _| f(co))),
            Err(other) => other,
        };
        let callable = match callable.downcast::<BoxedHandleBodyUnit>() {
            Ok(f) => return Ok(EntryPoint::new(move |co, _| f(co).map(Ok))),
            Err(other) => other,
        };
        let callable = match callable.downcast::<BoxedThunk>() {
            Ok(f) => return Ok(EntryPoint::new(move |_, _| f())),
            Err(other) => other,
        };
        match callable.downcast::<BoxedThunkUnit>() {
            Ok(f) => Ok(EntryPoint::new(move |_, _| f().map(Ok))),
            Err(other) => Err(CoroutineError::InvalidFunction(format!(
                "unsupported entry point shape ({:?})",
                (*other).type_id()
            ))),
        }
    }

    pub(crate) fn call(self, co: Coroutine, args: Vec<Value>) -> BodyFuture {
        (self.body)(co, args)
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EntryPoint")
    }
}

/// Anything that can become a coroutine body.
///
/// `Marker` only disambiguates the blanket impls; it is always inferred.
/// Closure parameters have to be annotated so the shape is known:
///
/// ```
/// use cochan_core::{Coroutine, Value};
///
/// # #[tokio::main] async fn main() {
/// let co = Coroutine::create(|co: Coroutine, args: Vec<Value>| async move {
///     co.yield_(args).await?;
///     anyhow::Ok(())
/// })
/// .unwrap();
/// # drop(co); }
/// ```
pub trait IntoEntryPoint<Marker>: Send + 'static {
    fn into_entry_point(self) -> EntryPoint;
}

impl IntoEntryPoint<EntryPoint> for EntryPoint {
    fn into_entry_point(self) -> EntryPoint {
        self
    }
}

impl<F, Fut> IntoEntryPoint<fn(Coroutine, Vec<Value>) -> anyhow::Result<()>> for F
where
    F: FnOnce(Coroutine, Vec<Value>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(self)
    }
}

impl<F, Fut> IntoEntryPoint<fn(Coroutine, Vec<Value>)> for F
where
    F: FnOnce(Coroutine, Vec<Value>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(move |co, args| self(co, args).map(Ok))
    }
}

impl<F, Fut> IntoEntryPoint<fn(Coroutine) -> anyhow::Result<()>> for F
where
    F: FnOnce(Coroutine) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(move |co, _| self(co))
    }
}

impl<F, Fut> IntoEntryPoint<fn(Coroutine)> for F
where
    F: FnOnce(Coroutine) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(move |co, _| self(co).map(Ok))
    }
}

impl<F, Fut> IntoEntryPoint<fn() -> anyhow::Result<()>> for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(move |_, _| self())
    }
}

impl<F, Fut> IntoEntryPoint<fn()> for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_entry_point(self) -> EntryPoint {
        EntryPoint::new(move |_, _| self().map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_any_accepts_boxed_shapes() {
        let body: BoxedBody = Box::new(|_co, _args| async { anyhow::Ok(()) }.boxed());
        assert!(EntryPoint::from_any(Box::new(body)).is_ok());

        let handle_unit: BoxedHandleBodyUnit = Box::new(|_co| async {}.boxed());
        assert!(EntryPoint::from_any(Box::new(handle_unit)).is_ok());

        let thunk: BoxedThunk = Box::new(|| async { anyhow::Ok(()) }.boxed());
        assert!(EntryPoint::from_any(Box::new(thunk)).is_ok());

        let thunk_unit: BoxedThunkUnit = Box::new(|| async {}.boxed());
        assert!(EntryPoint::from_any(Box::new(thunk_unit)).is_ok());
    }

    #[test]
    fn test_from_any_rejects_other_shapes() {
        // two unrelated parameters
        let wrong: Box<dyn Fn(u8, String) + Send> = Box::new(|_, _| {});
        let err = EntryPoint::from_any(Box::new(wrong)).unwrap_err();
        assert!(matches!(err, CoroutineError::InvalidFunction(_)));

        let not_callable = EntryPoint::from_any(Box::new(42_u32)).unwrap_err();
        assert!(not_callable.to_string().starts_with("invalid function"));
    }
}
