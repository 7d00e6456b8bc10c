//! Symmetric coroutines built from tokio tasks and single-slot channels.
//!
//! Each coroutine body runs on its own task. [`Coroutine::resume`] and
//! [`Coroutine::yield_`] meet through a pair of capacity-one channels, so at
//! any moment exactly one side is running and every meeting swaps a
//! `Vec<Value>` in each direction.
//!
//! ```
//! use cochan_core::{values, Coroutine, Value};
//!
//! # #[tokio::main] async fn main() -> Result<(), cochan_core::CoroutineError> {
//! let co = Coroutine::create(|co: Coroutine, _args: Vec<Value>| async move {
//!     let reply = co.yield_(values!["Hello"]).await?;
//!     assert_eq!(reply, values!["World"]);
//!     anyhow::Ok(())
//! })?;
//!
//! assert_eq!(co.resume(values![]).await?, values![]);
//! assert_eq!(co.resume(values!["World"]).await?, values!["Hello"]);
//! # Ok(()) }
//! ```

pub mod boundary;
pub mod config;
pub mod coroutine;
pub mod entry;
pub mod error;
pub mod registry;
pub mod status;
pub mod value;

pub use config::{default_timeout, set_default_timeout, Config};
pub use coroutine::{Builder, Coroutine, CoroutineId};
pub use entry::{EntryPoint, IntoEntryPoint};
pub use error::{CoroutineError, Result};
pub use registry::{ErrorSignal, Registry};
pub use status::Status;
pub use value::Value;
