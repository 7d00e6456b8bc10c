use std::any::Any;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::boundary::run_guarded;
use crate::config::Config;
use crate::entry::{EntryPoint, IntoEntryPoint};
use crate::error::{CoroutineError, Result};
use crate::status::{Status, StatusCell};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoroutineId(Uuid);

impl CoroutineId {
    pub fn new() -> Self {
        CoroutineId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CoroutineId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hook run on the body's task after it has closed the handle.
pub(crate) type ExitHook = Box<dyn FnOnce(CoroutineId) + Send>;

// === Handoff Channel Pair ===

/// What the body hands to the controller.
#[derive(Debug)]
enum Handoff {
    Yielded(Vec<Value>),
    // Terminal error of the body, picked up by the pending resume.
    Finished(CoroutineError),
}

struct Shared {
    id: CoroutineId,
    status: StatusCell,
    config: Config,

    // Senders sit in an Option so closing is just dropping them; a receiver
    // then drains what is buffered and sees the channel as closed.
    input_tx: Mutex<Option<mpsc::Sender<Vec<Value>>>>,
    input_rx: AsyncMutex<mpsc::Receiver<Vec<Value>>>,
    output_tx: Mutex<Option<mpsc::Sender<Handoff>>>,
    output_rx: AsyncMutex<mpsc::Receiver<Handoff>>,
}

/// Handle to one coroutine.
///
/// Cloning is cheap and every clone addresses the same coroutine. The
/// controller drives it with [`resume`](Coroutine::resume); the body, which
/// receives its own clone, hands control back with
/// [`yield_`](Coroutine::yield_).
///
/// Resume calls on one handle must not overlap. Yield must only be called
/// from the body's own task.
#[derive(Clone)]
pub struct Coroutine {
    shared: Arc<Shared>,
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Coroutine {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Spawn `entry` on its own task and return its handle.
    ///
    /// Returns before any user code of the body has run; the first
    /// [`resume`](Coroutine::resume) lets the body start, and its input
    /// becomes the body's argument list.
    pub fn create<M>(entry: impl IntoEntryPoint<M>) -> Result<Coroutine> {
        Builder::default().create(entry)
    }

    /// Like [`create`](Coroutine::create) for a type-erased entry point.
    /// Unsupported shapes fail with [`CoroutineError::InvalidFunction`] and
    /// nothing is spawned.
    pub fn create_dyn(entry: Box<dyn Any + Send>) -> Result<Coroutine> {
        Builder::default().create_dyn(entry)
    }

    /// Create the coroutine and run it up to its first yield (or to its end).
    pub async fn start<M>(entry: impl IntoEntryPoint<M>) -> Result<()> {
        let co = Coroutine::create(entry)?;
        co.resume(Vec::new()).await.map(|_| ())
    }

    pub(crate) fn allocate(config: Config) -> Coroutine {
        let (input_tx, input_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(1);

        let shared = Shared {
            id: CoroutineId::new(),
            status: StatusCell::new(),
            config,
            input_tx: Mutex::new(Some(input_tx)),
            input_rx: AsyncMutex::new(input_rx),
            output_tx: Mutex::new(Some(output_tx)),
            output_rx: AsyncMutex::new(output_rx),
        };
        Coroutine {
            shared: Arc::new(shared),
        }
    }

    /// Spawn the body task. Fails only when called outside a tokio runtime.
    pub(crate) fn launch(&self, entry: EntryPoint, on_exit: Option<ExitHook>) -> Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoroutineError::NoRuntime)?;
        self.launch_on(&runtime, entry, on_exit);
        Ok(())
    }

    pub(crate) fn launch_on(
        &self,
        runtime: &tokio::runtime::Handle,
        entry: EntryPoint,
        on_exit: Option<ExitHook>,
    ) {
        let co = self.clone();
        runtime.spawn(async move {
            let id = co.id();
            co.run_body(entry).await;
            if let Some(hook) = on_exit {
                hook(id);
            }
        });
        log::debug!("coroutine {} spawned", self.id());
    }

    async fn run_body(self, entry: EntryPoint) {
        let co = self.clone();
        let outcome = run_guarded(async move {
            // Startup rendezvous: meets the first resume, whose input becomes
            // the body's arguments.
            let args = co.yield_(Vec::new()).await?;
            entry.call(co, args).await.map_err(CoroutineError::from)
        })
        .await;
        self.finish(outcome);
    }

    fn finish(&self, outcome: Result<()>) {
        self.shared.status.close();
        self.shared.input_tx.lock().take();
        let output_tx = self.shared.output_tx.lock().take();

        let err = match outcome {
            Ok(()) => {
                log::debug!("coroutine {} returned", self.id());
                return;
            }
            Err(err) => err,
        };

        match &err {
            CoroutineError::Panicked(msg) => {
                log::error!("coroutine {} panicked: {}", self.id(), msg)
            }
            other => log::debug!("coroutine {} ended with error: {}", self.id(), other),
        }

        // Hand the error to whichever resume is waiting. A timed-out handle
        // has no sender left and the error stays with the body's task.
        if let Some(tx) = output_tx {
            if let Err(e) = tx.try_send(Handoff::Finished(err)) {
                log::warn!(
                    "coroutine {} could not deliver terminal error: {:?}",
                    self.id(),
                    e
                );
            }
        }
    }

    pub fn id(&self) -> CoroutineId {
        self.shared.id
    }

    /// Current status. Never blocks.
    pub fn status(&self) -> Status {
        self.shared.status.load()
    }

    pub fn is_closed(&self) -> bool {
        self.status().is_closed()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // === Resume ===

    /// Hand `input` to the body and wait for what it yields next.
    ///
    /// Receives first, then sends. If the body finishes instead of yielding,
    /// its error is returned, or an empty output when it returned normally.
    pub async fn resume(&self, input: Vec<Value>) -> Result<Vec<Value>> {
        if self.is_closed() {
            return Err(CoroutineError::Closed);
        }

        let received = {
            let mut rx = self.shared.output_rx.lock().await;
            rx.recv().await
        };
        let output = match received {
            Some(Handoff::Yielded(values)) => values,
            Some(Handoff::Finished(err)) => return Err(err),
            None => return Ok(Vec::new()),
        };

        let tx = self
            .shared
            .input_tx
            .lock()
            .clone()
            .ok_or(CoroutineError::Closed)?;
        tx.send(input).await.map_err(|_| CoroutineError::Closed)?;

        Ok(output)
    }

    pub async fn resume_with_timeout(
        &self,
        timeout: Duration,
        input: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.with_timeout(timeout, self.resume(input)).await
    }

    /// Resume, giving up when `signal` completes first. Giving up closes the
    /// handle.
    pub async fn resume_with_cancellation<S>(
        &self,
        signal: S,
        input: Vec<Value>,
    ) -> Result<Vec<Value>>
    where
        S: Future<Output = ()>,
    {
        self.with_cancellation(signal, self.resume(input)).await
    }

    pub async fn resume_with_default_timeout(&self, input: Vec<Value>) -> Result<Vec<Value>> {
        self.resume_with_timeout(self.shared.config.default_timeout, input)
            .await
    }

    // === Yield ===

    /// Publish `output` to the controller and park until the next resume.
    ///
    /// Sends first, then receives. Only valid on the body's own task.
    pub async fn yield_(&self, output: Vec<Value>) -> Result<Vec<Value>> {
        match self.status() {
            Status::Closed => Err(CoroutineError::Closed),
            Status::Created => {
                let input = self.handoff(output).await?;
                self.mark_running(Status::Created)?;
                Ok(input)
            }
            _ => {
                if !self.shared.status.transition(Status::Running, Status::Suspended)
                    && self.is_closed()
                {
                    return Err(CoroutineError::Closed);
                }
                let input = self.handoff(output).await?;
                self.mark_running(Status::Suspended)?;
                Ok(input)
            }
        }
    }

    pub async fn yield_with_timeout(
        &self,
        timeout: Duration,
        output: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.with_timeout(timeout, self.yield_(output)).await
    }

    pub async fn yield_with_cancellation<S>(
        &self,
        signal: S,
        output: Vec<Value>,
    ) -> Result<Vec<Value>>
    where
        S: Future<Output = ()>,
    {
        self.with_cancellation(signal, self.yield_(output)).await
    }

    pub async fn yield_with_default_timeout(&self, output: Vec<Value>) -> Result<Vec<Value>> {
        self.yield_with_timeout(self.shared.config.default_timeout, output)
            .await
    }

    async fn handoff(&self, output: Vec<Value>) -> Result<Vec<Value>> {
        let tx = self
            .shared
            .output_tx
            .lock()
            .clone()
            .ok_or(CoroutineError::Closed)?;
        tx.send(Handoff::Yielded(output))
            .await
            .map_err(|_| CoroutineError::Closed)?;
        drop(tx);

        let mut rx = self.shared.input_rx.lock().await;
        rx.recv().await.ok_or(CoroutineError::Closed)
    }

    fn mark_running(&self, from: Status) -> Result<()> {
        if self.shared.status.transition(from, Status::Running) {
            Ok(())
        } else {
            Err(CoroutineError::Closed)
        }
    }

    // === Timeout Wrapper ===

    async fn with_timeout<T, F>(&self, timeout: Duration, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                self.abort("deadline exceeded");
                Err(CoroutineError::DeadlineExceeded(timeout))
            }
        }
    }

    async fn with_cancellation<T, F, S>(&self, signal: S, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        S: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            result = op => result,
            _ = signal => {
                self.abort("cancelled");
                Err(CoroutineError::Cancelled)
            }
        }
    }

    /// Close the handle from outside the body. The body task is not
    /// interrupted, but with both senders gone a body parked in yield wakes
    /// up with `Closed` instead of waiting forever.
    fn abort(&self, reason: &str) {
        let prev = self.shared.status.close();
        self.shared.input_tx.lock().take();
        self.shared.output_tx.lock().take();
        if prev != Status::Closed {
            log::warn!("coroutine {} closed ({}) while {}", self.id(), reason, prev);
        }
    }
}

// === Builder ===

/// Creation with an explicit [`Config`].
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn create<M>(self, entry: impl IntoEntryPoint<M>) -> Result<Coroutine> {
        self.spawn(entry.into_entry_point())
    }

    pub fn create_dyn(self, entry: Box<dyn Any + Send>) -> Result<Coroutine> {
        self.spawn(EntryPoint::from_any(entry)?)
    }

    fn spawn(self, entry: EntryPoint) -> Result<Coroutine> {
        let co = Coroutine::allocate(self.config);
        co.launch(entry, None)?;
        Ok(co)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    // Created may only lead the trace and Closed may only end it; anything in
    // between is Running/Suspended oscillation.
    fn is_valid_trace(trace: &[Status]) -> bool {
        let first_other = trace
            .iter()
            .position(|s| *s != Status::Created)
            .unwrap_or(trace.len());
        let rest = &trace[first_other..];
        let first_closed = rest
            .iter()
            .position(|s| *s == Status::Closed)
            .unwrap_or(rest.len());
        rest[..first_closed].iter().all(|s| *s != Status::Created)
            && rest[first_closed..].iter().all(|s| *s == Status::Closed)
    }

    #[test]
    fn test_trace_checker() {
        use Status::*;
        assert!(is_valid_trace(&[Created, Running, Suspended, Running, Closed, Closed]));
        assert!(is_valid_trace(&[Created, Suspended, Closed]));
        assert!(!is_valid_trace(&[Created, Running, Created]));
        assert!(!is_valid_trace(&[Running, Closed, Suspended]));
    }

    #[tokio::test]
    async fn test_first_resume_feeds_body_args() {
        init_logger();
        let co = Coroutine::create(|co: Coroutine, args: Vec<Value>| async move {
            let sum: i64 = args.iter().filter_map(Value::as_int).sum();
            co.yield_(values![sum]).await?;
            anyhow::Ok(())
        })
        .unwrap();

        assert_eq!(co.status(), Status::Created);
        let startup = co.resume(values![2, 3, 4]).await.unwrap();
        assert!(startup.is_empty());

        let out = co.resume(values![]).await.unwrap();
        assert_eq!(out, values![9]);
    }

    #[tokio::test]
    async fn test_status_sequence() {
        init_logger();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let co = Coroutine::create(move |co: Coroutine| async move {
            seen_tx.send(co.status()).ok();
            co.yield_(values!["a"]).await?;
            seen_tx.send(co.status()).ok();
            co.yield_(values!["b"]).await?;
            seen_tx.send(co.status()).ok();
            anyhow::Ok(())
        })
        .unwrap();

        let mut trace = vec![co.status()];
        assert!(co.resume(values![]).await.unwrap().is_empty());
        trace.push(co.status());
        assert_eq!(co.resume(values![]).await.unwrap(), values!["a"]);
        trace.push(co.status());
        assert_eq!(co.resume(values![]).await.unwrap(), values!["b"]);
        trace.push(co.status());
        // the body returns instead of yielding: empty output, then closed
        assert!(co.resume(values![]).await.unwrap().is_empty());
        trace.push(co.status());
        assert!(matches!(co.resume(values![]).await, Err(CoroutineError::Closed)));
        trace.push(co.status());

        assert_eq!(trace.first(), Some(&Status::Created));
        assert_eq!(trace.last(), Some(&Status::Closed));
        assert!(is_valid_trace(&trace), "bad trace {:?}", trace);

        let mut inside = Vec::new();
        while let Some(s) = seen_rx.recv().await {
            inside.push(s);
        }
        assert_eq!(inside, vec![Status::Running; 3]);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_values() {
        let co = Coroutine::create(|co: Coroutine, _args: Vec<Value>| async move {
            // echo every input back on the following handoff
            let mut received = co.yield_(values![]).await?;
            while !received.is_empty() {
                received = co.yield_(received).await?;
            }
            anyhow::Ok(())
        })
        .unwrap();

        let batches = vec![
            values![1, 2, 3],
            values!["x"],
            values![Value::Nil, true, 2.5],
            values![Value::from(vec![1, 2])],
        ];

        co.resume(values![]).await.unwrap();
        assert!(co.resume(batches[0].clone()).await.unwrap().is_empty());
        for pair in batches.windows(2) {
            let echoed = co.resume(pair[1].clone()).await.unwrap();
            assert_eq!(echoed, pair[0]);
        }
        let last = co.resume(values![]).await.unwrap();
        assert_eq!(&last, batches.last().unwrap());
    }

    #[tokio::test]
    async fn test_application_error_reaches_pending_resume() {
        let co = Coroutine::create(|| async { Err::<(), _>(anyhow::anyhow!("disk full")) }).unwrap();

        co.resume(values![]).await.unwrap();
        let err = co.resume(values![]).await.unwrap_err();
        assert!(matches!(err, CoroutineError::Application(ref e) if e.to_string() == "disk full"));
        assert_eq!(co.status(), Status::Closed);
        assert!(matches!(co.resume(values![]).await, Err(CoroutineError::Closed)));
    }

    #[tokio::test]
    async fn test_panic_is_converted() {
        init_logger();
        let co = Coroutine::create(|co: Coroutine| async move {
            let input = co.yield_(values!["ready"]).await.unwrap_or_default();
            if input.is_empty() {
                panic!("empty input");
            }
        })
        .unwrap();

        co.resume(values![]).await.unwrap();
        assert_eq!(co.resume(values![]).await.unwrap(), values!["ready"]);
        let err = co.resume(values![]).await.unwrap_err();
        assert!(matches!(err, CoroutineError::Panicked(ref m) if m == "empty input"));
        assert!(co.is_closed());
    }

    #[tokio::test]
    async fn test_yield_timeout_closes_handle() {
        init_logger();
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let co = Coroutine::create(move |co: Coroutine| async move {
            let r = co
                .yield_with_timeout(Duration::from_millis(20), values!["waiting"])
                .await;
            result_tx.send(r.map_err(|e| e.to_string())).ok();
        })
        .unwrap();

        co.resume(values![]).await.unwrap();
        // never resumed again, so the body's yield gives up on its own
        let r = result_rx.await.unwrap();
        assert_eq!(
            r,
            Err(CoroutineError::DeadlineExceeded(Duration::from_millis(20)).to_string())
        );
        assert!(co.is_closed());
        assert!(matches!(co.resume(values![]).await, Err(CoroutineError::Closed)));
    }

    #[tokio::test]
    async fn test_cancelled_resume_closes_handle() {
        init_logger();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let co = Coroutine::create(move |co: Coroutine| async move {
            started_tx.send(()).ok();
            tokio::time::sleep(Duration::from_millis(30)).await;
            let r = co.yield_(values!["late"]).await;
            done_tx.send(r.map_err(|e| e.to_string())).ok();
        })
        .unwrap();

        co.resume(values![]).await.unwrap();
        started_rx.await.unwrap();

        // the signal is already complete, so the pending receive loses the race
        let err = co
            .resume_with_cancellation(futures::future::ready(()), values![])
            .await
            .unwrap_err();
        assert!(matches!(err, CoroutineError::Cancelled));
        assert!(co.is_closed());

        // the body keeps running and its next yield fails fast
        let late = done_rx.await.unwrap();
        assert_eq!(late, Err("coroutine is closed".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_yield_closes_handle() {
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let co = Coroutine::create(move |co: Coroutine| async move {
            let signal = async move {
                cancel_rx.await.ok();
            };
            let r = co.yield_with_cancellation(signal, values!["parked"]).await;
            result_tx.send(r.map_err(|e| e.to_string())).ok();
        })
        .unwrap();

        co.resume(values![]).await.unwrap();
        cancel_tx.send(()).unwrap();

        let r = result_rx.await.unwrap();
        assert_eq!(r, Err(CoroutineError::Cancelled.to_string()));
        assert!(co.is_closed());
        assert!(matches!(co.resume(values![]).await, Err(CoroutineError::Closed)));
    }

    #[tokio::test]
    async fn test_yield_uses_configured_default_timeout() {
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let co = Coroutine::builder()
            .timeout(Duration::from_millis(10))
            .create(move |co: Coroutine| async move {
                let r = co.yield_with_default_timeout(values!["waiting"]).await;
                result_tx.send(r.map_err(|e| e.to_string())).ok();
            })
            .unwrap();

        co.resume(values![]).await.unwrap();
        let r = result_rx.await.unwrap();
        assert_eq!(
            r,
            Err(CoroutineError::DeadlineExceeded(Duration::from_millis(10)).to_string())
        );
        assert!(co.is_closed());
    }

    #[tokio::test]
    async fn test_builder_config() {
        let co = Coroutine::builder()
            .timeout(Duration::from_millis(15))
            .create(|co: Coroutine| async move {
                co.yield_(values![]).await.ok();
            })
            .unwrap();
        assert_eq!(co.config().default_timeout, Duration::from_millis(15));

        co.resume_with_default_timeout(values![]).await.unwrap();
        let err = co.resume_with_default_timeout(values![]).await;
        // body returned after its only yield: empty output or already closed
        assert!(matches!(err, Ok(ref v) if v.is_empty()) || matches!(err, Err(CoroutineError::Closed)));
    }

    #[test]
    fn test_create_outside_runtime() {
        let err = Coroutine::create(|| async {}).unwrap_err();
        assert!(matches!(err, CoroutineError::NoRuntime));
    }
}
