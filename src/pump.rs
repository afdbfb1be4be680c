//! Message pump for the intercepted game window.
//!
//! The pump runs on a dedicated UI thread. Each [`MessageLoop::run`] queues
//! one work item there that retrieves, translates and dispatches messages
//! until it sees the end-of-pump sentinel or the queue is closed. Completion
//! is reported back through a channel and the callback is invoked on the
//! control thread, when it calls [`MessageLoop::dispatch_completions`] or
//! [`MessageLoop::wait_for_completion`]. Callbacks never leave the control
//! thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{ForgeError, Result};
use crate::interceptor::Interceptor;
use crate::system::{PumpEvent, WindowSystem};

type Job = Box<dyn FnOnce() + Send>;
type CompletionCallback = Box<dyn FnOnce(bool)>;

/// Pump messages until the sentinel arrives (returns `false`) or the queue
/// closes (returns `true`).
pub fn pump_messages(system: &dyn WindowSystem, end_message: u32) -> bool {
    loop {
        match system.next_message() {
            PumpEvent::Message(msg) if msg.message == end_message => {
                debug!("End of message pump requested");
                return false;
            },
            PumpEvent::Message(msg) => system.translate_and_dispatch(&msg),
            PumpEvent::Quit => {
                debug!("Message queue closed");
                return true;
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Completion {
    id: u64,
    quit: bool,
}

/// One `run` request. Reports its completion exactly once, when dropped.
/// Work dropped without [`PumpWork::finish`] reports `quit = true`.
struct PumpWork {
    id: u64,
    quit: bool,
    completions: Sender<Completion>,
}

impl PumpWork {
    fn finish(mut self, quit: bool) {
        self.quit = quit;
    }
}

impl Drop for PumpWork {
    fn drop(&mut self) {
        trace!("Pump work {} done, quit = {}", self.id, self.quit);
        self.completions.send(Completion { id: self.id, quit: self.quit }).ok();
    }
}

/// Long-lived thread executing queued jobs in order.
struct UiThread {
    tx: Sender<Job>,
    _handle: JoinHandle<()>,
}

impl UiThread {
    fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for job in rx {
                    job();
                }
                trace!("UI thread exiting");
            })
            .map_err(|e| ForgeError::UiThread(e.to_string()))?;

        Ok(Self { tx, _handle: handle })
    }

    fn queue(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| ForgeError::UiThread("the UI thread has exited".to_owned()))
    }
}

/// Pending completions, owned by the control thread.
struct CompletionQueue {
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    pending: RefCell<HashMap<u64, CompletionCallback>>,
    next_id: Cell<u64>,
}

impl CompletionQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, pending: RefCell::new(HashMap::new()), next_id: Cell::new(0) }
    }

    fn track(&self, on_complete: CompletionCallback) -> PumpWork {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.pending.borrow_mut().insert(id, on_complete);

        PumpWork { id, quit: true, completions: self.tx.clone() }
    }

    fn cancel(&self, id: u64) {
        self.pending.borrow_mut().remove(&id);
    }

    fn complete(&self, completion: Completion) -> bool {
        let callback = self.pending.borrow_mut().remove(&completion.id);

        match callback {
            Some(callback) => {
                callback(completion.quit);
                true
            },
            None => false,
        }
    }

    fn dispatch(&self) -> usize {
        let ready: Vec<Completion> = self.rx.try_iter().collect();
        ready.into_iter().filter(|&completion| self.complete(completion)).count()
    }

    fn wait(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => usize::from(self.complete(completion)) + self.dispatch(),
            Err(_) => 0,
        }
    }

    fn pending(&self) -> usize {
        self.pending.borrow().len()
    }
}

/// Owner of the UI thread and of the control thread's completion queue.
///
/// Dropping the loop runs the callbacks of pumps that already finished. The
/// callbacks of pumps still running are dropped without being called.
pub struct MessageLoop {
    ui: UiThread,
    completions: CompletionQueue,
}

impl MessageLoop {
    pub(crate) fn new(thread_name: &str) -> Result<Self> {
        Ok(Self { ui: UiThread::spawn(thread_name)?, completions: CompletionQueue::new() })
    }

    /// Queue arbitrary work on the UI thread.
    pub fn queue(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ui.queue(Box::new(work))
    }

    /// Start pumping the game window's messages on the UI thread.
    ///
    /// `on_complete` runs on the control thread once the pump ends, with
    /// `true` if the application shut down and `false` if the pump was
    /// stopped with [`MessageLoop::stop`].
    pub fn run(
        &self,
        interceptor: &Arc<Interceptor>,
        on_complete: impl FnOnce(bool) + 'static,
    ) -> Result<()> {
        let hwnd = interceptor.window().ok_or(ForgeError::NoWindow)?;
        let end_message = interceptor.config.end_pump_message;

        let work = self.completions.track(Box::new(on_complete));
        let id = work.id;
        let interceptor = Arc::clone(interceptor);

        let job = Box::new(move || {
            info!("Message pump started for {hwnd:?}");
            let quit = pump_messages(interceptor.system.as_ref(), end_message);
            info!("Message pump ended, quit = {quit}");
            work.finish(quit);
        });

        self.ui.queue(job).map_err(|e| {
            self.completions.cancel(id);
            e
        })
    }

    /// Ask the running pump to return by posting the sentinel message to the
    /// game window.
    pub fn stop(&self, interceptor: &Interceptor) -> Result<()> {
        let hwnd = interceptor.window().ok_or(ForgeError::NoWindow)?;
        debug!("Posting end of message pump to {hwnd:?}");
        interceptor.system.post_message(hwnd, interceptor.config.end_pump_message, 0, 0)
    }

    /// Invoke the callbacks of every pump that has finished so far. Returns
    /// how many ran.
    pub fn dispatch_completions(&self) -> usize {
        self.completions.dispatch()
    }

    /// Wait up to `timeout` for a pump to finish, then invoke every
    /// available callback. Returns how many ran.
    pub fn wait_for_completion(&self, timeout: Duration) -> usize {
        self.completions.wait(timeout)
    }

    /// Number of `run` requests whose callback hasn't run yet.
    pub fn pending(&self) -> usize {
        self.completions.pending()
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        let ran = self.completions.dispatch();
        let discarded = self.completions.pending();
        if discarded > 0 {
            debug!("Discarding {discarded} completion callbacks of running pumps");
        }
        trace!("Message loop dropped after running {ran} completion callbacks");
    }
}
