use super::entry::{
    new_console_id, ConsoleBatch, ConsoleClock, ConsoleEntry, ConsoleOwner, EntryKind, ROOT_PARENT,
};
use super::{ConsoleSettings, ConsoleSink};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct OpenEntry {
    id: String,
    name: String,
}

#[derive(Default)]
struct BufferState {
    entries: Vec<ConsoleEntry>,
    group: Option<OpenEntry>,
    command: Option<OpenEntry>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    owner: ConsoleOwner,
    settings: ConsoleSettings,
    clock: ConsoleClock,
    state: Mutex<BufferState>,
    batches: mpsc::UnboundedSender<ConsoleBatch>,
    pending: Arc<watch::Sender<usize>>,
}

/// Batches console entries of one owner and ships them through a [ConsoleSink].
///
/// Open and close operations flush right away. Messages are flushed once the buffer grows past
/// the batch size, or when the debounce timer armed by the first buffered message fires. Batches
/// are posted one at a time, in the order they were drained.
#[derive(Clone)]
pub struct ConsoleBuffer {
    inner: Arc<Inner>,
}

impl ConsoleBuffer {
    /// Must be called within a tokio runtime, the shipping task is spawned here.
    pub fn new(sink: Arc<dyn ConsoleSink>, owner: ConsoleOwner, settings: ConsoleSettings) -> Self {
        let (batches, mut queued) = mpsc::unbounded_channel::<ConsoleBatch>();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        tokio::spawn({
            let pending = pending.clone();
            async move {
                while let Some(batch) = queued.recv().await {
                    let owner_id = batch.owner.id().to_string();
                    match sink.post_entries(&batch).await {
                        Ok(()) => debug!(owner = %owner_id, entries = batch.entries.len(), "Console entries posted"),
                        Err(err) => error!(owner = %owner_id, "Posting console entries failed: {err}"),
                    }
                    pending.send_modify(|calls| *calls = calls.saturating_sub(1));
                }
            }
        });

        Self {
            inner: Arc::new(Inner {
                owner,
                settings,
                clock: ConsoleClock::new(),
                state: Mutex::new(BufferState::default()),
                batches,
                pending,
            }),
        }
    }

    pub fn open_group(&self, name: &str) {
        let mut state = self.inner.lock();
        let id = new_console_id();
        state.entries.push(ConsoleEntry::open(
            EntryKind::Group,
            id.clone(),
            Some(ROOT_PARENT.to_string()),
            name.to_string(),
            self.inner.clock.now_us(),
        ));
        state.group = Some(OpenEntry {
            id,
            name: name.to_string(),
        });
        self.inner.flush(&mut state);
    }

    /// Closes the open group. A command still open in it is closed first as successful, the
    /// group `success` flag only applies to the group. No-op without an open group.
    pub fn close_group(&self, success: bool) {
        let mut state = self.inner.lock();
        if state.group.is_none() {
            return;
        }
        self.inner.push_close_command(&mut state, true);
        let Some(group) = state.group.take() else {
            return;
        };

        let now = self.inner.clock.now_us();
        state.entries.push(
            ConsoleEntry::open(
                EntryKind::Group,
                group.id,
                Some(ROOT_PARENT.to_string()),
                group.name,
                now,
            )
            .closed(now, success),
        );
        self.inner.flush(&mut state);
    }

    pub fn open_command(&self, name: &str) {
        let mut state = self.inner.lock();
        let id = new_console_id();
        let parent = state.group.as_ref().map(|g| g.id.clone());
        state.entries.push(ConsoleEntry::open(
            EntryKind::Command,
            id.clone(),
            parent,
            name.to_string(),
            self.inner.clock.now_us(),
        ));
        state.command = Some(OpenEntry {
            id,
            name: name.to_string(),
        });
        self.inner.flush(&mut state);
    }

    /// No-op without an open command.
    pub fn close_command(&self, success: bool) {
        let mut state = self.inner.lock();
        if self.inner.push_close_command(&mut state, success) {
            self.inner.flush(&mut state);
        }
    }

    pub fn publish_message(&self, message: &str) {
        let mut state = self.inner.lock();
        let parent = state.command.as_ref().map(|c| c.id.clone());
        state.entries.push(ConsoleEntry::open(
            EntryKind::Message,
            new_console_id(),
            parent,
            message.to_string(),
            self.inner.clock.now_us(),
        ));

        if state.entries.len() > self.inner.settings.batch_size {
            self.inner.flush(&mut state);
        } else if state.timer.is_none() {
            state.timer = Some(self.arm_timer());
        }
    }

    /// Ships everything buffered now.
    pub fn flush(&self) {
        let mut state = self.inner.lock();
        self.inner.flush(&mut state);
    }

    /// Flush calls handed to the shipping task and not completed yet.
    pub fn pending_api_calls(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Resolves once every flush call issued so far has completed, successfully or not.
    pub async fn drained(&self) {
        let mut pending = self.inner.pending.subscribe();
        // the sender lives in self, so the channel cannot close while waiting
        let _ = pending.wait_for(|calls| *calls == 0).await;
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.flush_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock();
                // this task is the timer being cleared, it must not abort itself
                state.timer = None;
                inner.flush(&mut state);
            }
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // entries are plain data, a poisoned lock still holds a consistent buffer
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_close_command(&self, state: &mut BufferState, success: bool) -> bool {
        let Some(command) = state.command.take() else {
            return false;
        };
        let parent = state.group.as_ref().map(|g| g.id.clone());
        let now = self.clock.now_us();
        state.entries.push(
            ConsoleEntry::open(EntryKind::Command, command.id, parent, command.name, now)
                .closed(now, success)
                .hidden(),
        );
        true
    }

    /// Cancels the debounce timer and drains the whole buffer into one batch.
    fn flush(&self, state: &mut BufferState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.entries.is_empty() {
            return;
        }
        let batch = ConsoleBatch {
            owner: self.owner.clone(),
            entries: std::mem::take(&mut state.entries),
        };

        self.pending.send_modify(|calls| *calls += 1);
        if self.batches.send(batch).is_err() {
            error!(owner = %self.owner.id(), "Console shipping task is gone, entries dropped");
            self.pending.send_modify(|calls| *calls = calls.saturating_sub(1));
        }
    }
}
