//! Event dispatch loop.
//!
//! Single-task consumer over the inbound event queue. Object-creation
//! notifications are recorded idempotently; a self-scheduled dispatch tick
//! periodically evaluates windowing and fans created tasks out to the task
//! queue. The transport offers message delivery but no native timers, so
//! the loop re-arms itself with a delayed self-send and remembers the
//! returned message id — a tick whose id does not match the most recently
//! scheduled timer is stale (superseded by a newer timer before firing)
//! and must never trigger a second evaluation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use strload_core::event::{Event, ObjectCreated};
use strload_queue::{QueueClient, QueueMessage};
use strload_store::{ObjectBuffer, TargetTableRegistry, TaskStore};

use crate::error::ServiceError;

/// Whether the loop keeps consuming after a message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

pub struct Dispatcher {
    event_queue: Arc<dyn QueueClient>,
    task_queue: Arc<dyn QueueClient>,
    registry: TargetTableRegistry,
    buffer: ObjectBuffer,
    tasks: TaskStore,
    dispatch_interval: Duration,
    max_batch_size: u32,
    /// Message id of the most recently scheduled dispatch timer.
    dispatch_message_id: Option<String>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_queue: Arc<dyn QueueClient>,
        task_queue: Arc<dyn QueueClient>,
        registry: TargetTableRegistry,
        buffer: ObjectBuffer,
        tasks: TaskStore,
        dispatch_interval: Duration,
        max_batch_size: u32,
    ) -> Self {
        Self {
            event_queue,
            task_queue,
            registry,
            buffer,
            tasks,
            dispatch_interval,
            max_batch_size,
            dispatch_message_id: None,
        }
    }

    /// Arm (or re-arm) the self-renewing dispatch timer.
    pub async fn set_dispatch_timer(&mut self) -> Result<(), ServiceError> {
        let id = self
            .event_queue
            .send(&Event::DispatchTick.to_body(), Some(self.dispatch_interval))
            .await?;
        debug!(message_id = %id, "Dispatch timer armed");
        self.dispatch_message_id = Some(id);
        Ok(())
    }

    /// Consume notifications until a shutdown event arrives.
    ///
    /// Queue-level receive errors are transient: logged and retried after a
    /// short pause. Store errors propagate — losing the control store is
    /// fatal to the loop.
    pub async fn event_loop(&mut self) -> Result<(), ServiceError> {
        info!("Dispatcher event loop started");
        loop {
            let messages = match self.event_queue.poll_batch(self.max_batch_size).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Event queue poll error: {} — retrying", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for msg in &messages {
                if self.handle_message(msg).await? == Flow::Shutdown {
                    info!("Shutdown notification received — dispatcher exiting");
                    return Ok(());
                }
            }
        }
    }

    /// Run one windowing evaluation and fan out task notifications.
    pub async fn dispatch_once(&mut self) -> Result<usize, ServiceError> {
        let task_seqs = self.buffer.flush().await?;
        let count = task_seqs.len();
        for task_seq in task_seqs {
            let Some(task) = self.tasks.get_task(task_seq).await? else {
                // Cut by us moments ago; cannot disappear.
                warn!(task_seq, "Created task vanished before fan-out");
                continue;
            };
            self.task_queue
                .send(&Event::LoadTask(task).to_body(), None)
                .await?;
        }
        Ok(count)
    }

    async fn handle_message(&mut self, msg: &QueueMessage) -> Result<Flow, ServiceError> {
        let event = match Event::parse(&msg.body) {
            Ok(event) => event,
            Err(e) => {
                // Unroutable notification: leave it unacked so it surfaces
                // through redelivery/DLQ instead of vanishing silently.
                error!(message_id = %msg.id, "Malformed notification: {}", e);
                return Ok(Flow::Continue);
            }
        };

        match event {
            Event::ObjectCreated(obj) => {
                self.handle_data(msg, &obj).await?;
                Ok(Flow::Continue)
            }
            Event::DispatchTick => {
                self.handle_dispatch(msg).await?;
                Ok(Flow::Continue)
            }
            Event::Shutdown => {
                self.event_queue.ack(&msg.receipt_handle).await?;
                Ok(Flow::Shutdown)
            }
            Event::LoadTask(task) => {
                // Task notifications belong on the task queue; a misrouted
                // one is acked and dropped.
                warn!(task_seq = task.task_seq, "load-task on event queue — ignored");
                self.event_queue.ack(&msg.receipt_handle).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_data(
        &mut self,
        msg: &QueueMessage,
        obj: &ObjectCreated,
    ) -> Result<(), ServiceError> {
        if !obj.created() {
            // Removals, restores etc. are acked and dropped.
            self.event_queue.ack(&msg.receipt_handle).await?;
            return Ok(());
        }

        if self.registry.lookup(&obj.schema, &obj.table).await?.is_none() {
            // Fatal routing error for this message: no destination to
            // attribute the object to. Not acked.
            error!(
                message_id = %msg.id,
                url = %obj.url,
                table = %obj.qualified_name(),
                "Unroutable notification: destination is not configured"
            );
            return Ok(());
        }

        let inserted = self.buffer.put(obj).await?;
        if !inserted {
            debug!(url = %obj.url, "Duplicate object notification ignored");
        }
        self.event_queue.ack(&msg.receipt_handle).await?;
        Ok(())
    }

    async fn handle_dispatch(&mut self, msg: &QueueMessage) -> Result<(), ServiceError> {
        if self.is_current_tick(&msg.id) {
            let created = self.dispatch_once().await?;
            debug!(tasks = created, "Dispatch tick handled");
            self.set_dispatch_timer().await?;
        } else {
            debug!(message_id = %msg.id, "Stale dispatch tick ignored");
        }
        self.event_queue.ack(&msg.receipt_handle).await?;
        Ok(())
    }

    /// A tick is current only if it is the most recently scheduled timer.
    fn is_current_tick(&self, message_id: &str) -> bool {
        self.dispatch_message_id.as_deref() == Some(message_id)
    }
}
