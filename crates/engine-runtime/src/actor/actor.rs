use crate::error::ActorError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ActorContext {
    name: Arc<str>,
    stopping: Arc<AtomicBool>,
}

impl ActorContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ends the event loop after the current message.
    ///
    /// An actor that keeps a reference to itself never sees its mailbox
    /// close, so it has to stop explicitly.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// A task that owns its state and processes one message type `M` at a time.
///
/// `on_start` runs before the first message and `on_stop` after the last,
/// when the mailbox closes or the actor calls [`ActorContext::stop`].
#[async_trait]
pub trait Actor<M>: Send + 'static
where
    M: Send + Debug + 'static,
{
    async fn on_start(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn handle(&mut self, msg: M, ctx: &ActorContext) -> Result<(), ActorError>;

    async fn on_stop(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Cloneable sending side of an actor's mailbox.
#[derive(Debug)]
pub struct ActorRef<M>
where
    M: Send + Debug + 'static,
{
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ActorRef<M>
where
    M: Send + Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> ActorRef<M>
where
    M: Send + Debug + 'static,
{
    pub fn new(tx: mpsc::Sender<M>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::MailboxClosed)
    }

    /// Fails instead of waiting when the mailbox is full.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|_| ActorError::MailboxClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
