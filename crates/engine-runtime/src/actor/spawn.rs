use crate::actor::{Actor, ActorContext, ActorRef};
use std::fmt::Debug;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

/// Runs `actor` on its own task. The join handle resolves after `on_stop`.
pub fn spawn_actor<M, A>(
    name: impl Into<String>,
    mailbox_capacity: usize,
    mut actor: A,
) -> (ActorRef<M>, JoinHandle<()>)
where
    A: Actor<M>,
    M: Send + Debug + 'static,
{
    let ctx = ActorContext::new(name);
    let (tx, mut rx) = mpsc::channel::<M>(mailbox_capacity);
    let actor_ref = ActorRef::new(tx);

    let handle = tokio::spawn(async move {
        if let Err(e) = actor.on_start(&ctx).await {
            error!(actor = %ctx.name(), ?e, "actor on_start failed");
            return;
        }

        while let Some(msg) = rx.recv().await {
            if let Err(e) = actor.handle(msg, &ctx).await {
                error!(actor = %ctx.name(), ?e, "actor handle failed");
            }
            if ctx.is_stopping() {
                debug!(actor = %ctx.name(), "actor requested stop");
                break;
            }
        }

        // Anything still queued is dropped with the receiver.
        rx.close();

        if let Err(e) = actor.on_stop(&ctx).await {
            error!(actor = %ctx.name(), ?e, "actor on_stop failed");
        }
    });

    (actor_ref, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActorError;
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    enum CounterMsg {
        Add(u32),
        Get(oneshot::Sender<u32>),
        Stop,
    }

    struct Counter {
        total: u32,
    }

    #[async_trait]
    impl Actor<CounterMsg> for Counter {
        async fn handle(&mut self, msg: CounterMsg, ctx: &ActorContext) -> Result<(), ActorError> {
            match msg {
                CounterMsg::Add(n) => self.total += n,
                CounterMsg::Get(reply) => {
                    let _ = reply.send(self.total);
                }
                CounterMsg::Stop => ctx.stop(),
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_messages_in_order_and_stops_on_request() {
        let (actor, handle) = spawn_actor("counter", 8, Counter { total: 0 });

        actor.send(CounterMsg::Add(2)).await.unwrap();
        actor.send(CounterMsg::Add(3)).await.unwrap();
        let (tx, rx) = oneshot::channel();
        actor.send(CounterMsg::Get(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap(), 5);

        // The handle we still hold keeps the mailbox open; stop must end the loop anyway.
        actor.send(CounterMsg::Stop).await.unwrap();
        handle.await.unwrap();
        assert!(actor.is_closed());
        assert!(matches!(
            actor.send(CounterMsg::Add(1)).await,
            Err(ActorError::MailboxClosed)
        ));
    }
}
