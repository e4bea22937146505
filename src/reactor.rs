//! The reactor task.
//!
//! Owns the [`RemuxEngine`] and is its only driver: commands from the
//! outside and events from worker/reader threads are multiplexed onto
//! one task, so the engine itself stays lock-free.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::error::SubscribeError;
use crate::event::GatewayEvent;
use crate::remux::{DataCallback, RemuxEngine, SubscriberId, TeardownCallback};
use crate::tune::Tune;

/// Requests from outside the reactor.
pub enum GatewayCommand {
    Subscribe {
        tune: Tune,
        data: DataCallback,
        teardown: TeardownCallback,
        reply: oneshot::Sender<Result<SubscriberId, SubscribeError>>,
    },
    Unsubscribe(SubscriberId),
    Shutdown,
}

/// Cloneable handle for talking to a running reactor.
#[derive(Clone)]
pub struct GatewayHandle {
    commands: UnboundedSender<GatewayCommand>,
}

impl GatewayHandle {
    /// Attach a subscriber for one service.
    pub async fn subscribe(
        &self,
        tune: Tune,
        data: DataCallback,
        teardown: TeardownCallback,
    ) -> Result<SubscriberId, SubscribeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(GatewayCommand::Subscribe {
                tune,
                data,
                teardown,
                reply,
            })
            .map_err(|_| SubscribeError::Closed)?;
        response.await.map_err(|_| SubscribeError::Closed)?
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.commands.send(GatewayCommand::Unsubscribe(id));
    }

    /// Ask the reactor to stop. Safe to call from signal handlers and
    /// plain threads.
    pub fn shutdown(&self) {
        let _ = self.commands.send(GatewayCommand::Shutdown);
    }
}

/// Single-writer event loop around the engine.
pub struct Reactor {
    engine: RemuxEngine,
    events: UnboundedReceiver<GatewayEvent>,
    commands: UnboundedReceiver<GatewayCommand>,
}

impl Reactor {
    pub fn new(engine: RemuxEngine, events: UnboundedReceiver<GatewayEvent>) -> (Self, GatewayHandle) {
        let (commands_tx, commands) = unbounded_channel();
        (
            Reactor {
                engine,
                events,
                commands,
            },
            GatewayHandle {
                commands: commands_tx,
            },
        )
    }

    /// Run until shutdown is requested or every handle and event source
    /// is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.engine.handle_event(event);
                }
                else => break,
            }
        }
        log::info!("reactor stopped");
    }

    fn handle_command(&mut self, command: GatewayCommand) -> bool {
        match command {
            GatewayCommand::Subscribe {
                tune,
                data,
                teardown,
                reply,
            } => {
                let result = self.engine.subscribe(tune, data, teardown);
                let _ = reply.send(result);
                false
            }
            GatewayCommand::Unsubscribe(id) => {
                self.engine.unsubscribe(id);
                false
            }
            GatewayCommand::Shutdown => {
                log::info!("shutdown requested");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::device::mock::MockBackend;
    use crate::frontend::lnb::LnbConfig;
    use crate::frontend::pool::{FrontendPool, PoolOptions};
    use crate::remux::MAX_TRANSPONDER_RETRIES;
    use crate::tune::DeliverySystem;
    use std::sync::Arc;

    fn reactor_with(frontends: usize) -> (Reactor, GatewayHandle) {
        let backend = MockBackend::new(vec![5, 6]);
        let (tx, rx) = unbounded_channel();
        let mut pool =
            FrontendPool::new(Arc::new(backend), tx, PoolOptions::default()).unwrap();
        for i in 0..frontends {
            pool.add_frontend(i as u32, 0, LnbConfig::default()).unwrap();
        }
        let engine = RemuxEngine::new(pool, MAX_TRANSPONDER_RETRIES);
        Reactor::new(engine, rx)
    }

    fn tune() -> Tune {
        Tune {
            delivery_system: DeliverySystem::DvbS2,
            frequency: 11_747_000,
            symbol_rate: 27_500_000,
            horizontal: true,
            sid: 100,
        }
    }

    #[tokio::test]
    async fn subscribe_and_shutdown_roundtrip() {
        let (reactor, handle) = reactor_with(1);
        let task = tokio::spawn(reactor.run());

        let id = handle
            .subscribe(tune(), Box::new(|_| {}), Box::new(|| {}))
            .await
            .unwrap();
        handle.unsubscribe(id);
        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_without_frontends_fails() {
        let (reactor, handle) = reactor_with(0);
        let task = tokio::spawn(reactor.run());

        let result = handle
            .subscribe(tune(), Box::new(|_| {}), Box::new(|| {}))
            .await;
        assert!(matches!(result, Err(SubscribeError::NoFrontend(_))));
        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let (reactor, handle) = reactor_with(1);
        let task = tokio::spawn(reactor.run());
        handle.shutdown();
        task.await.unwrap();

        let result = handle
            .subscribe(tune(), Box::new(|_| {}), Box::new(|| {}))
            .await;
        assert!(matches!(result, Err(SubscribeError::Closed)));
    }
}
