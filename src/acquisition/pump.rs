//! Host event-processing hook.
//!
//! The acquisition loop runs on a single cooperative context. A host that also needs to
//! repaint, poll input or drain a queue on that context passes a [`Pump`]; the drivers call it
//! after every write and read so the host stays responsive while waiting on instruments.

use async_trait::async_trait;

/// Called at every yield point of a device exchange.
#[async_trait]
pub trait Pump: Send {
    /// Process pending host events. Must return promptly.
    async fn pump(&mut self);
}

/// Pump that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPump;

#[async_trait]
impl Pump for NoopPump {
    async fn pump(&mut self) {}
}

/// Pump that yields to the tokio scheduler, letting other tasks on the same runtime run.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldPump;

#[async_trait]
impl Pump for YieldPump {
    async fn pump(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// Pump backed by a synchronous closure.
pub struct FnPump<F>(pub F);

#[async_trait]
impl<F> Pump for FnPump<F>
where
    F: FnMut() + Send,
{
    async fn pump(&mut self) {
        (self.0)();
    }
}
