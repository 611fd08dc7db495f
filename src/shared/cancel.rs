// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The two cancellation channels every suspension point listens to.
///
/// `ctx` is the outer run context, cancelled by the entry point on shutdown.
/// `stop` is cancelled once when an interrupt signal arrives and aborts
/// in-flight creation waits without waiting on the next timer. Once
/// [`CancelScope::teardown`] is called, every clone ignores `stop` and only
/// `ctx` can interrupt.
#[derive(Clone, Debug, Default)]
pub struct CancelScope {
    pub ctx: CancellationToken,
    pub stop: CancellationToken,
    teardown: Arc<AtomicBool>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled() || (self.stop.is_cancelled() && !self.in_teardown())
    }

    /// Resolves when either channel fires.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.ctx.cancelled() => {}
            _ = self.stopped() => {}
        }
    }

    /// Resolves when the stop channel fires, unless teardown has begun.
    pub async fn stopped(&self) {
        if self.in_teardown() {
            std::future::pending::<()>().await;
        }
        self.stop.cancelled().await
    }

    /// Closes the stop channel. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Switches every clone of this scope to teardown: deletes run to
    /// completion after a stop signal and only `ctx` interrupts them.
    pub fn teardown(&self) {
        self.teardown.store(true, Ordering::SeqCst);
    }

    pub fn in_teardown(&self) -> bool {
        self.teardown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_either_token_cancels() {
        let scope = CancelScope::new();
        assert!(!scope.is_cancelled());
        scope.stop();
        scope.stop();
        scope.cancelled().await;
        assert!(scope.is_cancelled());

        let scope = CancelScope::new();
        scope.ctx.cancel();
        scope.cancelled().await;
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_ignores_stop_in_every_clone() {
        let scope = CancelScope::new();
        let held = scope.clone();
        scope.stop();
        assert!(held.is_cancelled());

        scope.teardown();
        assert!(held.in_teardown());
        assert!(!held.is_cancelled());
        let waited = tokio::time::timeout(std::time::Duration::from_secs(1), held.cancelled()).await;
        assert!(waited.is_err());

        scope.ctx.cancel();
        held.cancelled().await;
        assert!(held.is_cancelled());
    }
}
