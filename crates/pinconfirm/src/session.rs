//! Drives a [`ConfirmationState`] against a [`ConfirmationTransport`].
//!
//! One session per link visit. The state lives behind a mutex that is never
//! held across a request, so a second `submit()` racing the first observes
//! `Submitting` and returns without touching the transport.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::constants::TEARDOWN_DELAY;
use crate::machine::{ConfirmationState, ConfirmationView, Effect, Event};
use crate::transport::ConfirmationTransport;

pub struct ConfirmationSession<T: ConfirmationTransport> {
    transport: T,
    state: Mutex<ConfirmationState>,
    teardown_delay: Duration,
    teardown: Mutex<Option<Duration>>,
}

impl<T: ConfirmationTransport> ConfirmationSession<T> {
    /// Mount a session on `link` and resolve it.
    ///
    /// Issues at most one `get_transaction` request, and none when the link
    /// carries no usable reference.
    pub async fn start(transport: T, link: Option<&str>) -> Self {
        Self::start_with_teardown(transport, link, TEARDOWN_DELAY).await
    }

    /// Like [`start`](Self::start), keeping the success view up for
    /// `teardown_delay` after a commit.
    pub async fn start_with_teardown(
        transport: T,
        link: Option<&str>,
        teardown_delay: Duration,
    ) -> Self {
        let (state, effect) = ConfirmationState::mount(link);
        let session = Self {
            transport,
            state: Mutex::new(state),
            teardown_delay,
            teardown: Mutex::new(None),
        };

        if let Some(Effect::Resolve(reference)) = effect {
            let event = match session.transport.get_transaction(&reference).await {
                Ok(outcome) => Event::Resolved(outcome),
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "transaction lookup failed");
                    Event::ResolveFailed(e.to_string())
                }
            };
            session.step(event);
        } else {
            tracing::info!("confirmation link carries no usable reference");
        }

        session
    }

    /// Feed raw keyboard input into the PIN field.
    pub fn input(&self, raw: &str) -> ConfirmationView {
        self.step(Event::Input(raw.to_string()));
        self.view()
    }

    /// Submit the current candidate.
    ///
    /// A no-op unless the session is `Ready` with a complete candidate.
    pub async fn submit(&self) -> ConfirmationView {
        if let Some(Effect::SendPin { reference, pin }) = self.step(Event::Submit) {
            let result = self.transport.verify_pin(&reference, &pin).await;
            drop(pin);

            let event = match result {
                Ok(outcome) => Event::Verified(outcome),
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "pin submission failed");
                    Event::SubmitFailed(e.to_string())
                }
            };
            if let Some(Effect::ScheduleTeardown) = self.step(event) {
                tracing::info!(reference = %reference, "transfer committed");
                *lock(&self.teardown) = Some(self.teardown_delay);
            }
        }
        self.view()
    }

    pub fn view(&self) -> ConfirmationView {
        lock(&self.state).view()
    }

    /// Delay after which the front-end should close. `None` until committed.
    pub fn teardown_after(&self) -> Option<Duration> {
        *lock(&self.teardown)
    }

    /// Sleep through the scheduled teardown delay, if any.
    pub async fn wait_for_teardown(&self) {
        if let Some(delay) = self.teardown_after() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn step(&self, event: Event) -> Option<Effect> {
        let mut guard = lock(&self.state);
        let current = std::mem::replace(
            &mut *guard,
            ConfirmationState::Failed {
                reason: String::new(),
            },
        );
        let (next, effect) = current.transition(event);
        *guard = next;
        effect
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("session mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
