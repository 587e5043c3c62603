//! Clarification coordinator: one outstanding question to the user.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::actions::ClarifyOption;
use crate::protocol::{EngineEvent, EventBus};

/// Time the user has to answer before the first option is taken.
pub const DEFAULT_CLARIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

/// How a clarification ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarificationOutcome {
    /// The user picked this option.
    Chosen(String),
    /// Nobody answered; the first option was taken.
    TimedOut(String),
    Cancelled,
}

struct PendingQuestion {
    options: Vec<ClarifyOption>,
    tx: oneshot::Sender<String>,
}

/// An open question waiting for an answer.
#[derive(Debug)]
pub struct ClarificationWait {
    rx: oneshot::Receiver<String>,
    default_label: String,
    timeout: Duration,
}

impl ClarificationWait {
    pub async fn wait(self, cancel: &CancellationToken) -> ClarificationOutcome {
        tokio::select! {
            _ = cancel.cancelled() => ClarificationOutcome::Cancelled,
            result = timeout(self.timeout, self.rx) => match result {
                Ok(Ok(label)) => ClarificationOutcome::Chosen(label),
                Ok(Err(_)) => ClarificationOutcome::Cancelled,
                Err(_) => ClarificationOutcome::TimedOut(self.default_label),
            },
        }
    }
}

pub struct ClarificationCoordinator {
    bus: EventBus,
    pending: Mutex<Option<PendingQuestion>>,
    timeout: Duration,
}

impl ClarificationCoordinator {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            pending: Mutex::new(None),
            timeout: DEFAULT_CLARIFICATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Present a question and return the handle to wait on.
    ///
    /// A question still open from before is dropped.
    pub fn begin(&self, question: &str, options: &[ClarifyOption]) -> ClarificationWait {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(PendingQuestion {
            options: options.to_vec(),
            tx,
        });
        self.bus.emit(EngineEvent::PresentChoices {
            question: question.to_string(),
            options: options.to_vec(),
        });
        ClarificationWait {
            rx,
            default_label: options
                .first()
                .map(|o| o.label.clone())
                .unwrap_or_default(),
            timeout: self.timeout,
        }
    }

    /// Answer the open question. Returns `false` when nothing was asked.
    pub fn resolve(&self, choice: &str) -> bool {
        let Some(pending) = self.pending.lock().take() else {
            tracing::info!("Ignoring choice '{}': no clarification is pending", choice);
            return false;
        };

        let choice = choice.trim();
        let label = pending
            .options
            .iter()
            .find(|o| o.label.eq_ignore_ascii_case(choice))
            .map(|o| o.label.clone())
            .unwrap_or_else(|| choice.to_string());

        if pending.tx.send(label).is_err() {
            tracing::info!("Ignoring choice '{}': the question already closed", choice);
            return false;
        }
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|p| !p.tx.is_closed())
            .unwrap_or(false)
    }

    pub fn cancel(&self) {
        self.pending.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<ClarifyOption> {
        vec![ClarifyOption::new("A"), ClarifyOption::new("B")]
    }

    #[tokio::test]
    async fn test_choice_resolves_wait() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let coordinator = ClarificationCoordinator::new(bus);

        let wait = coordinator.begin("Which result?", &options());
        match events.try_recv().unwrap() {
            EngineEvent::PresentChoices { question, options } => {
                assert_eq!(question, "Which result?");
                assert_eq!(options.len(), 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(coordinator.resolve("b"));
        assert_eq!(
            wait.wait(&CancellationToken::new()).await,
            ClarificationOutcome::Chosen("B".to_string())
        );
        assert!(!coordinator.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_takes_first_option() {
        let coordinator = ClarificationCoordinator::new(EventBus::default())
            .with_timeout(Duration::from_secs(30));
        let wait = coordinator.begin("Which result?", &options());
        assert_eq!(
            wait.wait(&CancellationToken::new()).await,
            ClarificationOutcome::TimedOut("A".to_string())
        );
        assert!(!coordinator.resolve("B"));
    }

    #[test]
    fn test_choice_without_question_is_ignored() {
        let coordinator = ClarificationCoordinator::new(EventBus::default());
        assert!(!coordinator.resolve("A"));
    }

    #[tokio::test]
    async fn test_cancel_ends_wait() {
        let coordinator = ClarificationCoordinator::new(EventBus::default());
        let wait = coordinator.begin("?", &options());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(wait.wait(&cancel).await, ClarificationOutcome::Cancelled);
    }

    #[test]
    fn test_unknown_choice_is_passed_through() {
        let coordinator = ClarificationCoordinator::new(EventBus::default());
        let mut wait = coordinator.begin("?", &options());
        assert!(coordinator.resolve("something else"));
        assert_eq!(wait.rx.try_recv().unwrap(), "something else");
    }
}
