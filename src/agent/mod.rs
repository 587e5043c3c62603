//! Task orchestration: lifecycle state, retry policy, clarification and the
//! async loop that ties them together.

mod clarify;
mod orchestrator;
mod retry;
mod state;

pub use clarify::{
    ClarificationCoordinator, ClarificationOutcome, ClarificationWait,
    DEFAULT_CLARIFICATION_TIMEOUT,
};
pub use orchestrator::{Engine, EngineConfig, BOOTSTRAP_URL};
pub use retry::{
    decide, RetryDecision, RetryPolicy, RetryState, RetryStrategy, RELENTLESS_CEILING,
};
pub use state::{
    AcceptError, ActionRecord, ActionStatus, Session, Task, TaskState, TransitionError,
};
