//! Startup database-readiness probing.
//!
//! In a containerized deployment the API process usually comes up before the
//! database has finished initializing, so the first attempts to connect and
//! migrate will fail for reasons that resolve themselves within seconds. This
//! module owns the protocol for that window: classify each failure, retry the
//! temporary ones on a bounded budget, wait out benign schema races without
//! spending budget, and abort on anything else.
//!
//! The prober runs exactly once, on the process's main line of execution,
//! before the HTTP layer is started. It is never consulted again.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::error::DbError;

/// Sub-codes for failures treated as temporary infrastructure trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    Unreachable,
    ConnectionRefused,
    AuthRejected,
}

impl TransientKind {
    /// The short code emitted in the per-retry diagnostic line.
    pub fn code(self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::Unreachable => "unreachable",
            TransientKind::ConnectionRefused => "connection_refused",
            TransientKind::AuthRejected => "auth_rejected",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How a single probe attempt failed, as seen by the retry loop.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The database is not there yet. Retried on a bounded budget.
    #[error("database not ready ({kind}): {source}")]
    Transient {
        kind: TransientKind,
        #[source]
        source: DbError,
    },

    /// The schema object already exists: another instance won the
    /// "ensure schema present" race. Retried without spending budget.
    #[error("schema object already exists (sqlstate {code})")]
    BenignConflict { code: String },

    /// Anything we cannot attribute to startup ordering. Fatal.
    #[error("unrecoverable database failure: {0}")]
    Unclassified(#[source] DbError),
}

enum Classification {
    Transient(TransientKind),
    Conflict(String),
    Other,
}

impl Classification {
    fn of(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Classification::Transient(TransientKind::Timeout),
            sqlx::Error::Io(io) => match io.kind() {
                std::io::ErrorKind::TimedOut => Classification::Transient(TransientKind::Timeout),
                std::io::ErrorKind::ConnectionRefused => {
                    Classification::Transient(TransientKind::ConnectionRefused)
                }
                _ => Classification::Transient(TransientKind::Unreachable),
            },
            sqlx::Error::Tls(_) => Classification::Transient(TransientKind::Unreachable),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // 57P03: the server is up but still starting.
                Some("57P03") => Classification::Transient(TransientKind::Unreachable),
                // 28000/28P01: login rejected. During compose bringup the
                // role may not exist yet, so this is retried too.
                Some("28000") | Some("28P01") => {
                    Classification::Transient(TransientKind::AuthRejected)
                }
                // 42P04/42P07: duplicate database/table. A peer instance
                // got to the schema first.
                Some(code @ ("42P04" | "42P07")) => Classification::Conflict(code.to_string()),
                _ => Classification::Other,
            },
            _ => Classification::Other,
        }
    }
}

impl From<DbError> for ProbeError {
    fn from(err: DbError) -> Self {
        let class = match &err {
            DbError::ConnectionError(e) => Classification::of(e),
            DbError::MigrationError(e) => match e {
                MigrateError::Execute(inner) => Classification::of(inner),
                MigrateError::ExecuteMigration(inner, _) => Classification::of(inner),
                _ => Classification::Other,
            },
            DbError::NotFound => Classification::Other,
        };

        match class {
            Classification::Transient(kind) => ProbeError::Transient { kind, source: err },
            Classification::Conflict(code) => ProbeError::BenignConflict { code },
            Classification::Other => ProbeError::Unclassified(err),
        }
    }
}

/// The retry budget and delays for one prober invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How many transient failures to tolerate before giving up.
    pub max_attempts: u32,
    /// Pause after a transient failure.
    pub retry_delay: Duration,
    /// Shorter pause after a benign schema conflict.
    pub conflict_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration, conflict_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
            conflict_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 30 * 5s gives a cold database ~150s to come up.
        Self::new(30, Duration::from_secs(5), Duration::from_secs(2))
    }
}

/// The prober's lifecycle. Both terminal states stay terminal: the prober
/// runs once per process and is never re-entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Probing { attempts_left: u32 },
    Succeeded,
    FatallyFailed,
}

/// What the state machine tells the driver to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Abort,
}

impl ProbeState {
    pub fn new(policy: &RetryPolicy) -> Self {
        ProbeState::Probing {
            attempts_left: policy.max_attempts,
        }
    }

    pub fn attempts_left(&self) -> Option<u32> {
        match self {
            ProbeState::Probing { attempts_left } => Some(*attempts_left),
            _ => None,
        }
    }

    pub fn on_success(&mut self) {
        *self = ProbeState::Succeeded;
    }

    /// Applies one failure to the state machine and decides what happens next.
    ///
    /// Transient failures spend budget; benign conflicts never do, which means
    /// that path has no ceiling. That asymmetry is deliberate: the conflict is
    /// expected to clear as soon as the peer's migration commits.
    pub fn on_failure(&mut self, err: &ProbeError, policy: &RetryPolicy) -> RetryDecision {
        match self {
            ProbeState::Probing { attempts_left } => match err {
                ProbeError::Transient { .. } => {
                    *attempts_left = attempts_left.saturating_sub(1);
                    if *attempts_left == 0 {
                        *self = ProbeState::FatallyFailed;
                        RetryDecision::Abort
                    } else {
                        RetryDecision::Retry(policy.retry_delay)
                    }
                }
                ProbeError::BenignConflict { .. } => RetryDecision::Retry(policy.conflict_delay),
                ProbeError::Unclassified(_) => {
                    *self = ProbeState::FatallyFailed;
                    RetryDecision::Abort
                }
            },
            ProbeState::Succeeded | ProbeState::FatallyFailed => RetryDecision::Abort,
        }
    }
}

/// Injectable delay source so the test suite never sleeps for real.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The production sleeper, backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Drives repeated probe attempts until the database is ready or the policy
/// says to give up.
pub struct ReadinessProber<S: Sleeper = TokioSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl ReadinessProber<TokioSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, TokioSleeper)
    }
}

impl<S: Sleeper> ReadinessProber<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Runs `probe` until it succeeds or the policy is exhausted.
    ///
    /// This blocks the caller for the whole wait; nothing else should be
    /// started until it returns. On success the probe's value (the connected
    /// pool, in production) is handed back to the caller.
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<T, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        let mut state = ProbeState::new(&self.policy);
        loop {
            match probe().await {
                Ok(value) => {
                    state.on_success();
                    tracing::info!("database is ready");
                    return Ok(value);
                }
                Err(err) => match state.on_failure(&err, &self.policy) {
                    RetryDecision::Retry(delay) => {
                        match &err {
                            ProbeError::Transient { kind, .. } => tracing::warn!(
                                code = kind.code(),
                                attempts_left = state.attempts_left().unwrap_or(0),
                                delay_secs = delay.as_secs(),
                                "database not ready yet, retrying"
                            ),
                            ProbeError::BenignConflict { code } => tracing::debug!(
                                code = %code,
                                "schema already exists; waiting for the peer migration to settle"
                            ),
                            ProbeError::Unclassified(_) => {}
                        }
                        self.sleeper.sleep(delay).await;
                    }
                    RetryDecision::Abort => {
                        tracing::error!(error = %err, "giving up waiting for the database");
                        return Err(err);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    impl Sleeper for &RecordingSleeper {
        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            self.slept.lock().unwrap().push(duration);
            std::future::ready(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(5), Duration::from_secs(2))
    }

    fn transient() -> ProbeError {
        ProbeError::Transient {
            kind: TransientKind::Timeout,
            source: DbError::ConnectionError(sqlx::Error::PoolTimedOut),
        }
    }

    fn conflict() -> ProbeError {
        ProbeError::BenignConflict {
            code: "42P04".into(),
        }
    }

    fn unclassified() -> ProbeError {
        ProbeError::Unclassified(DbError::NotFound)
    }

    /// Runs the prober over a scripted sequence of outcomes, returning the
    /// result, the number of attempts made, and the delays slept.
    async fn run_script(
        max_attempts: u32,
        script: Vec<Result<u32, ProbeError>>,
    ) -> (Result<u32, ProbeError>, usize, Vec<Duration>) {
        let sleeper = RecordingSleeper::default();
        let prober = ReadinessProber::with_sleeper(policy(max_attempts), &sleeper);
        let script = RefCell::new(script);
        let attempts = RefCell::new(0usize);

        let result = prober
            .run(|| {
                *attempts.borrow_mut() += 1;
                let next = script.borrow_mut().remove(0);
                async move { next }
            })
            .await;

        (result, *attempts.borrow(), sleeper.slept())
    }

    #[tokio::test]
    async fn succeeds_once_the_database_comes_up() {
        let (result, attempts, slept) = run_script(
            3,
            vec![Err(transient()), Err(transient()), Ok(7)],
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
        // One diagnostic pause per transient retry.
        assert_eq!(slept, vec![Duration::from_secs(5), Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn exhausted_budget_is_fatal_after_exactly_that_many_attempts() {
        let (result, attempts, slept) =
            run_script(2, vec![Err(transient()), Err(transient()), Ok(1)]).await;

        assert!(matches!(result, Err(ProbeError::Transient { .. })));
        assert_eq!(attempts, 2);
        assert_eq!(slept.len(), 1);
    }

    #[tokio::test]
    async fn conflicts_never_consume_the_budget() {
        // Budget of 1: a single transient failure would be fatal, so success
        // after five conflicts proves the budget was untouched.
        let mut script: Vec<Result<u32, ProbeError>> =
            (0..5).map(|_| Err(conflict())).collect();
        script.push(Ok(42));

        let (result, attempts, slept) = run_script(1, script).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 6);
        assert_eq!(slept, vec![Duration::from_secs(2); 5]);
    }

    #[tokio::test]
    async fn unclassified_failure_aborts_without_retrying() {
        let (result, attempts, slept) =
            run_script(30, vec![Err(unclassified()), Ok(1)]).await;

        assert!(matches!(result, Err(ProbeError::Unclassified(_))));
        assert_eq!(attempts, 1);
        assert!(slept.is_empty());
    }

    #[test]
    fn state_machine_terminates_when_the_last_attempt_fails() {
        let policy = policy(1);
        let mut state = ProbeState::new(&policy);

        assert_eq!(state.on_failure(&transient(), &policy), RetryDecision::Abort);
        assert_eq!(state, ProbeState::FatallyFailed);
        // Terminal states stay terminal.
        assert_eq!(state.on_failure(&conflict(), &policy), RetryDecision::Abort);
    }

    #[test]
    fn state_machine_keeps_budget_intact_across_conflicts() {
        let policy = policy(3);
        let mut state = ProbeState::new(&policy);

        for _ in 0..10 {
            assert_eq!(
                state.on_failure(&conflict(), &policy),
                RetryDecision::Retry(policy.conflict_delay)
            );
        }
        assert_eq!(state.attempts_left(), Some(3));
    }

    #[test]
    fn pool_timeout_classifies_as_transient() {
        let err = ProbeError::from(DbError::ConnectionError(sqlx::Error::PoolTimedOut));
        assert!(matches!(
            err,
            ProbeError::Transient {
                kind: TransientKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn refused_socket_classifies_as_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ProbeError::from(DbError::ConnectionError(sqlx::Error::Io(io)));
        assert!(matches!(
            err,
            ProbeError::Transient {
                kind: TransientKind::ConnectionRefused,
                ..
            }
        ));
    }

    #[test]
    fn row_not_found_is_not_a_readiness_problem() {
        let err = ProbeError::from(DbError::ConnectionError(sqlx::Error::RowNotFound));
        assert!(matches!(err, ProbeError::Unclassified(_)));
    }
}
