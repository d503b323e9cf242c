//! The immutable record produced by one experiment run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The operation returned `Err`
    Error,

    /// The operation panicked
    Panic,
}

/// A captured failure of a control or candidate operation.
///
/// Only a rendering of the failure is kept so that observations stay cheap to
/// share with publishers on other threads. The control's original error value
/// is handed back to the caller untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    pub(crate) fn error(error: &impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::Error,
            message: error.to_string(),
        }
    }

    pub(crate) fn panic(payload: &(dyn Any + Send)) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: panic_message(payload),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_panic(&self) -> bool {
        self.kind == FailureKind::Panic
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Error => write!(f, "error: {}", self.message),
            FailureKind::Panic => write!(f, "panic: {}", self.message),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// What happened when a single operation was executed.
///
/// The default measurement is the zero measurement: the value type's default,
/// a zero duration and no failure. It is what out-of-range candidate lookups
/// report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement<U> {
    value: U,
    duration: Duration,
    failure: Option<Failure>,
}

impl<U> Measurement<U> {
    pub(crate) fn new(value: U, duration: Duration, failure: Option<Failure>) -> Self {
        Self {
            value,
            duration,
            failure,
        }
    }

    /// The reported value. For a failed operation this is the cleaned-up
    /// default of the operation's result type.
    pub fn value(&self) -> &U {
        &self.value
    }

    /// Wall-clock time the operation took
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Take the reported value, e.g. out of a [`Observation::candidate_measurement`]
    pub fn into_value(self) -> U {
        self.value
    }
}

/// The result of running an experiment: its verdict, its context, and the
/// measurements of control and of every candidate.
///
/// Candidates are always reported in the order they were declared, no matter
/// the order they were executed in.
#[derive(Debug, Clone)]
pub struct Observation<U> {
    name: String,
    success: bool,
    ignored: bool,
    context: HashMap<String, String>,
    control: Measurement<U>,
    candidates: Vec<Measurement<U>>,
}

impl<U> Observation<U> {
    pub(crate) fn new(
        name: String,
        success: bool,
        ignored: bool,
        context: HashMap<String, String>,
        control: Measurement<U>,
        candidates: Vec<Measurement<U>>,
    ) -> Self {
        Self {
            name,
            success,
            ignored,
            context,
            control,
            candidates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` if every candidate matched control, or if the run was ignored
    pub fn success(&self) -> bool {
        self.success
    }

    /// `true` if an ignore predicate answered `true` (or panicked)
    pub fn ignored(&self) -> bool {
        self.ignored
    }

    pub fn control(&self) -> &Measurement<U> {
        &self.control
    }

    pub fn control_value(&self) -> &U {
        self.control.value()
    }

    pub fn control_duration(&self) -> Duration {
        self.control.duration()
    }

    pub fn control_failure(&self) -> Option<&Failure> {
        self.control.failure()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates(&self) -> &[Measurement<U>] {
        &self.candidates
    }

    pub fn candidate(&self, index: usize) -> Option<&Measurement<U>> {
        self.candidates.get(index)
    }

    /// The measurement of the candidate declared at `index`, or the zero
    /// measurement if there is no such candidate.
    pub fn candidate_measurement(&self, index: usize) -> Measurement<U>
    where
        U: Clone + Default,
    {
        self.candidate(index).cloned().unwrap_or_default()
    }

    pub fn candidate_value(&self, index: usize) -> Option<&U> {
        self.candidate(index).map(Measurement::value)
    }

    /// Duration of the candidate declared at `index`, zero if out of range
    pub fn candidate_duration(&self, index: usize) -> Duration {
        self.candidate(index)
            .map(Measurement::duration)
            .unwrap_or_default()
    }

    pub fn candidate_failure(&self, index: usize) -> Option<&Failure> {
        self.candidate(index).and_then(Measurement::failure)
    }

    /// Look up a context value recorded with `context(key, value)`
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Every context key, in no particular order
    pub fn context_keys(&self) -> Vec<&str> {
        self.context.keys().map(String::as_str).collect()
    }
}
