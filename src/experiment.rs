//! Runs one experiment end to end: gate, setup, measure in random order,
//! compare, clean up and publish.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::{debug, error, info_span, warn};

use crate::builder::{AsyncPublisher, BoxedPredicate, Compare, Operation, Publisher, Setup, Transform};
use crate::observation::{panic_message, Failure, Measurement, Observation};
use crate::publish::{Dispatch, Job};

/// Which comparison an experiment ended up with once it was built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorKind {
    /// Supplied with `compare`
    Explicit,

    /// `PartialEq` on the operation's result type
    NativeEquality,

    /// Neither was available. Candidates never match.
    Missing,
}

pub(crate) enum Comparator<'a, T> {
    Explicit(Compare<'a, T>),
    NativeEquality(Compare<'a, T>),
    Missing,
}

impl<T> Comparator<'_, T> {
    fn kind(&self) -> ComparatorKind {
        match self {
            Comparator::Explicit(_) => ComparatorKind::Explicit,
            Comparator::NativeEquality(_) => ComparatorKind::NativeEquality,
            Comparator::Missing => ComparatorKind::Missing,
        }
    }

    fn matches(&self, control: &T, candidate: &T) -> bool {
        let compare = match self {
            Comparator::Explicit(compare) | Comparator::NativeEquality(compare) => compare,
            Comparator::Missing => return false,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| compare(control, candidate))) {
            Ok(matched) => matched,
            Err(payload) => {
                warn!(panic = %panic_message(payload.as_ref()), "compare panicked, treating as mismatch");
                false
            }
        }
    }
}

/// How an operation failed, keeping what is needed to hand the failure back
/// to the caller
enum Caught<E> {
    Error(E),
    Panic(Box<dyn Any + Send>),
}

struct Measured<T, E> {
    value: T,
    duration: Duration,
    caught: Option<Caught<E>>,
}

impl<T, E> Measured<T, E> {
    fn failed(&self) -> bool {
        self.caught.is_some()
    }

    fn report<U>(&self, cleanup: &Transform<'_, T, U>) -> Measurement<U>
    where
        U: Default,
        E: Display,
    {
        let value = match panic::catch_unwind(AssertUnwindSafe(|| cleanup(&self.value))) {
            Ok(value) => value,
            Err(payload) => {
                warn!(panic = %panic_message(payload.as_ref()), "cleanup panicked, reporting default value");
                U::default()
            }
        };

        let failure = self.caught.as_ref().map(|caught| match caught {
            Caught::Error(error) => Failure::error(error),
            Caught::Panic(payload) => Failure::panic(payload.as_ref()),
        });

        Measurement::new(value, self.duration, failure)
    }
}

fn measure<T: Default, E>(operation: Operation<'_, T, E>) -> Measured<T, E> {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
    let duration = start.elapsed();

    let (value, caught) = match outcome {
        Ok(Ok(value)) => (value, None),
        Ok(Err(error)) => (T::default(), Some(Caught::Error(error))),
        Err(payload) => (T::default(), Some(Caught::Panic(payload))),
    };

    Measured {
        value,
        duration,
        caught,
    }
}

/// `true` only if every predicate answers `true`. A panicking predicate closes
/// the gate.
fn all_pass(name: &str, predicates: &mut [BoxedPredicate<'_>]) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        predicates.iter_mut().all(|predicate| predicate.evaluate())
    }));

    outcome.unwrap_or_else(|payload| {
        warn!(experiment = name, panic = %panic_message(payload.as_ref()), "run_if predicate panicked, skipping experiment");
        false
    })
}

/// `true` if any predicate answers `true`. Every predicate is evaluated, even
/// after one has answered `true`. A panicking predicate counts as ignoring the
/// run.
fn any_pass(name: &str, predicates: &mut [BoxedPredicate<'_>]) -> bool {
    predicates.iter_mut().fold(false, |ignored, predicate| {
        let answer = panic::catch_unwind(AssertUnwindSafe(|| predicate.evaluate())).unwrap_or_else(|payload| {
            warn!(experiment = name, panic = %panic_message(payload.as_ref()), "ignore predicate panicked, ignoring run");
            true
        });
        answer | ignored
    })
}

/// An immutable, ready to run experiment, produced by
/// [`ExperimentBuilder::build`](crate::ExperimentBuilder::build).
///
/// Running consumes the experiment: every operation is executed at most once.
pub struct Experiment<'a, T, U = T, E = anyhow::Error> {
    pub(crate) name: String,
    pub(crate) context: HashMap<String, String>,
    pub(crate) setups: Vec<Setup<'a, E>>,
    pub(crate) control: Operation<'a, T, E>,
    pub(crate) candidates: Vec<Operation<'a, T, E>>,
    pub(crate) run_if: Vec<BoxedPredicate<'a>>,
    pub(crate) ignore: Vec<BoxedPredicate<'a>>,
    pub(crate) publishers: Vec<Publisher<'a, U>>,
    pub(crate) async_publishers: Vec<AsyncPublisher<'a, U>>,
    pub(crate) comparator: Comparator<'a, T>,
    pub(crate) cleanup: Transform<'a, T, U>,
}

impl<'a, T, U, E> Experiment<'a, T, U, E>
where
    T: Default,
    U: Default,
    E: Display,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn comparator_kind(&self) -> ComparatorKind {
        self.comparator.kind()
    }

    /// Run the experiment and return control's result.
    ///
    /// When every `run_if` predicate passes, setup steps run in order, then
    /// control and every candidate are executed exactly once in an order
    /// shuffled with `rng`. The resulting [`Observation`] is handed to every
    /// synchronous publisher on this thread and to every asynchronous
    /// publisher through `dispatcher`. Control's error, or its panic, reaches
    /// the caller only after publishing.
    ///
    /// When the gate is closed only control runs, and nothing is published.
    pub fn run(self, rng: &mut dyn RngCore, dispatcher: &dyn Dispatch) -> Result<T, E> {
        let Experiment {
            name,
            context,
            setups,
            control,
            candidates,
            mut run_if,
            mut ignore,
            mut publishers,
            async_publishers,
            comparator,
            cleanup,
        } = self;

        let span = info_span!("experiment", name = %name, candidates = candidates.len());
        let _enter = span.enter();

        if !all_pass(&name, &mut run_if) {
            debug!("experiment disabled, running control only");
            metrics::counter!("scientist_experiment_runs_total", "experiment" => name, "outcome" => "skipped")
                .increment(1);
            return control();
        }

        for setup in setups {
            setup()?;
        }

        let (control, candidates) = measure_all(&name, control, candidates, rng);

        let matched = candidates.iter().all(|candidate| {
            candidate.failed() == control.failed()
                && comparator.matches(&control.value, &candidate.value)
        });
        let ignored = any_pass(&name, &mut ignore);
        let success = ignored || matched;

        let outcome = if matched {
            "matched"
        } else if ignored {
            "ignored"
        } else {
            debug!("candidates did not match control");
            "mismatched"
        };
        metrics::counter!("scientist_experiment_runs_total", "experiment" => name.clone(), "outcome" => outcome)
            .increment(1);

        let observation = Observation::new(
            name.clone(),
            success,
            ignored,
            context,
            control.report(&cleanup),
            candidates
                .iter()
                .map(|candidate| candidate.report(&cleanup))
                .collect(),
        );

        for publisher in publishers.iter_mut() {
            let published = panic::catch_unwind(AssertUnwindSafe(|| publisher(&observation)));
            if let Err(payload) = published {
                error!(panic = %panic_message(payload.as_ref()), "publisher panicked, continuing with the remaining publishers");
                metrics::counter!("scientist_publisher_failures_total", "experiment" => name.clone(), "mode" => "sync")
                    .increment(1);
            }
        }

        if !async_publishers.is_empty() {
            let observation = Arc::new(observation);
            for publisher in async_publishers {
                dispatcher.dispatch(guarded(name.clone(), publisher(&observation)));
            }
        }

        match control.caught {
            None => Ok(control.value),
            Some(Caught::Error(error)) => Err(error),
            Some(Caught::Panic(payload)) => panic::resume_unwind(payload),
        }
    }
}

/// Wrap an asynchronous publisher so its panic is logged and counted against
/// `experiment` wherever the dispatcher runs it.
fn guarded(experiment: String, job: Job) -> Job {
    Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(experiment = %experiment, panic = %panic_message(payload.as_ref()), "asynchronous publisher panicked");
            metrics::counter!("scientist_publisher_failures_total", "experiment" => experiment, "mode" => "async")
                .increment(1);
        }
    })
}

/// Execute control and every candidate once, in random order. Candidates come
/// back in declaration order.
fn measure_all<'a, T: Default, E>(
    name: &str,
    control: Operation<'a, T, E>,
    candidates: Vec<Operation<'a, T, E>>,
    rng: &mut dyn RngCore,
) -> (Measured<T, E>, Vec<Measured<T, E>>) {
    let mut operations: Vec<Option<Operation<'a, T, E>>> = std::iter::once(control)
        .chain(candidates)
        .map(Some)
        .collect();

    let mut order: Vec<usize> = (0..operations.len()).collect();
    order.shuffle(rng);

    let mut measured: Vec<Option<Measured<T, E>>> = operations.iter().map(|_| None).collect();
    for index in order {
        if let Some(operation) = operations[index].take() {
            let result = measure(operation);
            let variant = if index == 0 { "control" } else { "candidate" };
            metrics::histogram!("scientist_variant_duration_seconds", "experiment" => name.to_string(), "variant" => variant)
                .record(result.duration.as_secs_f64());
            measured[index] = Some(result);
        }
    }

    let mut measured = measured.into_iter().flatten();
    let control = measured
        .next()
        .unwrap_or_else(|| unreachable!("control is always measured"));
    (control, measured.collect())
}
