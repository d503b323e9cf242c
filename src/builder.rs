//! Collects the pieces of an experiment before it is frozen into an
//! [`Experiment`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::experiment::{Comparator, Experiment};
use crate::observation::Observation;
use crate::publish::Job;
use crate::rollout::Predicate;
use crate::ConfigError;

/// A control or candidate implementation
pub type Operation<'a, T, E> = Box<dyn FnOnce() -> Result<T, E> + 'a>;

/// Decides whether a candidate's value matches control's
pub type Compare<'a, T> = Box<dyn Fn(&T, &T) -> bool + 'a>;

/// Reshapes an operation's value into the type reported to publishers
pub type Transform<'a, T, U> = Box<dyn Fn(&T) -> U + 'a>;

/// Consumes an observation on the calling thread
pub type Publisher<'a, U> = Box<dyn FnMut(&Observation<U>) + 'a>;

/// Runs before any variant is measured
pub type Setup<'a, E> = Box<dyn FnOnce() -> Result<(), E> + 'a>;

pub(crate) type BoxedPredicate<'a> = Box<dyn Predicate + 'a>;

/// Turns the shared observation into a job that can run on another thread
pub(crate) type AsyncPublisher<'a, U> = Box<dyn FnOnce(&Arc<Observation<U>>) -> Job + 'a>;

/// Mutable collector for everything an experiment needs. An
/// `ExperimentBuilder` is handed to the setup callback given to
/// [`Scientist::science`](crate::Scientist::science); it can also be driven
/// directly and turned into an [`Experiment`] with [`build`](Self::build).
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use scientist::{ExperimentBuilder, TokioDispatcher};
///
/// let mut builder = ExperimentBuilder::<i32>::new("lookup");
/// builder
///     .use_control(|| Ok(42))
///     .try_candidate(|| Ok(42))
///     .context("region", "eu-west-1");
///
/// let experiment = builder.build_with_native_eq().unwrap();
/// let value = experiment
///     .run(&mut StdRng::seed_from_u64(1), &TokioDispatcher::new())
///     .unwrap();
/// assert_eq!(value, 42);
/// ```
pub struct ExperimentBuilder<'a, T, U = T, E = anyhow::Error> {
    name: String,
    context: HashMap<String, String>,
    setups: Vec<Setup<'a, E>>,
    control: Option<Operation<'a, T, E>>,
    candidates: Vec<Operation<'a, T, E>>,
    run_if: Vec<BoxedPredicate<'a>>,
    ignore: Vec<BoxedPredicate<'a>>,
    publishers: Vec<Publisher<'a, U>>,
    async_publishers: Vec<AsyncPublisher<'a, U>>,
    compare: Option<Compare<'a, T>>,
    cleanup: Option<Transform<'a, T, U>>,
}

impl<'a, T, U, E> ExperimentBuilder<'a, T, U, E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: HashMap::new(),
            setups: Vec::new(),
            control: None,
            candidates: Vec::new(),
            run_if: Vec::new(),
            ignore: Vec::new(),
            publishers: Vec::new(),
            async_publishers: Vec::new(),
            compare: None,
            cleanup: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the control operation. Its result is what the caller receives.
    /// Calling this again replaces the previous control.
    pub fn use_control<F>(&mut self, control: F) -> &mut Self
    where
        F: FnOnce() -> Result<T, E> + 'a,
    {
        self.control = Some(Box::new(control));
        self
    }

    /// Add a candidate operation. Candidates are reported in the order they
    /// were added.
    pub fn try_candidate<F>(&mut self, candidate: F) -> &mut Self
    where
        F: FnOnce() -> Result<T, E> + 'a,
    {
        self.candidates.push(Box::new(candidate));
        self
    }

    /// Mark the run as successful whenever `predicate` answers `true`
    pub fn ignore<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Predicate + 'a,
    {
        self.ignore.push(Box::new(predicate));
        self
    }

    /// Only run the experiment when every `run_if` predicate answers `true`
    pub fn run_if<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Predicate + 'a,
    {
        self.run_if.push(Box::new(predicate));
        self
    }

    /// Register a publisher invoked on the calling thread before the
    /// experiment returns
    pub fn publish<P>(&mut self, publisher: P) -> &mut Self
    where
        P: FnMut(&Observation<U>) + 'a,
    {
        self.publishers.push(Box::new(publisher));
        self
    }

    /// Register a publisher dispatched in the background. The experiment does
    /// not wait for it.
    pub fn publish_async<P>(&mut self, publisher: P) -> &mut Self
    where
        P: FnOnce(&Observation<U>) + Send + 'static,
        U: Send + Sync + 'static,
    {
        self.async_publishers
            .push(Box::new(move |observation: &Arc<Observation<U>>| {
                let observation = Arc::clone(observation);
                Box::new(move || publisher(&observation)) as Job
            }));
        self
    }

    /// Replace the comparison used to decide whether a candidate matches
    pub fn compare<F>(&mut self, compare: F) -> &mut Self
    where
        F: Fn(&T, &T) -> bool + 'a,
    {
        self.compare = Some(Box::new(compare));
        self
    }

    /// Replace the transform applied to every value before it is published
    pub fn cleanup<F>(&mut self, cleanup: F) -> &mut Self
    where
        F: Fn(&T) -> U + 'a,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Attach a key/value pair to the observation, replacing any previous
    /// value for `key`
    pub fn context(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Add a setup step. Setup steps run in order, only when the experiment
    /// is enabled, before anything is measured.
    pub fn before_run<F>(&mut self, setup: F) -> &mut Self
    where
        F: FnOnce() -> Result<(), E> + 'a,
    {
        self.setups.push(Box::new(setup));
        self
    }
}

impl<'a, T, U, E> ExperimentBuilder<'a, T, U, E>
where
    T: 'static,
    U: Clone + Default + 'static,
{
    /// Freeze the configuration. Without an explicit `compare`, candidates
    /// never match.
    pub fn build(self) -> Result<Experiment<'a, T, U, E>, ConfigError> {
        self.finish(None)
    }

    /// Freeze the configuration, comparing values with `==` unless an
    /// explicit `compare` was supplied.
    pub fn build_with_native_eq(self) -> Result<Experiment<'a, T, U, E>, ConfigError>
    where
        T: PartialEq,
    {
        self.finish(Some(Box::new(|control: &T, candidate: &T| {
            control == candidate
        })))
    }

    fn finish(self, native_eq: Option<Compare<'a, T>>) -> Result<Experiment<'a, T, U, E>, ConfigError> {
        let control = self.control.ok_or_else(|| ConfigError::MissingControl {
            experiment: self.name.clone(),
        })?;

        let comparator = match (self.compare, native_eq) {
            (Some(compare), _) => Comparator::Explicit(compare),
            (None, Some(eq)) => Comparator::NativeEquality(eq),
            (None, None) => Comparator::Missing,
        };

        let cleanup: Transform<'a, T, U> = match self.cleanup {
            Some(cleanup) => cleanup,
            None => Box::new(|value: &T| report_as::<T, U>(value)),
        };

        Ok(Experiment {
            name: self.name,
            context: self.context,
            setups: self.setups,
            control,
            candidates: self.candidates,
            run_if: self.run_if,
            ignore: self.ignore,
            publishers: self.publishers,
            async_publishers: self.async_publishers,
            comparator,
            cleanup,
        })
    }
}

/// Identity when the reported type is the operation's own type, the reported
/// type's default otherwise
fn report_as<T: 'static, U: Clone + Default + 'static>(value: &T) -> U {
    (value as &dyn Any)
        .downcast_ref::<U>()
        .cloned()
        .unwrap_or_default()
}
