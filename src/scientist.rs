use std::fmt::{self, Display};
use std::marker::PhantomData;

use rand::RngCore;

use crate::builder::ExperimentBuilder;
use crate::publish::{Dispatch, TokioDispatcher};
use crate::ConfigError;

/// The entry point: build an experiment with a setup callback, run it, and
/// hand back control's result.
///
/// `T` is the type control and candidates return, `U` the type reported to
/// publishers (see [`ExperimentBuilder::cleanup`]), and `E` the error type of
/// the operations. A missing control surfaces as `E::from(ConfigError)`.
///
/// ```
/// use std::cell::Cell;
/// use scientist::Scientist;
///
/// let success = Cell::new(false);
/// let value = Scientist::<i32>::science("answer", |e| {
///     e.use_control(|| Ok(42));
///     e.try_candidate(|| Ok(6 * 7));
///     e.publish(|observation| success.set(observation.success()));
/// })
/// .unwrap();
///
/// assert_eq!(value, 42);
/// assert!(success.get());
/// ```
pub struct Scientist<T, U = T, E = anyhow::Error> {
    rng: Box<dyn RngCore>,
    dispatcher: Box<dyn Dispatch>,
    _types: PhantomData<fn() -> (T, U, E)>,
}

impl<T, U, E> Scientist<T, U, E>
where
    T: Default + 'static,
    U: Clone + Default + 'static,
    E: Display + From<ConfigError>,
{
    /// A scientist shuffling with the thread-local RNG and publishing
    /// asynchronously through a [`TokioDispatcher`]
    pub fn new() -> Self {
        Self {
            rng: Box::new(rand::thread_rng()),
            dispatcher: Box::new(TokioDispatcher::new()),
            _types: PhantomData,
        }
    }

    /// Shuffle execution order with `rng`, e.g. a seeded `StdRng` in tests
    pub fn with_rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Run asynchronous publishers through `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: impl Dispatch + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    /// Run an experiment with the default scientist, comparing values with
    /// `==` unless the setup callback supplies `compare`.
    pub fn science<'a, F>(name: impl Into<String>, setup: F) -> Result<T, E>
    where
        F: FnOnce(&mut ExperimentBuilder<'a, T, U, E>),
        T: PartialEq,
    {
        Self::new().run(name, setup)
    }

    /// Like [`science`](Self::science) for result types without `PartialEq`.
    /// Unless the setup callback supplies `compare`, runs are only successful
    /// when ignored.
    pub fn science_without_eq<'a, F>(name: impl Into<String>, setup: F) -> Result<T, E>
    where
        F: FnOnce(&mut ExperimentBuilder<'a, T, U, E>),
    {
        Self::new().run_without_eq(name, setup)
    }

    pub fn run<'a, F>(&mut self, name: impl Into<String>, setup: F) -> Result<T, E>
    where
        F: FnOnce(&mut ExperimentBuilder<'a, T, U, E>),
        T: PartialEq,
    {
        let mut builder = ExperimentBuilder::new(name);
        setup(&mut builder);
        let experiment = builder.build_with_native_eq()?;
        experiment.run(self.rng.as_mut(), self.dispatcher.as_ref())
    }

    pub fn run_without_eq<'a, F>(&mut self, name: impl Into<String>, setup: F) -> Result<T, E>
    where
        F: FnOnce(&mut ExperimentBuilder<'a, T, U, E>),
    {
        let mut builder = ExperimentBuilder::new(name);
        setup(&mut builder);
        let experiment = builder.build()?;
        experiment.run(self.rng.as_mut(), self.dispatcher.as_ref())
    }
}

impl<T, U, E> Default for Scientist<T, U, E>
where
    T: Default + 'static,
    U: Clone + Default + 'static,
    E: Display + From<ConfigError>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U, E> fmt::Debug for Scientist<T, U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scientist").finish_non_exhaustive()
    }
}
