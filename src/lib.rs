//! Scientist lets you try out a new implementation of some behavior (a
//! "candidate") against the implementation you already trust (the "control")
//! on real traffic, without changing what callers see. Callers always get
//! control's value, or control's error. Control and every candidate are run,
//! timed and compared, and the result is handed to publishers as an
//! [`Observation`].
//!
//! Let's imagine that we already have a function called `load_data_from_db`,
//! which loads some data from a database. We want to refactor this to instead
//! load the same data from redis. We write a new function called
//! `load_data_from_redis` to accomplish the same task, but with redis instead
//! of a DB. We want to run the redis version on only a small percentage of
//! calls, and we want to know whenever the redis data doesn't match the DB
//! data, while callers keep receiving the DB data. Here's how we can use
//! [`Scientist`] to do this.
//!
//! ```
//! use scientist::{rollout::Percent, Scientist};
//!
//! fn load_data_from_db(id: i32) -> anyhow::Result<i32> { Ok(id) }
//! fn load_data_from_redis(id: i32) -> anyhow::Result<i32> { Ok(id) }
//!
//! let id = 4;
//! let result = Scientist::<i32>::science("redis migration", |e| {
//!     e.use_control(|| load_data_from_db(id));
//!     e.try_candidate(|| load_data_from_redis(id));
//!     e.run_if(Percent::new(0.5));
//!     e.context("id", id.to_string());
//!     e.publish(|observation| {
//!         if !observation.success() {
//!             eprintln!(
//!                 "DB & Redis data differ - db={}, redis={}",
//!                 observation.control_value(),
//!                 observation.candidate_value(0).unwrap_or(&0),
//!             );
//!         }
//!     });
//! });
//!
//! assert_eq!(result.unwrap(), 4);
//! ```
//!
//! Control and candidates run one after the other on the calling thread, in
//! a random order, so an experiment costs the sum of its variants' run times.
//! Publishers registered with `publish_async` run in the background; see
//! [`publish`] for where.

pub mod builder;
pub mod error;
pub mod experiment;
pub mod observation;
pub mod publish;
pub mod rollout;
pub mod scientist;

pub use builder::ExperimentBuilder;
pub use error::ConfigError;
pub use experiment::{ComparatorKind, Experiment};
pub use observation::{Failure, FailureKind, Measurement, Observation};
pub use publish::{Dispatch, Job, TokioDispatcher};
pub use rollout::Predicate;
pub use scientist::Scientist;
