use rand::Rng;

/// A yes/no question asked before or after an experiment runs.
///
/// Predicates registered with `run_if` gate the whole experiment: every one of
/// them must answer `true` for the candidates to run. Predicates registered
/// with `ignore` mark a run as uninteresting: if any of them answers `true`
/// the observation is reported as successful regardless of mismatches.
///
/// A predicate that panics is treated as a failed predicate. For gating that
/// means the experiment is skipped, for ignoring it means the run is ignored.
pub trait Predicate {
    /// Answer the question for one run. Called at most once per run.
    fn evaluate(&mut self) -> bool;
}

impl<F> Predicate for F
where
    F: FnMut() -> bool,
{
    fn evaluate(&mut self) -> bool {
        self()
    }
}

/// The simplest rollout strategy, a floating point number between 0 and 100 that
/// represents the percentage of calls which should run the experiment. Every
/// other call goes straight to the control operation.
///
/// ```
/// use scientist::{rollout::Percent, Scientist};
///
/// let value = Scientist::<i32>::science("half the traffic", |e| {
///     e.use_control(|| Ok(1));
///     e.try_candidate(|| Ok(1));
///     e.run_if(Percent::new(50.0));
/// })
/// .unwrap();
///
/// assert_eq!(value, 1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Percent(f64);

impl Percent {
    /// Create a new rollout Percent
    pub fn new(percent: f64) -> Self {
        Self(percent / 100.0)
    }

    /// The fraction of calls in `[0, 1]` this rollout admits
    pub fn fraction(&self) -> f64 {
        self.0
    }
}

impl Predicate for Percent {
    fn evaluate(&mut self) -> bool {
        let mut rng = rand::thread_rng();

        rng.gen::<f64>() < self.0
    }
}
