use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use scientist::{FailureKind, Job, Observation, Scientist, TokioDispatcher};

fn published<U>(seen: RefCell<Option<Observation<U>>>) -> Observation<U> {
    seen.into_inner().expect("the observation was published")
}

#[test]
fn publishes_observation_fields() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(42));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    let o = published(seen);
    assert_eq!(o.name(), "test");
    assert!(o.success());
    assert!(!o.ignored());
    assert!(o.control_failure().is_none());
    assert!(o.candidate_failure(0).is_none());
    assert_eq!(*o.control_value(), 42);
    assert_eq!(o.candidate_value(0), Some(&42));
    assert_eq!(res, 42);
}

#[test]
fn records_durations() {
    let seen = RefCell::new(None);
    Scientist::<i32>::science("durations", |e| {
        e.use_control(|| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(1)
        });
        e.try_candidate(|| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(1)
        });
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    let o = published(seen);
    assert!(o.control_duration() >= Duration::from_millis(5));
    assert!(o.candidate_duration(0) >= Duration::from_millis(5));
}

#[test]
fn publishes_result_if_experiment_unsuccessful() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(1));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    let o = published(seen);
    assert!(!o.success());
    assert!(!o.ignored());
    assert_eq!(o.candidate_value(0), Some(&1));
    assert_eq!(*o.control_value(), 42);
    assert_eq!(res, 42);
}

#[test]
fn publishes_observation_if_candidate_fails() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Err(anyhow!("candidate broke")));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    let o = published(seen);
    assert!(!o.success());
    assert!(o.control_failure().is_none());
    let failure = o.candidate_failure(0).unwrap();
    assert_eq!(failure.kind(), FailureKind::Error);
    assert_eq!(failure.message(), "candidate broke");
    assert_eq!(o.candidate_value(0), Some(&0));
    assert_eq!(res, 42);
}

#[test]
fn candidate_panic_never_reaches_the_caller() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("panicking candidate", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| -> anyhow::Result<i32> { panic!("candidate exploded") });
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    let o = published(seen);
    assert!(!o.success());
    let failure = o.candidate_failure(0).unwrap();
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "candidate exploded");
    assert_eq!(res, 42);
}

#[test]
fn returns_control_error_after_publishing() {
    let seen = RefCell::new(None);
    let err = Scientist::<i32>::science("", |e| {
        e.use_control(|| Err(anyhow!("control broke")));
        e.try_candidate(|| Ok(0));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap_err();

    let o = published(seen);
    assert!(!o.success());
    assert_eq!(o.control_failure().unwrap().message(), "control broke");
    assert!(o.candidate_failure(0).is_none());
    assert_eq!(err.to_string(), "control broke");
}

#[derive(Debug, PartialEq)]
struct Timeout(u32);

impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out after {}ms", self.0)
    }
}

impl From<scientist::ConfigError> for Timeout {
    fn from(_: scientist::ConfigError) -> Self {
        Timeout(0)
    }
}

#[test]
fn returns_the_same_control_error_value() {
    let seen = RefCell::new(None);
    let err = Scientist::<i32, i32, Timeout>::science("typed", |e| {
        e.use_control(|| Err(Timeout(250)));
        e.try_candidate(|| Ok(1));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap_err();

    assert_eq!(err, Timeout(250));
    assert_eq!(
        published(seen).control_failure().unwrap().message(),
        "timed out after 250ms"
    );
}

#[test]
fn resumes_control_panic_after_publishing() {
    let seen = RefCell::new(None);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Scientist::<i32>::science("", |e| {
            e.use_control(|| -> anyhow::Result<i32> { panic!("control exploded") });
            e.try_candidate(|| Ok(0));
            e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
        })
    }));

    let o = published(seen);
    let failure = o.control_failure().unwrap();
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "control exploded");
    assert!(!o.success());
    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"control exploded"));
}

#[test]
fn success_if_both_fail() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("", |e| {
        e.use_control(|| Err(anyhow!("control")));
        e.try_candidate(|| Err(anyhow!("candidate")));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    });

    assert!(res.is_err());
    let o = published(seen);
    assert!(o.success());
    assert_eq!(o.control_failure().unwrap().message(), "control");
    assert_eq!(o.candidate_failure(0).unwrap().message(), "candidate");
}

#[test]
fn multiple_publishers_run_in_registration_order() {
    let order = RefCell::new(Vec::new());
    Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(42));
        e.publish(|_| order.borrow_mut().push("a"));
        e.publish(|_| order.borrow_mut().push("b"));
    })
    .unwrap();

    assert_eq!(order.into_inner(), vec!["a", "b"]);
}

#[test]
fn failed_checks_inside_a_publisher_do_not_fail_the_run() {
    let seen = RefCell::new(None);
    let res = Scientist::<i32>::science("swallowed", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(1));
        e.publish(|o| assert!(o.success()));
        e.publish(|o| *seen.borrow_mut() = Some(o.clone()));
    })
    .unwrap();

    assert_eq!(res, 42);
    let o = published(seen);
    assert!(!o.success());
    assert_eq!(o.candidate_value(0), Some(&1));
}

#[test]
fn panicking_publisher_does_not_stop_the_others() {
    let second = Cell::new(false);
    let res = Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(42));
        e.publish(|_| panic!("first publisher"));
        e.publish(|_| second.set(true));
    })
    .unwrap();

    assert!(second.get());
    assert_eq!(res, 42);
}

#[test]
fn async_publishes() {
    let (tx, rx) = mpsc::channel();
    Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(42));
        e.publish_async(move |o: &Observation<i32>| {
            tx.send((o.name().to_string(), o.success())).unwrap();
        });
    })
    .unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ("test".to_string(), true)
    );
}

#[test]
fn async_publish_does_not_block() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    let value = Scientist::<i32>::science("test", |e| {
        e.use_control(|| Ok(42));
        e.try_candidate(|| Ok(42));
        e.publish_async(move |_| {
            release_rx.recv().unwrap();
            done_tx.send(()).unwrap();
        });
    })
    .unwrap();

    assert_eq!(value, 42);
    assert!(done_rx.try_recv().is_err());
    release_tx.send(()).unwrap();
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn async_publishers_are_deferred_to_the_dispatcher() {
    let jobs: Arc<Mutex<Vec<Job>>> = Arc::default();
    let queue = Arc::clone(&jobs);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let value = Scientist::<i32>::new()
        .with_dispatcher(move |job: Job| queue.lock().unwrap().push(job))
        .run("deferred", |e| {
            e.use_control(|| Ok(42));
            e.try_candidate(|| Ok(1));
            e.publish_async(move |o| sink.lock().unwrap().push(*o.candidate_value(0).unwrap()));
        })
        .unwrap();

    assert_eq!(value, 42);
    assert!(seen.lock().unwrap().is_empty());

    let pending: Vec<Job> = jobs.lock().unwrap().drain(..).collect();
    assert_eq!(pending.len(), 1);
    for job in pending {
        job();
    }
    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_publishes_inside_a_runtime() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let value = Scientist::<i32>::new()
        .with_dispatcher(TokioDispatcher::with_handle(tokio::runtime::Handle::current()))
        .run("in runtime", |e| {
            e.use_control(|| Ok(7));
            e.try_candidate(|| Ok(8));
            e.publish_async(move |o| {
                let _ = tx.send(o.success());
            });
        })
        .unwrap();

    assert_eq!(value, 7);
    assert!(!rx.await.unwrap());
}
