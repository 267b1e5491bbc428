use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cause::Cause;
use crate::effect::{Effect, TagHandler, TaggedError, UnknownError};
use crate::runtime::{run_promise, run_sync};

#[derive(Debug, PartialEq)]
enum AppError {
    Parse(String),
    Request(String),
}

impl TaggedError for AppError {
    fn tag(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "ParseError",
            AppError::Request(_) => "RequestError",
        }
    }
}

#[test]
fn succeed_then_map_chain() {
    let effect = Effect::<_, String>::succeed(5).map(|x| x + 1).map(|x| x * 2);
    assert_eq!(run_sync(effect).ok(), Some(12));
}

#[test]
fn and_then_sequences_and_short_circuits() {
    let effect = Effect::<_, String>::succeed(5)
        .and_then(|x| Effect::fail(format!("bad: {x}")))
        .and_then(|x: i32| Effect::succeed(x + 1));
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"bad: 5".to_string()));
}

#[test]
fn construction_is_lazy() {
    let ran = Arc::new(AtomicUsize::new(0));
    let probe = ran.clone();
    let effect = Effect::<_, String>::sync(move || {
        probe.fetch_add(1, Ordering::SeqCst);
        42
    });
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(run_sync(effect).ok(), Some(42));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn suspend_defers_effect_construction() {
    let built = Arc::new(AtomicUsize::new(0));
    let probe = built.clone();
    let effect = Effect::<_, String>::suspend(move || {
        probe.fetch_add(1, Ordering::SeqCst);
        Effect::succeed(1)
    });
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(run_sync(effect).ok(), Some(1));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn attempt_routes_results_to_both_channels() {
    let ok = Effect::attempt(|| Ok::<_, String>(7));
    assert_eq!(run_sync(ok).ok(), Some(7));

    let err = Effect::<i32, _>::attempt(|| Err("nope".to_string()));
    let cause = run_sync(err).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"nope".to_string()));
}

#[test]
fn from_result_lifts_both_variants() {
    assert_eq!(run_sync(Effect::<_, String>::from_result(Ok(3))).ok(), Some(3));
    let cause = run_sync(Effect::<i32, _>::from_result(Err("e".to_string()))).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"e".to_string()));
}

#[test]
fn zip_pairs_in_order() {
    let effect = Effect::<_, String>::succeed(1).zip(Effect::succeed("two"));
    assert_eq!(run_sync(effect).ok(), Some((1, "two")));
}

#[test]
fn zip_with_combines() {
    let effect =
        Effect::<_, String>::succeed(6).zip_with(Effect::succeed(7), |a, b| a * b);
    assert_eq!(run_sync(effect).ok(), Some(42));
}

#[test]
fn zip_fails_with_first_failure() {
    let effect = Effect::<i32, _>::fail("left".to_string())
        .zip(Effect::<i32, _>::fail("right".to_string()));
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"left".to_string()));
}

#[test]
fn tap_observes_without_changing_the_value() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = seen.clone();
    let effect = Effect::<_, String>::succeed(9).tap(move |v| {
        probe.lock().unwrap().push(*v);
        Effect::unit()
    });
    assert_eq!(run_sync(effect).ok(), Some(9));
    assert_eq!(*seen.lock().unwrap(), vec![9]);
}

#[test]
fn tap_failure_fails_the_whole_effect() {
    let effect = Effect::<_, String>::succeed(9).tap(|_| Effect::fail("tap broke".to_string()));
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"tap broke".to_string()));
}

#[test]
fn check_accepts_and_rejects() {
    let ok = Effect::<_, String>::succeed(20).check(|age| *age >= 18, || "too young".into());
    assert_eq!(run_sync(ok).ok(), Some(20));

    let rejected =
        Effect::<_, String>::succeed(15).check(|age| *age >= 18, || "too young".into());
    let cause = run_sync(rejected).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"too young".to_string()));
}

#[test]
fn map_err_rewrites_only_expected_failures() {
    let effect = Effect::<i32, _>::fail(404).map_err(|code| format!("status {code}"));
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"status 404".to_string()));
}

#[test]
fn map_err_passes_defects_through() {
    let effect = Effect::<i32, String>::die("bug").map_err(|e| format!("wrapped {e}"));
    let cause = run_sync(effect).unwrap_err();
    assert!(cause.is_die());
    assert!(cause.failure_option().is_none());
}

#[test]
fn catch_all_recovers_expected_failures() {
    let effect = Effect::<i32, String>::fail("boom".to_string())
        .catch_all(|e: String| Effect::<_, String>::succeed(e.len() as i32));
    assert_eq!(run_sync(effect).ok(), Some(4));
}

#[test]
fn catch_all_does_not_see_defects() {
    let handled = Arc::new(AtomicUsize::new(0));
    let probe = handled.clone();
    let effect = Effect::<i32, String>::die("bug").catch_all(move |_| {
        probe.fetch_add(1, Ordering::SeqCst);
        Effect::<_, String>::succeed(0)
    });
    let cause = run_sync(effect).unwrap_err();
    assert!(cause.is_die());
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[test]
fn or_else_recovers_with_same_error_type() {
    let effect =
        Effect::<i32, String>::fail("first".to_string()).or_else(|_| Effect::succeed(1));
    assert_eq!(run_sync(effect).ok(), Some(1));
}

#[test]
fn catch_all_cause_sees_defects() {
    let effect = Effect::<i32, String>::die("bug").catch_all_cause(|cause| {
        if cause.is_die() {
            Effect::<_, String>::succeed(-1)
        } else {
            Effect::succeed(0)
        }
    });
    assert_eq!(run_sync(effect).ok(), Some(-1));
}

#[test]
fn tap_error_observes_and_reraises() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = seen.clone();
    let effect = Effect::<i32, String>::fail("boom".to_string()).tap_error(move |e| {
        probe.lock().unwrap().push(e.clone());
        Effect::unit()
    });
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"boom".to_string()));
    assert_eq!(*seen.lock().unwrap(), vec!["boom".to_string()]);
}

#[test]
fn tap_defect_fires_only_for_defects() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let probe = seen.clone();
    let defect = Effect::<i32, String>::die("bug").tap_defect(move |d| {
        probe.lock().unwrap().push(d.message().to_string());
        Effect::unit()
    });
    let cause = run_sync(defect).unwrap_err();
    assert!(cause.is_die());
    assert_eq!(*seen.lock().unwrap(), vec!["bug".to_string()]);

    let probe = seen.clone();
    let failure = Effect::<i32, String>::fail("boom".to_string()).tap_defect(move |d| {
        probe.lock().unwrap().push(d.message().to_string());
        Effect::unit()
    });
    let cause = run_sync(failure).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"boom".to_string()));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn panic_in_sync_thunk_becomes_a_defect() {
    let effect = Effect::<i32, String>::sync(|| panic!("thunk exploded"));
    let cause = run_sync(effect).unwrap_err();
    let defect = cause.defect_option().expect("panic reifies as defect");
    assert!(defect.message().contains("thunk exploded"));
}

#[test]
fn catch_tag_matches_by_tag() {
    let effect = Effect::<i32, _>::fail(AppError::Parse("x".into()))
        .catch_tag("ParseError", |_| Effect::succeed(0));
    assert_eq!(run_sync(effect).ok(), Some(0));
}

#[test]
fn catch_tag_reraises_other_tags() {
    let effect = Effect::<i32, _>::fail(AppError::Request("down".into()))
        .catch_tag("ParseError", |_| Effect::succeed(0));
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(
        cause.failure_option(),
        Some(&AppError::Request("down".into()))
    );
}

#[test]
fn catch_tags_selects_the_matching_handler() {
    let handlers: Vec<(&'static str, TagHandler<i32, AppError>)> = vec![
        ("ParseError", Box::new(|_| Effect::succeed(1))),
        ("RequestError", Box::new(|_| Effect::succeed(2))),
    ];
    let effect = Effect::<i32, _>::fail(AppError::Request("down".into())).catch_tags(handlers);
    assert_eq!(run_sync(effect).ok(), Some(2));
}

#[test]
fn catch_tags_without_match_reraises() {
    let handlers: Vec<(&'static str, TagHandler<i32, AppError>)> =
        vec![("ParseError", Box::new(|_| Effect::succeed(1)))];
    let effect = Effect::<i32, _>::fail(AppError::Request("down".into())).catch_tags(handlers);
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(
        cause.failure_option(),
        Some(&AppError::Request("down".into()))
    );
}

#[test]
fn ensuring_runs_on_success_and_failure() {
    let runs = Arc::new(AtomicUsize::new(0));

    let probe = runs.clone();
    let ok = Effect::<_, String>::succeed(1).ensuring(Effect::sync(move || {
        probe.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(run_sync(ok).ok(), Some(1));

    let probe = runs.clone();
    let err = Effect::<i32, _>::fail("boom".to_string()).ensuring(Effect::sync(move || {
        probe.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(run_sync(err).is_err());

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn finalizers_run_in_reverse_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let inner_probe = order.clone();
    let outer_probe = order.clone();
    let effect = Effect::<_, String>::succeed(())
        .ensuring(Effect::sync(move || {
            inner_probe.lock().unwrap().push("inner");
        }))
        .ensuring(Effect::sync(move || {
            outer_probe.lock().unwrap().push("outer");
        }));
    assert!(run_sync(effect).is_ok());
    assert_eq!(*order.lock().unwrap(), vec!["inner", "outer"]);
}

#[test]
fn acquire_release_releases_on_use_failure() {
    let released = Arc::new(AtomicUsize::new(0));
    let probe = released.clone();
    let effect = Effect::<i32, String>::acquire_release(
        Effect::succeed("resource"),
        move |_| {
            Effect::sync(move || {
                probe.fetch_add(1, Ordering::SeqCst);
            })
        },
        |_| Effect::fail("use broke".to_string()),
    );
    let cause = run_sync(effect).unwrap_err();
    assert_eq!(cause.failure_option(), Some(&"use broke".to_string()));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn acquire_release_skips_release_when_acquire_fails() {
    let released = Arc::new(AtomicUsize::new(0));
    let probe = released.clone();
    let effect = Effect::<i32, String>::acquire_release(
        Effect::<&str, _>::fail("no resource".to_string()),
        move |_| {
            Effect::sync(move || {
                probe.fetch_add(1, Ordering::SeqCst);
            })
        },
        |_| Effect::succeed(1),
    );
    assert!(run_sync(effect).is_err());
    assert_eq!(released.load(Ordering::SeqCst), 0);
}

#[test]
fn building_a_sleep_needs_no_runtime() {
    // No reactor exists here; construction must stay inert.
    let effect = Effect::<(), String>::sleep(std::time::Duration::from_millis(1));
    drop(effect);
}

#[test]
fn fail_cause_preserves_structure() {
    let cause = Cause::fail("a".to_string()).then(Cause::fail("b".to_string()));
    let effect = Effect::<i32, String>::fail_cause(cause);
    let out = run_sync(effect).unwrap_err();
    assert!(matches!(out, Cause::Sequential(_, _)));
    assert_eq!(out.failure_option(), Some(&"a".to_string()));
}

#[test]
fn unknown_error_renders_source_message() {
    let error = UnknownError::new("socket closed");
    assert_eq!(error.to_string(), "unknown error: socket closed");
    assert_eq!(error.tag(), "UnknownError");
}

#[tokio::test]
async fn from_future_bridges_async_work() {
    let effect = Effect::<_, String>::from_future(async { 6 * 7 });
    assert_eq!(run_promise(effect).await.ok(), Some(42));
}

#[tokio::test]
async fn try_future_maps_the_error() {
    let effect = Effect::<i32, _>::try_future(
        async { "x".parse::<i32>() },
        |e| format!("bad number: {e}"),
    );
    let cause = run_promise(effect).await.unwrap_err();
    assert!(cause
        .failure_option()
        .is_some_and(|e| e.starts_with("bad number")));
}

#[tokio::test]
async fn try_promise_wraps_in_unknown_error() {
    let effect = Effect::<i32, UnknownError>::try_promise(async {
        "x".parse::<i32>()
    });
    let cause = run_promise(effect).await.unwrap_err();
    let error = cause.failure_option().expect("expected failure");
    assert!(error.to_string().starts_with("unknown error:"));
}

#[tokio::test]
async fn from_callback_completes_through_the_registration() {
    let effect = Effect::<i32, String>::from_callback(|done| {
        std::thread::spawn(move || done(Ok(10)));
    });
    assert_eq!(run_promise(effect).await.ok(), Some(10));
}

#[tokio::test]
async fn dropped_callback_is_a_defect() {
    let effect = Effect::<i32, String>::from_callback(|done| {
        drop(done);
    });
    let cause = run_promise(effect).await.unwrap_err();
    assert!(cause.is_die());
}
