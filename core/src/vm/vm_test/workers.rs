use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::*;

fn greet_unit() -> Arc<CallableUnit> {
    CallableUnit::builder("demo", "greet")
        .returns([BType::String])
        .worker("w1", RegisterCounts::default())
        .worker("w2", RegisterCounts::default())
        .build()
        .unwrap()
}

#[test]
fn two_workers_block_until_both_finish() {
    let finished = Arc::new(AtomicUsize::new(0));
    let caller_thread: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));

    let seen = caller_thread.clone();
    let done0 = finished.clone();
    let done1 = finished.clone();
    let interp = NativeInterpreter::new()
        .with("demo", "greet", 0, move |_, _: &mut ExecutionContext| {
            // Runs on the caller's path and leaves the return register alone.
            *seen.lock().unwrap() = Some(thread::current().id());
            done0.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerExit::Halt)
        })
        .with("demo", "greet", 1, move |_, ctx: &mut ExecutionContext| {
            thread::sleep(Duration::from_millis(30));
            ctx.result.strings[0] = Arc::from("done");
            done1.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerExit::Return)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(greet_unit()).build()],
        RegisterCounts::default(),
        interp,
    );

    let out = vm.invoke_by_name("demo", "greet", &[]).unwrap();
    assert_eq!(out, vec![BValue::from("done")]);
    // Both contributions are in before the caller resumes.
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(*caller_thread.lock().unwrap(), Some(thread::current().id()));

    let stats = vm.stats();
    assert_eq!(stats.contexts_created, 2);
    assert_eq!(stats.workers_scheduled, 1);
    assert_eq!(stats.workers_run_in_caller, 1);
    assert_eq!(stats.responses_created, 1);
}

#[test]
fn scheduled_worker_may_supply_the_return_value() {
    let interp = NativeInterpreter::new()
        .with("demo", "greet", 0, |_, _: &mut ExecutionContext| Ok(WorkerExit::Halt))
        .with("demo", "greet", 1, |_, ctx: &mut ExecutionContext| {
            ctx.result.strings[0] = Arc::from("from w2");
            Ok(WorkerExit::Return)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(greet_unit()).build()],
        RegisterCounts::default(),
        interp,
    );
    let out = vm.invoke_by_name("demo", "greet", &[]).unwrap();
    assert_eq!(out, vec![BValue::from("from w2")]);
}

#[test]
fn every_worker_sees_the_arguments() {
    let unit = CallableUnit::builder("demo", "fan")
        .params([BType::String, BType::Int])
        .worker("a", counts(1, 1))
        .worker("b", counts(3, 1))
        .worker("c", RegisterCounts::default())
        .build()
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut interp = NativeInterpreter::new();
    for idx in 0..3 {
        let seen = seen.clone();
        interp.register("demo", "fan", idx, move |_, ctx: &mut ExecutionContext| {
            seen.lock()
                .unwrap()
                .push((idx, ctx.local.strings[0].to_string(), ctx.local.longs[0], ctx.local.longs.len()));
            Ok(WorkerExit::Halt)
        });
    }
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(unit).build()],
        RegisterCounts::default(),
        interp,
    );

    let out = vm.invoke_by_name("demo", "fan", &[BValue::from("x"), BValue::Int(4)]).unwrap();
    assert!(out.is_empty());

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by_key(|entry| entry.0);
    assert_eq!(
        seen,
        vec![
            (0, "x".to_string(), 4, 1),
            (1, "x".to_string(), 4, 3),
            (2, "x".to_string(), 4, 1),
        ]
    );
}

#[test]
fn workers_share_global_properties() {
    let unit = CallableUnit::builder("demo", "props")
        .worker("a", RegisterCounts::default())
        .worker("b", RegisterCounts::default())
        .build()
        .unwrap();
    let interp = NativeInterpreter::new()
        .with("demo", "props", 0, |_, ctx: &mut ExecutionContext| {
            ctx.props().insert("a", BValue::Int(1));
            Ok(WorkerExit::Halt)
        })
        .with("demo", "props", 1, |_, ctx: &mut ExecutionContext| {
            ctx.props().insert("b", BValue::Int(2));
            Ok(WorkerExit::Halt)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(unit).build()],
        RegisterCounts::default(),
        interp,
    );
    vm.props().insert("seed", BValue::Bool(true));

    vm.invoke_by_name("demo", "props", &[]).unwrap();
    assert_eq!(vm.props().get("a"), Some(BValue::Int(1)));
    assert_eq!(vm.props().get("b"), Some(BValue::Int(2)));
    assert_eq!(vm.props().len(), 3);
}

#[test]
fn failing_scheduled_worker_fails_the_invocation() {
    let interp = NativeInterpreter::new()
        .with("demo", "greet", 0, |_, ctx: &mut ExecutionContext| {
            ctx.result.strings[0] = Arc::from("ok");
            Ok(WorkerExit::Return)
        })
        .with("demo", "greet", 1, |_, ctx: &mut ExecutionContext| {
            ctx.raise(BError::new("w2 broke"));
            Ok(WorkerExit::Halt)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(greet_unit()).build()],
        RegisterCounts::default(),
        interp,
    );
    let err = vm.invoke_by_name("demo", "greet", &[]).unwrap_err();
    let raised = err.propagated().unwrap();
    assert_eq!(raised.message(), "w2 broke");
    assert_eq!(raised.frames()[0].to_string(), "demo:greet(w2)");
}

#[test]
fn when_both_workers_fail_only_the_first_error_is_returned() {
    let interp = NativeInterpreter::new()
        .with("demo", "greet", 0, |_, ctx: &mut ExecutionContext| {
            ctx.raise(BError::new("first"));
            Ok(WorkerExit::Halt)
        })
        .with("demo", "greet", 1, |_, ctx: &mut ExecutionContext| {
            thread::sleep(Duration::from_millis(30));
            ctx.raise(BError::new("second"));
            Ok(WorkerExit::Halt)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("demo").function(greet_unit()).build()],
        RegisterCounts::default(),
        interp,
    );

    let err = vm.invoke_by_name("demo", "greet", &[]).unwrap_err();
    let raised = err.propagated().unwrap();
    assert_eq!(raised.message(), "first");
    assert_eq!(raised.frames().len(), 1);
    assert_eq!(raised.frames()[0].to_string(), "demo:greet(w1)");
    assert!(raised.cause().is_none());
}

#[test]
fn many_concurrent_callers_each_get_their_own_result() {
    let mut interp = NativeInterpreter::new();
    register_add(&mut interp, Arc::new(AtomicUsize::new(0)));
    let vm = vm_with(
        vec![PackageInfo::builder("calc").function(add_unit()).build()],
        RegisterCounts::default(),
        interp,
    );

    let handles: Vec<_> = (0..8i64)
        .map(|i| {
            let vm = vm.clone();
            thread::spawn(move || vm.invoke_by_name("calc", "add", &[BValue::Int(i), BValue::Int(i)]))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap().unwrap(), vec![BValue::Int(2 * i as i64)]);
    }
    assert_eq!(vm.stats().responses_created, 8);
}
