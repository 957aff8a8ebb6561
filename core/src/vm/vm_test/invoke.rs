use super::*;
use crate::vm::{RegisterFile, WorkerState};

fn calc_vm(runs: Arc<AtomicUsize>) -> Vm {
    let mut interp = NativeInterpreter::new();
    register_add(&mut interp, runs);
    let calc = PackageInfo::builder("calc").function(add_unit()).build();
    vm_with(vec![calc], RegisterCounts::default(), interp)
}

#[test]
fn add_by_name_returns_sum() {
    let runs = Arc::new(AtomicUsize::new(0));
    let vm = calc_vm(runs.clone());

    let out = vm.invoke_by_name("calc", "add", &[BValue::Int(2), BValue::Int(3)]).unwrap();
    assert_eq!(out, vec![BValue::Int(5)]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let stats = vm.stats();
    assert_eq!(stats.responses_created, 1);
    assert_eq!(stats.contexts_created, 1);
    assert_eq!(stats.workers_scheduled, 0);
    assert_eq!(stats.workers_run_in_caller, 1);
}

#[test]
fn arity_mismatch_runs_nothing() {
    let runs = Arc::new(AtomicUsize::new(0));
    let vm = calc_vm(runs.clone());

    let err = vm.invoke_by_name("calc", "add", &[BValue::Int(2)]).unwrap_err();
    match err {
        VmError::ArityMismatch { unit, expected, actual } => {
            assert_eq!(&*unit, "calc:add");
            assert_eq!((expected, actual), (2, 1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(vm.stats().responses_created, 0);
    assert_eq!(vm.stats().contexts_created, 0);
}

#[test]
fn unknown_function_creates_no_response() {
    let vm = calc_vm(Arc::new(AtomicUsize::new(0)));
    let err = vm.invoke_by_name("calc", "mul", &[]).unwrap_err();
    assert!(matches!(err, VmError::FunctionNotFound { ref function, .. } if function == "mul"));
    assert_eq!(err.to_string(), "function 'mul' is not defined in package 'calc'");
    assert_eq!(vm.stats().responses_created, 0);
}

#[test]
fn unknown_package_is_reported() {
    let vm = calc_vm(Arc::new(AtomicUsize::new(0)));
    let err = vm.invoke_by_name("nope", "add", &[]).unwrap_err();
    assert!(matches!(err, VmError::PackageNotFound(ref p) if p == "nope"));
}

#[test]
fn argument_of_wrong_kind_is_rejected_before_dispatch() {
    let runs = Arc::new(AtomicUsize::new(0));
    let vm = calc_vm(runs.clone());
    let err = vm
        .invoke_by_name("calc", "add", &[BValue::Int(1), BValue::from("2")])
        .unwrap_err();
    assert!(matches!(err, VmError::TypeTagMismatch { position: 1, .. }));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(vm.stats().responses_created, 0);
}

#[test]
fn raised_error_propagates_with_frame() {
    let unit = CallableUnit::builder("app", "fail").returns([BType::Int]).build().unwrap();
    let interp = NativeInterpreter::new().with("app", "fail", 0, |_, ctx: &mut ExecutionContext| {
        ctx.raise(BError::new("bad input"));
        Ok(WorkerExit::Halt)
    });
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(unit).build()],
        RegisterCounts::default(),
        interp,
    );

    let err = vm.invoke_by_name("app", "fail", &[]).unwrap_err();
    assert!(!err.is_fatal());
    let raised = err.propagated().expect("propagated error");
    assert_eq!(raised.message(), "bad input");
    assert_eq!(raised.frames()[0].to_string(), "app:fail(default)");
}

#[test]
fn interpreter_error_value_is_treated_as_raised() {
    let unit = CallableUnit::builder("app", "fail").build().unwrap();
    let interp = NativeInterpreter::new().with("app", "fail", 0, |_, _: &mut ExecutionContext| {
        Err(BError::new("early exit").into())
    });
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(unit).build()],
        RegisterCounts::default(),
        interp,
    );
    let err = vm.invoke_by_name("app", "fail", &[]).unwrap_err();
    assert_eq!(err.to_string(), "early exit");
}

#[test]
fn missing_body_is_a_fault() {
    let unit = CallableUnit::builder("app", "ghost").build().unwrap();
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(unit).build()],
        RegisterCounts::default(),
        NativeInterpreter::new(),
    );
    let err = vm.invoke_by_name("app", "ghost", &[]).unwrap_err();
    assert!(matches!(err, VmError::NoWorkerBody { worker: 0, .. }));
}

#[test]
fn panicking_worker_becomes_fault() {
    let unit = CallableUnit::builder("app", "explode").build().unwrap();
    let interp = NativeInterpreter::new().with("app", "explode", 0, |_, _: &mut ExecutionContext| {
        panic!("kaboom");
    });
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(unit).build()],
        RegisterCounts::default(),
        interp,
    );
    let err = vm.invoke_by_name("app", "explode", &[]).unwrap_err();
    match err {
        VmError::WorkerPanicked { unit, worker, message } => {
            assert_eq!(&*unit, "explode");
            assert_eq!(&*worker, "default");
            assert_eq!(message, "kaboom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn nested_callable_writes_into_caller_registers() {
    // twice(x) = add(x, x), called at register level from inside a worker.
    let twice = CallableUnit::builder("calc", "twice")
        .param(BType::Int)
        .returns([BType::Int])
        .worker("default", counts(2, 0))
        .build()
        .unwrap();
    let mut interp = NativeInterpreter::new();
    register_add(&mut interp, Arc::new(AtomicUsize::new(0)));
    interp.register("calc", "twice", 0, |vm: &Vm, ctx: &mut ExecutionContext| {
        let add = vm.program().package("calc").and_then(|p| p.function("add")).cloned();
        let add = add.ok_or_else(|| VmError::FunctionNotFound {
            package: "calc".into(),
            function: "add".into(),
        })?;
        vm.invoke_callable(&add, ctx, &[0, 0], &[1])?;
        assert_eq!(ctx.state(), Some(WorkerState::Running));
        ctx.result.longs[0] = ctx.local.longs[1];
        Ok(WorkerExit::Return)
    });
    let calc = PackageInfo::builder("calc").function(add_unit()).function(twice).build();
    let vm = vm_with(vec![calc], RegisterCounts::default(), interp);

    let out = vm.invoke_by_name("calc", "twice", &[BValue::Int(21)]).unwrap();
    assert_eq!(out, vec![BValue::Int(42)]);
    assert_eq!(vm.stats().responses_created, 2);
}

#[test]
fn nested_error_lands_in_parent_error_slot() {
    let inner = CallableUnit::builder("app", "inner").build().unwrap();
    let outer = CallableUnit::builder("app", "outer").build().unwrap();
    let interp = NativeInterpreter::new()
        .with("app", "inner", 0, |_, ctx: &mut ExecutionContext| {
            ctx.raise(BError::new("inner failed"));
            Ok(WorkerExit::Halt)
        })
        .with("app", "outer", 0, |vm: &Vm, ctx: &mut ExecutionContext| {
            let inner = vm.program().package("app").and_then(|p| p.function("inner")).cloned();
            if let Some(inner) = inner {
                let _ = vm.invoke_unit(&inner, ctx);
            }
            // Left in place by the nested call; the worker lets it propagate.
            Ok(WorkerExit::Halt)
        });
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(inner).function(outer).build()],
        RegisterCounts::default(),
        interp,
    );

    let err = vm.invoke_by_name("app", "outer", &[]).unwrap_err();
    let raised = err.propagated().unwrap();
    assert_eq!(raised.message(), "inner failed");
    let trail: Vec<String> = raised.frames().iter().map(ToString::to_string).collect();
    assert_eq!(trail, vec!["app:inner(default)", "app:outer(default)"]);
}

#[test]
fn begin_invocation_leaves_caller_running_until_join() {
    let runs = Arc::new(AtomicUsize::new(0));
    let vm = calc_vm(runs.clone());
    let add = vm.program().package("calc").unwrap().function("add").unwrap().clone();

    let root = vm.root_context();
    let mut args = RegisterFile::new(&counts(4, 0));
    args.longs[3] = 10;
    args.longs[1] = 5;

    let mut invocation = vm.begin_invocation(&add, &root, &args, &[3, 1]).unwrap();
    assert_eq!(root.state(), Some(WorkerState::Running));
    assert_eq!(invocation.response().outstanding(), 1);
    assert!(!invocation.response().waits_for_response());

    assert_eq!(invocation.run_caller_worker(), Some(WorkerState::Completed));
    assert_eq!(invocation.run_caller_worker(), None);
    assert!(invocation.response().is_complete());

    let mut out = RegisterFile::new(&counts(1, 0));
    invocation.wait_into(&mut out, &[0]).unwrap();
    assert_eq!(out.longs[0], 15);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(root.state(), Some(WorkerState::Running));
}

#[test]
fn caller_waits_for_response_while_joining() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let unit = CallableUnit::builder("app", "peek")
        .returns([BType::Int])
        .worker("main", RegisterCounts::default())
        .worker("side", RegisterCounts::default())
        .build()
        .unwrap();
    let mut interp = NativeInterpreter::new();
    for idx in 0..2 {
        let seen = seen.clone();
        interp.register("app", "peek", idx, move |vm: &Vm, ctx: &mut ExecutionContext| {
            let parent = ctx.parent().and_then(|id| vm.arena().state(id));
            seen.lock().unwrap().push((idx, parent));
            if idx == 0 {
                ctx.result.longs[0] = 1;
                return Ok(WorkerExit::Return);
            }
            Ok(WorkerExit::Halt)
        });
    }
    let vm = vm_with(
        vec![PackageInfo::builder("app").function(unit.clone()).build()],
        RegisterCounts::default(),
        interp,
    );

    let root = vm.root_context();
    let invocation = vm.begin_invocation(&unit, &root, &RegisterFile::default(), &[]).unwrap();
    let mut out = RegisterFile::new(&counts(1, 0));
    invocation.wait_into(&mut out, &[0]).unwrap();
    assert_eq!(out.longs[0], 1);
    assert_eq!(root.state(), Some(WorkerState::Running));

    // Worker 0 runs inside the join, after the caller has been marked.
    let seen = seen.lock().unwrap().clone();
    assert!(seen.contains(&(0, Some(WorkerState::WaitingForResponse))), "{seen:?}");
}

#[test]
fn dropped_invocation_still_settles_its_response() {
    let runs = Arc::new(AtomicUsize::new(0));
    let vm = calc_vm(runs.clone());
    let add = vm.program().package("calc").unwrap().function("add").unwrap().clone();
    let root = vm.root_context();
    let args = RegisterFile::new(&counts(2, 0));

    let invocation = vm.begin_invocation(&add, &root, &args, &[0, 1]).unwrap();
    let response = invocation.response().clone();
    drop(invocation);

    assert!(response.is_complete());
    assert!(matches!(response.outcome(), crate::vm::ResponseOutcome::Fault(VmError::Schedule(_))));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn invoke_in_reuses_caller_context() {
    let vm = calc_vm(Arc::new(AtomicUsize::new(0)));
    let mut root = vm.root_context();
    for i in 0..3 {
        let out = vm
            .invoke_by_name_in(&mut root, "calc", "add", &[BValue::Int(i), BValue::Int(1)])
            .unwrap();
        assert_eq!(out, vec![BValue::Int(i + 1)]);
        assert_eq!(root.state(), Some(WorkerState::Running));
    }
}
