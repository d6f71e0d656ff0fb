//! End-to-end exercise of the weaving engine: session configuration, scope
//! matching, guard decisions, static context precomputation and argument
//! processor resolution, against programmatically assembled method bodies.

use std::sync::Arc;

use classweave::context::{ContextValue, LOOP_CONTEXT, METHOD_CONTEXT};
use classweave::prelude::*;

/// A target method with a loop and one call site:
///
/// ```text
/// 0: nop                          (loop preheader)
/// L0: 2: nop                      (loop header)
/// 3: if_ne -> L0                  (back edge)
/// 4: invokestatic other/Sink.consume(IJ)V
/// 5: return
/// ```
fn target_method() -> MethodBody {
    let mut builder = MethodBodyBuilder::new("my/pkg/Target", "run", "(I)V");
    let header = builder.new_label();
    builder
        .op(Insn::Other { mnemonic: "nop" })
        .label(header)
        .op(Insn::Other { mnemonic: "nop" })
        .op(Insn::Jump {
            kind: JumpKind::IfNe,
            target: header,
        })
        .op(Insn::Invoke {
            kind: InvokeKind::Static,
            owner: "other/Sink".to_string(),
            name: "consume".to_string(),
            desc: "(IJ)V".to_string(),
        })
        .op(Insn::Return(ReturnKind::Void))
        .build()
}

/// A snippet body consuming two static contexts, reading a thread local and
/// returning from two points.
fn snippet_body() -> MethodBody {
    let method_ctx = METHOD_CONTEXT.replace('.', "/");
    let loop_ctx = LOOP_CONTEXT.replace('.', "/");
    let desc = format!("(L{method_ctx};L{loop_ctx};)V");

    let mut builder = MethodBodyBuilder::new("my/Inst", "before", &desc);
    let skip = builder.new_label();
    builder
        .op(Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: method_ctx.clone(),
            name: "thisMethodName".to_string(),
            desc: "()Ljava/lang/String;".to_string(),
        })
        .op(Insn::Stack(StackOp::Pop))
        .op(Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: loop_ctx,
            name: "isFirstOfLoop".to_string(),
            desc: "()Z".to_string(),
        })
        .op(Insn::Jump {
            kind: JumpKind::IfEq,
            target: skip,
        })
        .op(Insn::Field {
            op: FieldOp::GetStatic,
            owner: "my/Inst".to_string(),
            name: "hits".to_string(),
            desc: "I".to_string(),
        })
        .op(Insn::Stack(StackOp::Pop))
        .op(Insn::Return(ReturnKind::Void))
        .label(skip)
        .op(Insn::Return(ReturnKind::Void))
        .build()
}

fn only_run_methods(inv: &GuardInvocation<'_>) -> bool {
    matches!(
        inv.static_value(METHOD_CONTEXT, "thisMethodName"),
        ContextValue::Str(name) if name == "run"
    )
}

fn first_argument_only(inv: &GuardInvocation<'_>) -> bool {
    inv.argument().position == 0
}

fn session() -> WeavingSession {
    SessionBuilder::new()
        .thread_local(ThreadLocalVar {
            owner: "my/Inst".to_string(),
            name: "hits".to_string(),
            type_desc: TypeDesc::Int,
            inheritable: false,
        })
        .register_guard(
            "OnlyRun",
            vec![GuardMethod::new(
                "OnlyRun",
                "isApplicable",
                vec![GuardParamKind::StaticContext(METHOD_CONTEXT.to_string())],
                only_run_methods,
            )],
        )
        .register_guard(
            "FirstArg",
            vec![GuardMethod::new(
                "FirstArg",
                "isApplicable",
                vec![GuardParamKind::ArgumentContext],
                first_argument_only,
            )],
        )
        .register_processor(ProcessorSpec {
            name: "IntLogger".to_string(),
            defined_in: "my/Inst".to_string(),
            methods: vec![ProcMethodSpec {
                name: "logInt".to_string(),
                kind: ArgProcessorKind::Int,
                guard: None,
                body: MethodBodyBuilder::new("my/Inst", "logInt", "(I)V")
                    .op(Insn::Stack(StackOp::Pop))
                    .op(Insn::Return(ReturnKind::Void))
                    .build(),
            }],
        })
        .register_processor(ProcessorSpec {
            name: "GuardedLogger".to_string(),
            defined_in: "my/Inst".to_string(),
            methods: vec![ProcMethodSpec {
                name: "logGuarded".to_string(),
                kind: ArgProcessorKind::Object,
                guard: Some("FirstArg".to_string()),
                body: MethodBodyBuilder::new("my/Inst", "logGuarded", "(Ljava/lang/Object;)V")
                    .op(Insn::Stack(StackOp::Pop))
                    .op(Insn::Return(ReturnKind::Void))
                    .build(),
            }],
        })
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "before".to_string(),
            scope: "my.pkg.*.run(int)".to_string(),
            order: 0,
            guard: Some("OnlyRun".to_string()),
            body: snippet_body(),
            processor_invocations: vec![
                (
                    0,
                    ProcInvocation {
                        processor: "IntLogger".to_string(),
                        mode: ArgumentProcessorMode::MethodArgs,
                    },
                ),
                (
                    2,
                    ProcInvocation {
                        processor: "IntLogger".to_string(),
                        mode: ArgumentProcessorMode::CallsiteArgs,
                    },
                ),
            ],
        })
        .build()
        .expect("session configuration must succeed")
}

#[test]
fn scope_selects_eligible_methods() {
    let session = session();

    let eligible = session
        .matching_snippets("my/pkg/Target", "run", "(I)V")
        .unwrap();
    assert_eq!(eligible.len(), 1);

    // Wrong method name, wrong parameters, wrong package.
    assert!(session
        .matching_snippets("my/pkg/Target", "walk", "(I)V")
        .unwrap()
        .is_empty());
    assert!(session
        .matching_snippets("my/pkg/Target", "run", "(J)V")
        .unwrap()
        .is_empty());
    assert!(session
        .matching_snippets("other/pkg/Target", "run", "(I)V")
        .unwrap()
        .is_empty());
}

#[test]
fn snippet_processing_normalizes_and_rewrites() {
    let session = session();
    let snippet = &session.snippets()[0];
    let code = &snippet.code.code;

    // Two returns were replaced by jumps to one shared trailing label.
    assert!(!code.instructions().iter().any(Insn::is_return));
    assert!(matches!(code.instructions().last(), Some(Insn::Label(_))));

    // The thread-local read became a current-thread field access.
    assert!(code.instructions().iter().any(|insn| matches!(
        insn,
        Insn::Invoke { owner, name, .. }
            if owner == "java/lang/Thread" && name == "currentThread"
    )));

    // Both referenced context methods were collected.
    assert_eq!(code.info().context_methods.len(), 2);
    assert_eq!(code.info().thread_locals.len(), 1);
    assert!(!code.handles_exception());
}

#[test]
fn guard_decisions_follow_method_identity() {
    let session = session();
    let snippet = Arc::clone(&session.snippets()[0]);
    let body = Arc::new(target_method());

    let on_run = Shadow::new(ShadowId(1), Arc::clone(&body), 0, vec![5]);
    assert!(session.snippet_applicable(&snippet, &on_run).unwrap());

    let other = Arc::new(MethodBodyBuilder::new("my/pkg/Target", "walk", "()V")
        .op(Insn::Return(ReturnKind::Void))
        .build());
    let on_walk = Shadow::new(ShadowId(2), other, 0, vec![0]);
    assert!(!session.snippet_applicable(&snippet, &on_walk).unwrap());
}

#[test]
fn static_info_precomputes_referenced_values() {
    let session = session();
    let snippet = Arc::clone(&session.snippets()[0]);
    let body = Arc::new(target_method());

    // One shadow at the loop header, one at the method entry.
    let at_header = Arc::new(Shadow::new(ShadowId(1), Arc::clone(&body), 2, vec![3]));
    let at_entry = Arc::new(Shadow::new(ShadowId(2), Arc::clone(&body), 0, vec![0]));

    let markings: SnippetMarkings = vec![(snippet, vec![at_header, at_entry])];
    let info = session.compute_static_info(&markings).unwrap();

    // snippet references 2 context methods, computed for 2 shadows
    assert_eq!(info.len(), 4);
    assert_eq!(
        info.get(ShadowId(1), METHOD_CONTEXT, "thisMethodName"),
        Some(&ContextValue::Str("run".to_string()))
    );
    assert_eq!(
        info.get(ShadowId(1), LOOP_CONTEXT, "isFirstOfLoop"),
        Some(&ContextValue::Bool(true))
    );
    assert_eq!(
        info.get(ShadowId(2), LOOP_CONTEXT, "isFirstOfLoop"),
        Some(&ContextValue::Bool(false))
    );
    assert!(!info.contains(ShadowId(2), METHOD_CONTEXT, "noSuchMethod"));
}

#[test]
fn processors_resolve_per_mode() {
    let session = session();
    let snippet = Arc::clone(&session.snippets()[0]);
    let body = Arc::new(target_method());

    // The call-site invocation requires the shadow's single end to be the
    // invoke instruction (index 4).
    let shadow = Arc::new(Shadow::new(ShadowId(1), Arc::clone(&body), 0, vec![4]));
    let markings: SnippetMarkings = vec![(snippet, vec![Arc::clone(&shadow)])];

    let resolver = session.compute_processors(&markings).unwrap();

    // Method-args application over run(I)V: the single int parameter.
    let method_args = resolver.get(ShadowId(1), 0).expect("method-args instance");
    assert_eq!(method_args.mode, ArgumentProcessorMode::MethodArgs);
    assert_eq!(method_args.methods.len(), 1);
    assert_eq!(method_args.methods[0].arg_index, 0);
    assert_eq!(method_args.methods[0].kind, ArgProcessorKind::Int);

    // Call-site application over consume(IJ)V: int matches, long does not.
    let callsite = resolver.get(ShadowId(1), 2).expect("call-site instance");
    assert_eq!(callsite.mode, ArgumentProcessorMode::CallsiteArgs);
    assert_eq!(callsite.methods.len(), 1);
    assert_eq!(callsite.methods[0].args_count, 2);
}

#[test]
fn callsite_processing_requires_an_invocation_end() {
    let session = session();
    let snippet = Arc::clone(&session.snippets()[0]);
    let body = Arc::new(target_method());

    // End 5 is the return instruction.
    let shadow = Arc::new(Shadow::new(ShadowId(1), body, 0, vec![5]));
    let markings: SnippetMarkings = vec![(snippet, vec![shadow])];

    let err = session.compute_processors(&markings).unwrap_err();
    assert!(err
        .to_string()
        .contains("not applied before a method invocation"));
}

#[test]
fn misconfigured_sessions_fail_at_build_time() {
    // Empty scope expression.
    let err = SessionBuilder::new()
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "before".to_string(),
            scope: String::new(),
            order: 0,
            guard: None,
            body: MethodBodyBuilder::new("my/Inst", "before", "()V")
                .op(Insn::Return(ReturnKind::Void))
                .build(),
            processor_invocations: Vec::new(),
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::ScopeParse { .. }));

    // Reference to an unregistered guard.
    let err = SessionBuilder::new()
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "before".to_string(),
            scope: "*.main".to_string(),
            order: 0,
            guard: Some("NoSuchGuard".to_string()),
            body: MethodBodyBuilder::new("my/Inst", "before", "()V")
                .op(Insn::Return(ReturnKind::Void))
                .build(),
            processor_invocations: Vec::new(),
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::UnknownGuard(_)));

    // Reference to an unregistered processor.
    let err = SessionBuilder::new()
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "before".to_string(),
            scope: "*.main".to_string(),
            order: 0,
            guard: None,
            body: MethodBodyBuilder::new("my/Inst", "before", "()V")
                .op(Insn::Return(ReturnKind::Void))
                .build(),
            processor_invocations: vec![(
                0,
                ProcInvocation {
                    processor: "NoSuchProcessor".to_string(),
                    mode: ArgumentProcessorMode::MethodArgs,
                },
            )],
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProcessor(_)));
}

#[test]
fn snippets_compose_in_declared_order() {
    let body = |name: &str| {
        MethodBodyBuilder::new("my/Inst", name, "()V")
            .op(Insn::Return(ReturnKind::Void))
            .build()
    };

    let session = SessionBuilder::new()
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "late".to_string(),
            scope: "*.main".to_string(),
            order: 10,
            guard: None,
            body: body("late"),
            processor_invocations: Vec::new(),
        })
        .snippet(SnippetSpec {
            origin_class: "my/Inst".to_string(),
            origin_method: "early".to_string(),
            scope: "*.main".to_string(),
            order: -1,
            guard: None,
            body: body("early"),
            processor_invocations: Vec::new(),
        })
        .build()
        .unwrap();

    let names: Vec<String> = session
        .snippets()
        .iter()
        .map(|s| s.origin_method.clone())
        .collect();
    assert_eq!(names, vec!["early".to_string(), "late".to_string()]);
}
