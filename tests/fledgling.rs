//! Snippet tests for the two evaluators as a whole: every program in
//! this corpus runs through the tree walker and through
//! compile-then-VM, and the results must agree.

use std::rc::Rc;

use corvine::common::trace::ErrorKind;
use corvine::compiler::gen::compile;
use corvine::compiler::node::build::*;
use corvine::compiler::node::{Node, RecurKind, WalkArity};
use corvine::data::value::Value;
use corvine::{eval, vm, Spanned};

/// `RUST_LOG=corvine=trace cargo test` shows the evaluator internals.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Runs a program on both backends against fresh environments and
/// checks they agree; returns the (shared) result.
fn run_both(program: &Spanned<Node>) -> Value {
    init_tracing();
    let walked = {
        let env = corvine::boot();
        eval::run(&env, program).unwrap_or_else(|trace| {
            panic!("tree walk failed:\n{}", trace);
        })
    };
    let ran = {
        let env = corvine::boot();
        let proto = compile(program).unwrap();
        vm::run(&env, &proto).unwrap_or_else(|trace| {
            panic!("vm failed:\n{}", trace);
        })
    };
    assert!(
        walked.equiv(&ran),
        "backends disagree: walked {:?}, vm {:?}",
        walked,
        ran
    );
    walked
}

/// Both backends must fail with the same error kind.
fn run_both_err(program: &Spanned<Node>) -> ErrorKind {
    let walked = {
        let env = corvine::boot();
        eval::run(&env, program).unwrap_err()
    };
    let ran = {
        let env = corvine::boot();
        let proto = compile(program).unwrap();
        vm::run(&env, &proto).unwrap_err()
    };
    assert_eq!(walked.kind, ran.kind, "backends disagree on error kind");
    walked.kind
}

/// A fn with full control over one arity's shape.
fn fn_arity(
    name: Option<&str>,
    params: usize,
    variadic: bool,
    capture_slots: Vec<usize>,
    has_self_ref: bool,
    body: Spanned<Node>,
) -> Spanned<Node> {
    let local_count = capture_slots.len()
        + usize::from(has_self_ref)
        + params
        + usize::from(variadic);
    fn_node(
        name,
        vec![Rc::new(WalkArity {
            params,
            variadic,
            capture_slots,
            has_self_ref,
            local_count,
            body,
        })],
    )
}

fn defprotocol_node(name: &str, sigs: &[(&str, usize)]) -> Spanned<Node> {
    Spanned::bare(Node::DefProtocol {
        name: Rc::from(name),
        sigs: sigs
            .iter()
            .map(|(method, arity)| (Rc::from(*method), *arity))
            .collect(),
    })
}

fn extend_node(
    type_key: &str,
    protocol: &str,
    method: &str,
    body: Spanned<Node>,
) -> Spanned<Node> {
    Spanned::bare(Node::ExtendType {
        type_key: Rc::from(type_key),
        protocol: Box::new(var_ref(protocol)),
        methods: vec![(Rc::from(method), fn_node(None, vec![arity(1, 0, body)]))],
    })
}

#[test]
fn arithmetic_seeds() {
    // (+ 1 2 3), (- 10 3), (/ 10 4)
    let sum = run_both(&call(var_ref("+"), vec![int(1), int(2), int(3)]));
    assert_eq!(sum, Value::Int(6));

    let difference = run_both(&call(var_ref("-"), vec![int(10), int(3)]));
    assert_eq!(difference, Value::Int(7));

    let ratio = run_both(&call(var_ref("/"), vec![int(10), int(4)]));
    match ratio {
        Value::Ratio(r) => {
            assert_eq!(format!("{}/{}", r.numer(), r.denom()), "5/2");
        },
        other => panic!("(/ 10 4) should be the ratio 5/2, got {:?}", other),
    }
}

#[test]
fn if_do_let() {
    let program = let_node(
        vec![binding(0, "x", int(10))],
        do_node(vec![
            if_node(
                call(var_ref("<"), vec![local(0), int(100)]),
                constant(Value::keyword("small")),
                Some(constant(Value::keyword("big"))),
            ),
            call(var_ref("+"), vec![local(0), int(1)]),
        ]),
    );
    assert_eq!(run_both(&program), Value::Int(11));

    // if with no else arm
    assert_eq!(
        run_both(&if_node(constant(Value::Bool(false)), int(1), None)),
        Value::Nil
    );
    // empty do
    assert_eq!(run_both(&do_node(vec![])), Value::Nil);
}

#[test]
fn truthiness_in_tests() {
    // only nil and false are falsy: zero and "" take the then-branch
    let truthy = [
        int(0),
        constant(Value::from_str("")),
        constant(Value::list(vec![])),
    ];
    for test in truthy {
        assert_eq!(run_both(&if_node(test, int(1), Some(int(2)))), Value::Int(1));
    }
    let falsy = [constant(Value::Nil), constant(Value::Bool(false))];
    for test in falsy {
        assert_eq!(run_both(&if_node(test, int(1), Some(int(2)))), Value::Int(2));
    }
}

#[test]
fn functions_fixed_and_variadic() {
    // ((fn [a b] (+ a b)) 3 4)
    let program = call(
        fn_node(
            None,
            vec![arity(2, 0, call(var_ref("+"), vec![local(0), local(1)]))],
        ),
        vec![int(3), int(4)],
    );
    assert_eq!(run_both(&program), Value::Int(7));

    // ((fn [a & rest] rest) 1) -> nil ; with 3 args -> (2 3)
    let variadic = |args: Vec<Spanned<Node>>| {
        call(
            fn_arity(None, 1, true, vec![], false, local(1)),
            args,
        )
    };
    assert_eq!(run_both(&variadic(vec![int(1)])), Value::Nil);
    assert_eq!(
        run_both(&variadic(vec![int(1), int(2), int(3)])),
        Value::list(vec![Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn multi_arity_dispatch() {
    // (def f (fn ([a] :one) ([a b] :two))) then call both ways
    let def_f = def(
        "f",
        fn_node(
            None,
            vec![
                arity(1, 0, constant(Value::keyword("one"))),
                arity(2, 0, constant(Value::keyword("two"))),
            ],
        ),
    );
    let one = do_node(vec![def_f.clone(), call(var_ref("f"), vec![int(1)])]);
    assert_eq!(run_both(&one), Value::keyword("one"));

    let two = do_node(vec![def_f, call(var_ref("f"), vec![int(1), int(2)])]);
    assert_eq!(run_both(&two), Value::keyword("two"));
}

#[test]
fn arity_mismatch_raises() {
    let program = call(fn_node(None, vec![arity(2, 0, local(0))]), vec![int(1)]);
    assert_eq!(run_both_err(&program), ErrorKind::Arity);
}

#[test]
fn closures_capture_by_value() {
    // (let [a 10 b 20] ((fn [] (+ a b))))
    let program = let_node(
        vec![binding(0, "a", int(10)), binding(1, "b", int(20))],
        call(
            fn_arity(
                None,
                0,
                false,
                vec![0, 1],
                false,
                call(var_ref("+"), vec![local(0), local(1)]),
            ),
            vec![],
        ),
    );
    assert_eq!(run_both(&program), Value::Int(30));
}

#[test]
fn nested_scope_capture() {
    // (let [a 1] (let [b 2] ((fn [] (+ a b)))))
    let program = let_node(
        vec![binding(0, "a", int(1))],
        let_node(
            vec![binding(1, "b", int(2))],
            call(
                fn_arity(
                    None,
                    0,
                    false,
                    vec![0, 1],
                    false,
                    call(var_ref("+"), vec![local(0), local(1)]),
                ),
                vec![],
            ),
        ),
    );
    assert_eq!(run_both(&program), Value::Int(3));
}

#[test]
fn named_fn_self_reference() {
    // ((fn f [n] (if (= n 0) 0 (f (- n 1)))) 10)
    let countdown = fn_arity(
        Some("f"),
        1,
        false,
        vec![],
        true,
        if_node(
            call(var_ref("="), vec![local(1), int(0)]),
            int(0),
            Some(call(
                local(0),
                vec![call(var_ref("-"), vec![local(1), int(1)])],
            )),
        ),
    );
    assert_eq!(run_both(&call(countdown, vec![int(10)])), Value::Int(0));
}

#[test]
fn self_reference_is_the_same_closure() {
    // ((fn f [] f)) returns the closure being called, on both backends
    let program = call(
        fn_arity(Some("f"), 0, false, vec![], true, local(0)),
        vec![],
    );

    let walked = {
        let env = corvine::boot();
        eval::run(&env, &program).unwrap()
    };
    let ran = {
        let env = corvine::boot();
        vm::run(&env, &compile(&program).unwrap()).unwrap()
    };
    for result in [walked, ran] {
        match result {
            Value::Fn(closure) => assert_eq!(closure.trace_name(), "f"),
            other => panic!("expected the closure itself, got {:?}", other),
        }
    }
}

#[test]
fn loop_recur_sums() {
    // (loop [i 0 s 0] (if (= i 10) s (recur (+ i 1) (+ s i))))
    let program = loop_node(
        vec![binding(0, "i", int(0)), binding(1, "s", int(0))],
        if_node(
            call(var_ref("="), vec![local(0), int(10)]),
            local(1),
            Some(recur(
                RecurKind::Loop,
                0,
                vec![
                    call(var_ref("+"), vec![local(0), int(1)]),
                    call(var_ref("+"), vec![local(1), local(0)]),
                ],
            )),
        ),
    );
    assert_eq!(run_both(&program), Value::Int(45));
}

#[test]
fn fn_level_recur() {
    // ((fn [n acc] (if (= n 0) acc (recur (- n 1) (+ acc n)))) 5 0)
    let program = call(
        fn_arity(
            None,
            2,
            false,
            vec![],
            false,
            if_node(
                call(var_ref("="), vec![local(0), int(0)]),
                local(1),
                Some(recur(
                    RecurKind::Fn,
                    0,
                    vec![
                        call(var_ref("-"), vec![local(0), int(1)]),
                        call(var_ref("+"), vec![local(1), local(0)]),
                    ],
                )),
            ),
        ),
        vec![int(5), int(0)],
    );
    assert_eq!(run_both(&program), Value::Int(15));
}

#[test]
fn letfn_mutual_recursion() {
    // (letfn [(even? [n] (if (= n 0) true (odd? (- n 1))))
    //         (odd?  [n] (if (= n 0) false (even? (- n 1))))]
    //   (even? 10))
    let even = fn_arity(
        None,
        1,
        false,
        vec![0, 1],
        false,
        if_node(
            call(var_ref("="), vec![local(2), int(0)]),
            constant(Value::Bool(true)),
            Some(call(
                local(1), // odd?
                vec![call(var_ref("-"), vec![local(2), int(1)])],
            )),
        ),
    );
    let odd = fn_arity(
        None,
        1,
        false,
        vec![0, 1],
        false,
        if_node(
            call(var_ref("="), vec![local(2), int(0)]),
            constant(Value::Bool(false)),
            Some(call(
                local(0), // even?
                vec![call(var_ref("-"), vec![local(2), int(1)])],
            )),
        ),
    );
    let program = letfn_node(
        vec![binding(0, "even?", even), binding(1, "odd?", odd)],
        call(local(0), vec![int(10)]),
    );
    assert_eq!(run_both(&program), Value::Bool(true));
}

#[test]
fn try_catch_finally() {
    // (try 1 (catch e 2)) -> 1
    assert_eq!(
        run_both(&try_node(int(1), Some((0, int(2))), None)),
        Value::Int(1)
    );

    // (try (throw :boom) (catch e e)) -> :boom
    let thrown = run_both(&try_node(
        throw(constant(Value::keyword("boom"))),
        Some((0, local(0))),
        None,
    ));
    assert_eq!(thrown, Value::keyword("boom"));

    // finally runs on both paths, its result discarded
    let program = let_node(
        vec![binding(0, "seen", call(var_ref("atom"), vec![int(0)]))],
        do_node(vec![
            try_node(
                int(1),
                Some((1, int(2))),
                Some(call(var_ref("reset!"), vec![local(0), int(10)])),
            ),
            try_node(
                throw(constant(Value::keyword("x"))),
                Some((1, int(3))),
                Some(call(var_ref("swap!"), vec![local(0), var_ref("inc")])),
            ),
            call(var_ref("deref"), vec![local(0)]),
        ]),
    );
    assert_eq!(run_both(&program), Value::Int(11));
}

#[test]
fn native_error_wraps_into_ex_info() {
    // (try (/ 1 0) (catch e (:message e)))
    let program = try_node(
        call(var_ref("/"), vec![int(1), int(0)]),
        Some((0, call(constant(Value::keyword("message")), vec![local(0)]))),
        None,
    );
    match run_both(&program) {
        Value::Str(s) => assert!(
            s.contains("divide by zero"),
            "message should mention division by zero: {:?}",
            s
        ),
        other => panic!("expected a message string, got {:?}", other),
    }
}

#[test]
fn uncaught_and_uncatchable() {
    // (/ 1 0) uncaught
    assert_eq!(
        run_both_err(&call(var_ref("/"), vec![int(1), int(0)])),
        ErrorKind::Arithmetic
    );

    // unbounded recursion is a stack overflow, and try can't catch
    // it; the walker nests native frames up to its depth bound, so
    // give it a roomy thread
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let runaway = fn_arity(
                Some("loop-forever"),
                0,
                false,
                vec![],
                true,
                // (+ 1 (loop-forever)) keeps the call off the tail
                call(var_ref("+"), vec![int(1), call(local(0), vec![])]),
            );
            let program = try_node(
                call(runaway, vec![]),
                Some((0, constant(Value::keyword("caught")))),
                None,
            );
            assert_eq!(run_both_err(&program), ErrorKind::StackOverflow);
        })
        .expect("spawn test thread")
        .join()
        .expect("recursion bound test panicked");
}

#[test]
fn transients_build_then_seal() {
    // (let [xs (persistent! (reduce conj! (transient []) (range 1000)))]
    //   (nth xs 999))
    let built = |tail: Spanned<Node>| {
        let_node(
            vec![binding(
                0,
                "xs",
                call(
                    var_ref("persistent!"),
                    vec![call(
                        var_ref("reduce"),
                        vec![
                            var_ref("conj!"),
                            call(
                                var_ref("transient"),
                                vec![constant(Value::vector(vec![]))],
                            ),
                            call(var_ref("range"), vec![int(1000)]),
                        ],
                    )],
                ),
            )],
            tail,
        )
    };

    let program = built(do_node(vec![
        call(var_ref("count"), vec![local(0)]),
        call(var_ref("nth"), vec![local(0), int(999)]),
    ]));
    assert_eq!(run_both(&program), Value::Int(999));

    let counted = built(call(var_ref("count"), vec![local(0)]));
    assert_eq!(run_both(&counted), Value::Int(1000));

    let out_of_bounds = built(call(var_ref("nth"), vec![local(0), int(1000)]));
    assert_eq!(run_both_err(&out_of_bounds), ErrorKind::Index);
}

#[test]
fn protocol_dispatch() {
    // (defprotocol P (f [x]))
    // (extend-type "string" P (f [x] :s))
    // (extend-type "integer" P (f [x] :i))
    // [(f "hi") (f 1)]
    let program = do_node(vec![
        defprotocol_node("P", &[("f", 1)]),
        extend_node("string", "P", "f", constant(Value::keyword("s"))),
        extend_node("integer", "P", "f", constant(Value::keyword("i"))),
        call(
            var_ref("vector"),
            vec![
                call(var_ref("f"), vec![constant(Value::from_str("hi"))]),
                call(var_ref("f"), vec![int(1)]),
            ],
        ),
    ]);
    assert_eq!(
        run_both(&program),
        Value::vector(vec![Value::keyword("s"), Value::keyword("i")])
    );

    // (f [1 2]) has no implementation
    let missing = do_node(vec![
        defprotocol_node("P", &[("f", 1)]),
        extend_node("string", "P", "f", constant(Value::keyword("s"))),
        call(
            var_ref("f"),
            vec![constant(Value::vector(vec![Value::Int(1), Value::Int(2)]))],
        ),
    ]);
    assert_eq!(run_both_err(&missing), ErrorKind::Type);
}

#[test]
fn multimethod_dispatch_with_default() {
    // (defmulti area :shape) + methods for :circle, :rect, :default
    let defmulti = Spanned::bare(Node::DefMulti {
        name: Rc::from("area"),
        dispatch: Box::new(constant(Value::keyword("shape"))),
        hierarchy: None,
    });
    let method = |dispatch: Value, result: i64| {
        Spanned::bare(Node::DefMethod {
            name: Rc::from("area"),
            dispatch_value: Box::new(constant(dispatch)),
            method: Box::new(fn_node(None, vec![arity(1, 0, int(result))])),
        })
    };
    let shape = |kind: &str| {
        constant(Value::map_from_pairs(vec![(
            Value::keyword("shape"),
            Value::keyword(kind),
        )]))
    };

    let program = do_node(vec![
        defmulti,
        method(Value::keyword("circle"), 1),
        method(Value::keyword("rect"), 2),
        method(Value::keyword("default"), 0),
        call(
            var_ref("vector"),
            vec![
                call(var_ref("area"), vec![shape("circle")]),
                call(var_ref("area"), vec![shape("rect")]),
                call(var_ref("area"), vec![shape("blob")]),
            ],
        ),
    ]);
    assert_eq!(
        run_both(&program),
        Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(0)])
    );
}

#[test]
fn values_in_callee_position() {
    // keyword-as-fn over a map
    let m = Value::map_from_pairs(vec![(Value::keyword("k"), Value::Int(5))]);
    assert_eq!(
        run_both(&call(
            constant(Value::keyword("k")),
            vec![constant(m.clone())],
        )),
        Value::Int(5)
    );
    // with a default
    assert_eq!(
        run_both(&call(
            constant(Value::keyword("missing")),
            vec![constant(m.clone()), int(9)],
        )),
        Value::Int(9)
    );

    // map-as-fn
    assert_eq!(
        run_both(&call(constant(m), vec![constant(Value::keyword("k"))])),
        Value::Int(5)
    );

    // set-as-fn: membership returns the element
    let s = Value::set_from_items(vec![Value::keyword("a")]);
    assert_eq!(
        run_both(&call(
            constant(s.clone()),
            vec![constant(Value::keyword("a"))],
        )),
        Value::keyword("a")
    );
    assert_eq!(
        run_both(&call(constant(s), vec![constant(Value::keyword("b"))])),
        Value::Nil
    );

    // vector-as-fn: index lookup
    let v = Value::vector(vec![Value::Int(10), Value::Int(20)]);
    assert_eq!(
        run_both(&call(constant(v.clone()), vec![int(1)])),
        Value::Int(20)
    );
    assert_eq!(
        run_both_err(&call(constant(v), vec![int(5)])),
        ErrorKind::Index
    );

    // non-callable
    assert_eq!(run_both_err(&call(int(3), vec![int(1)])), ErrorKind::Type);
}

#[test]
fn var_as_fn_dereferences() {
    // (def plus +) then call through the var
    let program = do_node(vec![
        def("plus", var_ref("+")),
        call(var_ref("plus"), vec![int(2), int(3)]),
    ]);
    assert_eq!(run_both(&program), Value::Int(5));
}

#[test]
fn atoms_count_to_one_thousand() {
    // (def a (atom 0))
    // (loop [i 0] (if (< i 1000) (do (swap! a inc) (recur (+ i 1)))))
    // @a
    let program = do_node(vec![
        def("a", call(var_ref("atom"), vec![int(0)])),
        loop_node(
            vec![binding(0, "i", int(0))],
            if_node(
                call(var_ref("<"), vec![local(0), int(1000)]),
                do_node(vec![
                    call(var_ref("swap!"), vec![var_ref("a"), var_ref("inc")]),
                    recur(
                        RecurKind::Loop,
                        0,
                        vec![call(var_ref("+"), vec![local(0), int(1)])],
                    ),
                ]),
                Some(constant(Value::Nil)),
            ),
        ),
        call(var_ref("deref"), vec![var_ref("a")]),
    ]);
    assert_eq!(run_both(&program), Value::Int(1000));
}

#[test]
fn set_bang_without_binding_frame() {
    let program = do_node(vec![
        def_dynamic("*level*", int(0)),
        set_bang("*level*", int(1)),
    ]);
    assert_eq!(run_both_err(&program), ErrorKind::ValueError);
}

#[test]
fn lazy_seq_realizes_once() {
    // (def hits (atom 0))
    // (def s (lazy-seq (do (swap! hits inc) (list 1 2))))
    // [(first s) (first s) @hits]
    let program = do_node(vec![
        def("hits", call(var_ref("atom"), vec![int(0)])),
        def(
            "s",
            lazy_seq(
                do_node(vec![
                    call(var_ref("swap!"), vec![var_ref("hits"), var_ref("inc")]),
                    call(var_ref("list"), vec![int(1), int(2)]),
                ]),
                0,
            ),
        ),
        call(
            var_ref("vector"),
            vec![
                call(var_ref("first"), vec![var_ref("s")]),
                call(var_ref("first"), vec![var_ref("s")]),
                call(var_ref("deref"), vec![var_ref("hits")]),
            ],
        ),
    ]);
    assert_eq!(
        run_both(&program),
        Value::vector(vec![Value::Int(1), Value::Int(1), Value::Int(1)])
    );
}

#[test]
fn repeat_is_lazy_both_ways() {
    // (count (repeat 5 :x)) and (nth (repeat 5 :x) 4)
    let bounded = call(
        var_ref("repeat"),
        vec![int(5), constant(Value::keyword("x"))],
    );
    assert_eq!(
        run_both(&call(var_ref("count"), vec![bounded.clone()])),
        Value::Int(5)
    );
    assert_eq!(
        run_both(&call(var_ref("nth"), vec![bounded, int(4)])),
        Value::keyword("x")
    );

    // the infinite form only realizes what gets forced
    let forever = call(var_ref("repeat"), vec![constant(Value::keyword("x"))]);
    assert_eq!(
        run_both(&call(var_ref("first"), vec![forever.clone()])),
        Value::keyword("x")
    );
    assert_eq!(
        run_both(&call(
            var_ref("first"),
            vec![call(var_ref("rest"), vec![forever])],
        )),
        Value::keyword("x")
    );
}

#[test]
fn apply_spreads_and_preserves_rest() {
    // (apply + (range 100)) -> 4950
    let program = call(
        var_ref("apply"),
        vec![var_ref("+"), call(var_ref("range"), vec![int(100)])],
    );
    assert_eq!(run_both(&program), Value::Int(4950));

    // (apply (fn [a & rest] rest) 1 (list 2 3)): the rest arg is the
    // seq itself, not a rewrapped copy
    let program = call(
        var_ref("apply"),
        vec![
            fn_arity(None, 1, true, vec![], false, local(1)),
            int(1),
            call(var_ref("list"), vec![int(2), int(3)]),
        ],
    );
    assert_eq!(
        run_both(&program),
        Value::list(vec![Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn cross_backend_calls() {
    // define a closure with the tree walker, call it from the VM
    let env = corvine::boot();
    let define = def(
        "tw-double",
        fn_node(
            None,
            vec![arity(1, 0, call(var_ref("+"), vec![local(0), local(0)]))],
        ),
    );
    eval::run(&env, &define).unwrap();

    let use_it = call(var_ref("tw-double"), vec![int(21)]);
    let proto = compile(&use_it).unwrap();
    assert_eq!(vm::run(&env, &proto).unwrap(), Value::Int(42));

    // ...and the other way: compile a definition, walk a call
    let define = def(
        "vm-triple",
        fn_node(None, vec![arity(1, 0, call(var_ref("*"), vec![local(0), int(3)]))]),
    );
    vm::run(&env, &compile(&define).unwrap()).unwrap();

    let use_it = call(var_ref("vm-triple"), vec![int(14)]);
    assert_eq!(eval::run(&env, &use_it).unwrap(), Value::Int(42));
}

#[test]
fn thrown_value_identity_crosses_backends() {
    // a VM-compiled fn throws a map; the tree walker catches the
    // very same value
    let env = corvine::boot();
    let define = def(
        "thrower",
        fn_node(
            None,
            vec![arity(
                0,
                0,
                throw(constant(Value::map_from_pairs(vec![(
                    Value::keyword("tag"),
                    Value::keyword("unique"),
                )]))),
            )],
        ),
    );
    vm::run(&env, &compile(&define).unwrap()).unwrap();

    let catcher = try_node(
        call(var_ref("thrower"), vec![]),
        Some((0, local(0))),
        None,
    );
    let caught = eval::run(&env, &catcher).unwrap();
    assert_eq!(
        caught,
        Value::map_from_pairs(vec![(
            Value::keyword("tag"),
            Value::keyword("unique"),
        )])
    );
}

#[test]
fn promoting_arithmetic_reaches_bigint() {
    // (loop [n 1 i 0] (if (= i 70) n (recur (*' n 2) (+ i 1))))
    let program = loop_node(
        vec![binding(0, "n", int(1)), binding(1, "i", int(0))],
        if_node(
            call(var_ref("="), vec![local(1), int(70)]),
            local(0),
            Some(recur(
                RecurKind::Loop,
                0,
                vec![
                    call(var_ref("*'"), vec![local(0), int(2)]),
                    call(var_ref("+"), vec![local(1), int(1)]),
                ],
            )),
        ),
    );
    match run_both(&program) {
        Value::BigInt(n) => {
            assert_eq!(format!("{}", n), format!("{}", 1u128 << 70));
        },
        other => panic!("2^70 should be a big integer, got {:?}", other),
    }
}
