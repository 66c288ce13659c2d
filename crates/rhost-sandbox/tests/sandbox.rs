//! End-to-end tests: real wasmtime instances built from WebAssembly text.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rhost_sandbox::api::sentinel;
use rhost_sandbox::{
    CoordinatedRequest, FetchError, FetchRequest, Fetcher, InstanceRef, ModuleSource, Runner, Runtime,
    SandboxConfig, SandboxError,
};

/// Imports, memory, and a bump allocator shared by every test module.
///
/// The heap starts at 16 KiB; `deallocate` rewinds it, which is enough for
/// one host allocation per invocation.
const PRELUDE: &str = r#"
  (import "env" "return_result" (func $return_result (param i32 i32 i32)))
  (import "env" "fetch_url" (func $fetch_url (param i32 i32 i32 i32 i32 i32 i32 i32) (result i32)))
  (import "env" "log_msg" (func $log_msg (param i32 i32 i32 i32)))
  (import "env" "request_get_field" (func $request_get_field (param i32 i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 16384))
  (func (export "allocate") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "deallocate") (param i32 i32)
    (global.set $heap (i32.const 16384)))
"#;

const ECHO: &str = r#"
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (call $return_result (local.get $ptr) (local.get $len) (local.get $tok)))
"#;

/// WASI preview1 imports; these must precede the prelude's definitions.
const WASI_IMPORTS: &str = r#"
  (import "wasi_snapshot_preview1" "environ_sizes_get" (func $environ_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "args_sizes_get" (func $args_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_prestat_get" (func $fd_prestat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
"#;

fn module(body: &str) -> ModuleSource {
    ModuleSource::from(format!("(module {PRELUDE} {body})").into_bytes())
}

fn wasi_module(body: &str) -> ModuleSource {
    ModuleSource::from(format!("(module {WASI_IMPORTS} {PRELUDE} {body})").into_bytes())
}

struct StaticFetcher {
    response: Result<Vec<u8>, FetchError>,
    seen: Mutex<Vec<FetchRequest>>,
}

impl StaticFetcher {
    fn new(response: Result<Vec<u8>, FetchError>) -> Arc<Self> {
        Arc::new(Self {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn ok(body: &[u8]) -> Arc<Self> {
        Self::new(Ok(body.to_vec()))
    }

    fn failing() -> Arc<Self> {
        Self::new(Err(FetchError::Transport("connection refused".into())))
    }

    fn truncated_body() -> Arc<Self> {
        Self::new(Err(FetchError::Body("connection reset mid-body".into())))
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        self.seen.lock().unwrap().push(request.clone());
        self.response.clone()
    }
}

fn runtime() -> Runtime {
    Runtime::new(SandboxConfig::default()).unwrap()
}

fn runner(rt: &Runtime, name: &str, body: &str) -> Runner {
    let runner = Runner::new(rt.environment(name, module(body)));
    runner.on_start().unwrap();
    runner
}

fn as_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes(bytes.try_into().unwrap())
}

// ---------------------------------------------------------------------------
// Basic execution
// ---------------------------------------------------------------------------

#[test]
fn echo_round_trip() {
    let rt = runtime();
    let echo = runner(&rt, "echo", ECHO);

    assert_eq!(echo.run("hello runnable").unwrap(), b"hello runnable");
    assert_eq!(echo.run(vec![0u8, 1, 2, 255]).unwrap(), vec![0, 1, 2, 255]);
    assert_eq!(echo.run(Vec::new()).unwrap(), Vec::<u8>::new());
}

#[test]
fn tokens_are_retired_after_each_run() {
    let rt = runtime();
    let echo = runner(&rt, "echo", ECHO);

    echo.run("one").unwrap();
    echo.run("two").unwrap();
    assert!(rt.idents().is_empty());
}

#[test]
fn missing_return_result_is_reported() {
    let rt = runtime();
    let silent = runner(
        &rt,
        "silent",
        r#"(func (export "run_e") (param i32 i32 i32))"#,
    );

    match silent.run("anything") {
        Err(SandboxError::NoResult { name }) => assert_eq!(name, "silent"),
        other => panic!("expected NoResult, got: {other:?}"),
    }
}

#[test]
fn extra_results_are_discarded() {
    let rt = runtime();
    let twice = runner(
        &rt,
        "twice",
        r#"
        (data (i32.const 300) "second")
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (call $return_result (local.get $ptr) (local.get $len) (local.get $tok))
          (call $return_result (i32.const 300) (i32.const 6) (local.get $tok)))
        "#,
    );

    assert_eq!(twice.run("first").unwrap(), b"first");
    assert_eq!(twice.run("again").unwrap(), b"again");
}

#[test]
fn init_runs_once_after_instantiation() {
    let rt = runtime();
    let init = runner(
        &rt,
        "init",
        r#"
        (global $ready (mut i32) (i32.const 0))
        (func (export "init")
          (global.set $ready (i32.add (global.get $ready) (i32.const 41))))
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (i32.store (i32.const 64) (i32.add (global.get $ready) (i32.const 1)))
          (call $return_result (i32.const 64) (i32.const 4) (local.get $tok)))
        "#,
    );

    assert_eq!(as_i32(&init.run("x").unwrap()), 42);
    assert_eq!(as_i32(&init.run("x").unwrap()), 42);
}

#[test]
fn log_msg_does_not_disturb_the_run() {
    let rt = runtime();
    let logger = runner(
        &rt,
        "logger",
        r#"
        (data (i32.const 400) "hello from the guest")
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (call $log_msg (i32.const 400) (i32.const 20) (i32.const 3) (local.get $tok))
          (call $log_msg (i32.const 400) (i32.const 20) (i32.const 1) (local.get $tok))
          (call $log_msg (i32.const 60000) (i32.const 9000) (i32.const 2) (local.get $tok))
          (call $return_result (local.get $ptr) (local.get $len) (local.get $tok)))
        "#,
    );

    assert_eq!(logger.run("logged").unwrap(), b"logged");
}

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

#[test]
fn missing_allocate_is_a_load_error() {
    let rt = runtime();
    let env = rt.environment(
        "noalloc",
        ModuleSource::from(
            br#"(module
                  (memory (export "memory") 1)
                  (func (export "deallocate") (param i32 i32))
                  (func (export "run_e") (param i32 i32 i32)))"#
                .to_vec(),
        ),
    );

    match env.add_instance() {
        Err(SandboxError::Load { name, reason }) => {
            assert_eq!(name, "noalloc");
            assert!(reason.contains("allocate"), "reason: {reason}");
        }
        other => panic!("expected Load, got: {other:?}"),
    }
    assert!(env.is_empty());
}

#[test]
fn missing_entrypoint_is_a_load_error() {
    let rt = runtime();
    let env = rt.environment("noentry", module(""));
    let err = env.add_instance().unwrap_err();
    assert!(err.to_string().contains("run_e"), "error: {err}");
}

#[test]
fn invalid_bytes_are_a_load_error() {
    let rt = runtime();
    let env = rt.environment("garbage", ModuleSource::from(b"not wasm at all".to_vec()));
    assert!(matches!(env.add_instance(), Err(SandboxError::Load { .. })));

    let env = rt.environment_from_file("missing", "/definitely/not/here.wasm");
    assert!(matches!(env.add_instance(), Err(SandboxError::Load { .. })));
}

#[test]
fn trapping_init_is_a_load_error() {
    let rt = runtime();
    let env = rt.environment(
        "badinit",
        module(
            r#"
            (func (export "init") unreachable)
            (func (export "run_e") (param i32 i32 i32))
            "#,
        ),
    );
    assert!(matches!(env.add_instance(), Err(SandboxError::Load { .. })));
}

#[test]
fn empty_pool_has_no_instance() {
    let rt = runtime();
    let env = rt.environment("empty", module(ECHO));

    match env.use_instance(|_, _| Ok(())) {
        Err(SandboxError::NoInstanceAvailable { name }) => assert_eq!(name, "empty"),
        other => panic!("expected NoInstanceAvailable, got: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Pool behaviour
// ---------------------------------------------------------------------------

#[test]
fn round_robin_wraps() {
    let rt = runtime();
    let env = rt.environment("rr", module(ECHO));
    for expected in 0..3 {
        assert_eq!(env.add_instance().unwrap(), expected);
    }
    assert_eq!(env.len(), 3);

    let picked: Vec<usize> = (0..6)
        .map(|_| env.use_instance(|instance, _| Ok(instance.index())).unwrap())
        .collect();
    assert_eq!(picked, vec![1, 2, 0, 1, 2, 0]);
}

/// Echo module whose `init` spins for a while.
const SLOW_INIT: &str = r#"
  (func (export "init")
    (local $i i32)
    (loop $spin
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $spin (i32.lt_u (local.get $i) (i32.const 30000000)))))
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (call $return_result (local.get $ptr) (local.get $len) (local.get $tok)))
"#;

#[test]
fn growing_the_pool_does_not_block_live_instances() {
    let config = SandboxConfig::new()
        .with_max_fuel(1 << 40)
        .with_max_execution_ms(60_000);
    let rt = Runtime::new(config).unwrap();
    let env = rt.environment("slow", module(SLOW_INIT));

    let started = Instant::now();
    assert_eq!(env.add_instance().unwrap(), 0);
    let init_time = started.elapsed();

    let adder = {
        let env = Arc::clone(&env);
        std::thread::spawn(move || env.add_instance())
    };
    std::thread::sleep(init_time / 4);

    let begin = Instant::now();
    let output = env
        .use_instance(|instance, token| instance.run_entry(b"live", token))
        .unwrap();
    let waited = begin.elapsed();

    assert_eq!(output, b"live");
    assert!(
        waited < init_time / 2,
        "call waited {waited:?} while a {init_time:?} init was running"
    );
    assert_eq!(adder.join().unwrap().unwrap(), 1);
    assert_eq!(env.len(), 2);
}

#[test]
fn single_instance_is_used_exclusively() {
    let rt = runtime();
    let counter = runner(
        &rt,
        "counter",
        r#"
        (global $count (mut i32) (i32.const 0))
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (global.set $count (i32.add (global.get $count) (i32.const 1)))
          (i32.store (i32.const 64) (global.get $count))
          (call $return_result (i32.const 64) (i32.const 4) (local.get $tok)))
        "#,
    );

    let threads = 8;
    let per_thread = 25;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                (0..per_thread)
                    .map(|_| as_i32(&counter.run("tick").unwrap()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for value in handle.join().unwrap() {
            assert!(seen.insert(value), "duplicate count {value}");
        }
    }
    let expected: HashSet<i32> = (1..=threads * per_thread).collect();
    assert_eq!(seen, expected);
}

#[test]
fn instances_of_one_environment_have_separate_memory() {
    let rt = runtime();
    let env = rt.environment("split", module(ECHO));
    env.add_instance().unwrap();
    env.add_instance().unwrap();

    // index 1, then index 0
    env.use_instance(|instance, _| {
        let ptr = instance.write_memory(b"only in one")?;
        assert_eq!(ptr, 16384);
        Ok(())
    })
    .unwrap();
    let other = env
        .use_instance(|instance, _| instance.read_memory(16384, 11))
        .unwrap();
    assert_eq!(other, vec![0u8; 11]);
}

// ---------------------------------------------------------------------------
// Memory bridge
// ---------------------------------------------------------------------------

#[test]
fn memory_round_trip() {
    let rt = runtime();
    let env = rt.environment("mem", module(ECHO));
    env.add_instance().unwrap();

    let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    let back = env
        .use_instance(|instance, _| {
            let ptr = instance.write_memory(&data)?;
            let back = instance.read_memory(ptr, data.len() as i32)?;
            instance.deallocate(ptr, data.len() as i32);
            Ok(back)
        })
        .unwrap();
    assert_eq!(back, data);
}

#[test]
fn out_of_bounds_reads_are_rejected() {
    let rt = runtime();
    let env = rt.environment("oob", module(ECHO));
    env.add_instance().unwrap();

    let err = env
        .use_instance(|instance, _| instance.read_memory(65530, 100))
        .unwrap_err();
    match err {
        SandboxError::MemoryAccess { pointer, length, size } => {
            assert_eq!(pointer, 65530);
            assert_eq!(length, 100);
            assert_eq!(size, 65536);
        }
        other => panic!("expected MemoryAccess, got: {other}"),
    }

    assert!(env.use_instance(|instance, _| instance.read_memory(-4, 4)).is_err());
}

#[test]
fn bad_result_pointer_yields_no_result() {
    let rt = runtime();
    let wild = runner(
        &rt,
        "wild",
        r#"
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (call $return_result (i32.const 65000) (i32.const 4096) (local.get $tok)))
        "#,
    );

    assert!(matches!(wild.run("x"), Err(SandboxError::NoResult { .. })));
}

// ---------------------------------------------------------------------------
// Capabilities and tokens
// ---------------------------------------------------------------------------

/// Fetches `https://example.com/data` into a 4-byte buffer, records the
/// reported length at 64, then fetches again with headers into a buffer of
/// exactly that size and returns it.
const FETCH_NEGOTIATE: &str = r#"
  (data (i32.const 0) "https://example.com/data")
  (data (i32.const 128) "https://example.com/data::x-api-key:secret")
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (local $n i32)
    (local.set $n
      (call $fetch_url (i32.const 1) (i32.const 0) (i32.const 24) (i32.const 0) (i32.const 0)
                       (i32.const 4096) (i32.const 4) (local.get $tok)))
    (i32.store (i32.const 64) (local.get $n))
    (local.set $n
      (call $fetch_url (i32.const 2) (i32.const 128) (i32.const 42) (local.get $ptr) (local.get $len)
                       (i32.const 8192) (local.get $n) (local.get $tok)))
    (call $return_result (i32.const 8192) (local.get $n) (local.get $tok)))
"#;

#[test]
fn fetch_negotiates_capacity() {
    let body = b"hello from the other side";
    let fetcher = StaticFetcher::ok(body);
    let rt = Runtime::with_fetcher(SandboxConfig::default(), fetcher.clone()).unwrap();
    let fetch = runner(&rt, "fetch", FETCH_NEGOTIATE);

    assert_eq!(fetch.run("payload").unwrap(), body);

    let (reported, untouched) = fetch
        .environment()
        .use_instance(|instance, _| Ok((instance.read_memory(64, 4)?, instance.read_memory(4096, 4)?)))
        .unwrap();
    assert_eq!(as_i32(&reported), body.len() as i32);
    assert_eq!(untouched, vec![0u8; 4]);

    let seen = fetcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, reqwest::Method::GET);
    assert!(seen[0].body.is_empty());
    assert_eq!(seen[1].method, reqwest::Method::POST);
    assert_eq!(seen[1].url.as_str(), "https://example.com/data");
    assert_eq!(seen[1].headers["x-api-key"], "secret");
    assert_eq!(seen[1].headers["content-type"], "application/octet-stream");
    assert_eq!(seen[1].body, b"payload");
}

/// Calls `fetch_url` once with the method code and a token offset taken
/// from the input, then returns the status as four bytes.
const FETCH_STATUS: &str = r#"
  (data (i32.const 0) "https://example.com/data")
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (i32.store (i32.const 64)
      (call $fetch_url (i32.load8_u (local.get $ptr)) (i32.const 0) (i32.const 24) (i32.const 0) (i32.const 0)
                       (i32.const 4096) (i32.const 1024)
                       (i32.add (local.get $tok) (i32.load8_u (i32.add (local.get $ptr) (i32.const 1))))))
    (call $return_result (i32.const 64) (i32.const 4) (local.get $tok)))
"#;

#[test]
fn fetch_sentinels() {
    let rt = Runtime::with_fetcher(SandboxConfig::default(), StaticFetcher::ok(b"ok")).unwrap();
    let status = runner(&rt, "status", FETCH_STATUS);

    assert_eq!(as_i32(&status.run(vec![1u8, 0]).unwrap()), 2);
    assert_eq!(as_i32(&status.run(vec![9u8, 0]).unwrap()), sentinel::BAD_REQUEST);
    assert_eq!(as_i32(&status.run(vec![1u8, 1]).unwrap()), sentinel::INVALID_TOKEN);

    let rt = Runtime::with_fetcher(SandboxConfig::default(), StaticFetcher::failing()).unwrap();
    let status = runner(&rt, "status", FETCH_STATUS);
    assert_eq!(as_i32(&status.run(vec![1u8, 0]).unwrap()), sentinel::TRANSPORT_FAILURE);

    let rt = Runtime::with_fetcher(SandboxConfig::default(), StaticFetcher::truncated_body()).unwrap();
    let status = runner(&rt, "status", FETCH_STATUS);
    assert_eq!(as_i32(&status.run(vec![1u8, 0]).unwrap()), sentinel::BODY_READ_FAILURE);
}

/// Input `[0]` passes a URL range past the end of memory; `[1]` passes a
/// valid URL but a destination that the response overruns.  The status is
/// returned as four bytes.
const FETCH_WILD: &str = r#"
  (data (i32.const 0) "https://example.com/data")
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (local $wild_url i32)
    (local.set $wild_url (i32.eqz (i32.load8_u (local.get $ptr))))
    (i32.store (i32.const 64)
      (call $fetch_url (i32.const 1)
                       (select (i32.const 65530) (i32.const 0) (local.get $wild_url))
                       (select (i32.const 100) (i32.const 24) (local.get $wild_url))
                       (i32.const 0) (i32.const 0)
                       (select (i32.const 4096) (i32.const 65530) (local.get $wild_url))
                       (i32.const 1024) (local.get $tok)))
    (call $return_result (i32.const 64) (i32.const 4) (local.get $tok)))
"#;

#[test]
fn fetch_memory_faults() {
    let fetcher = StaticFetcher::ok(b"0123456789");
    let rt = Runtime::with_fetcher(SandboxConfig::default(), fetcher.clone()).unwrap();
    let wild = runner(&rt, "wild", FETCH_WILD);

    assert_eq!(as_i32(&wild.run(vec![0u8]).unwrap()), sentinel::MEMORY_FAULT);
    assert!(fetcher.seen.lock().unwrap().is_empty());

    assert_eq!(as_i32(&wild.run(vec![1u8]).unwrap()), sentinel::MEMORY_FAULT);
    assert_eq!(fetcher.seen.lock().unwrap().len(), 1);
}

#[test]
fn foreign_token_is_refused() {
    let fetcher = StaticFetcher::ok(b"secret");
    let rt = Runtime::with_fetcher(SandboxConfig::default(), fetcher.clone()).unwrap();
    let victim = rt.environment("victim", module(ECHO));
    victim.add_instance().unwrap();
    let attacker = rt.environment("attacker", module(FETCH_STATUS));
    attacker.add_instance().unwrap();

    // A live token that belongs to the victim's instance.
    let foreign = rt
        .idents()
        .scoped(InstanceRef {
            env: victim.id(),
            index: 0,
        })
        .unwrap();

    let outcome = attacker.use_instance(|instance, _own| instance.run_entry(&[1, 0], foreign.token()));
    assert!(matches!(outcome, Err(SandboxError::NoResult { .. })));
    assert!(fetcher.seen.lock().unwrap().is_empty());
}

/// Reads header `x-name` into a 512-byte buffer and returns it, or returns
/// the sentinel as four bytes.
const REQUEST_HEADER: &str = r#"
  (data (i32.const 256) "x-name")
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (local $n i32)
    (local.set $n
      (call $request_get_field (i32.const 2) (i32.const 256) (i32.const 6)
                               (i32.const 1024) (i32.const 512) (local.get $tok)))
    (if (i32.ge_s (local.get $n) (i32.const 0))
      (then (call $return_result (i32.const 1024) (local.get $n) (local.get $tok)))
      (else
        (i32.store (i32.const 64) (local.get $n))
        (call $return_result (i32.const 64) (i32.const 4) (local.get $tok)))))
"#;

#[test]
fn request_fields_are_served_while_bound() {
    let rt = runtime();
    let header = runner(&rt, "header", REQUEST_HEADER);

    let request = CoordinatedRequest::new("GET", "/hello").with_header("X-Name", "ada");
    assert_eq!(header.run(request).unwrap(), b"ada");

    // Plain bytes bind nothing.
    assert_eq!(as_i32(&header.run("no request").unwrap()), sentinel::NO_REQUEST);

    let request = CoordinatedRequest::new("GET", "/hello");
    assert_eq!(as_i32(&header.run(request).unwrap()), sentinel::FIELD_NOT_SET);
}

#[test]
fn request_input_is_json() {
    let rt = runtime();
    let echo = runner(&rt, "echo", ECHO);

    let request = CoordinatedRequest::new("POST", "/users").with_id("r-1").with_body("{}");
    let output = echo.run(request.clone()).unwrap();
    assert_eq!(CoordinatedRequest::from_json(&output).unwrap(), request);
}

// ---------------------------------------------------------------------------
// Execution limits
// ---------------------------------------------------------------------------

const SPIN: &str = r#"
  (func (export "run_e") (param i32 i32 i32)
    (loop $spin (br $spin)))
"#;

#[test]
fn runaway_module_times_out() {
    let config = SandboxConfig::new()
        .with_max_fuel(1 << 50)
        .with_max_execution_ms(50);
    let rt = Runtime::new(config).unwrap();
    let spin = runner(&rt, "spin", SPIN);

    match spin.run("x") {
        Err(SandboxError::Timeout { limit_ms }) => assert_eq!(limit_ms, 50),
        other => panic!("expected Timeout, got: {other:?}"),
    }
    assert!(rt.idents().is_empty());
}

#[test]
fn runaway_module_runs_out_of_fuel() {
    let config = SandboxConfig::new()
        .with_max_fuel(10_000)
        .with_max_execution_ms(60_000);
    let rt = Runtime::new(config).unwrap();
    let spin = runner(&rt, "spin", SPIN);

    match spin.run("x") {
        Err(SandboxError::FuelExhausted { limit }) => assert_eq!(limit, 10_000),
        other => panic!("expected FuelExhausted, got: {other:?}"),
    }
}

#[test]
fn instance_recovers_after_a_trap() {
    let rt = runtime();
    let picky = runner(
        &rt,
        "picky",
        r#"
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (if (i32.eqz (local.get $len)) (then unreachable))
          (call $return_result (local.get $ptr) (local.get $len) (local.get $tok)))
        "#,
    );

    assert!(matches!(picky.run(Vec::new()), Err(SandboxError::Trap(_))));
    assert_eq!(picky.run("fine").unwrap(), b"fine");
}

// ---------------------------------------------------------------------------
// WASI
// ---------------------------------------------------------------------------

fn wasi_runner(rt: &Runtime, name: &str, body: &str) -> Runner {
    let runner = Runner::new(rt.environment(name, wasi_module(body)));
    runner.on_start().unwrap();
    runner
}

/// Fills 0..16 with 0xff, asks WASI for the environment and argument sizes
/// over it, and records each errno plus the errno of `fd_prestat_get(3)`.
/// Returns bytes 0..28.
const WASI_SIZES: &str = r#"
  (data (i32.const 0) "\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff\ff")
  (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
    (i32.store (i32.const 16) (call $environ_sizes_get (i32.const 0) (i32.const 4)))
    (i32.store (i32.const 20) (call $args_sizes_get (i32.const 8) (i32.const 12)))
    (i32.store (i32.const 24) (call $fd_prestat_get (i32.const 3) (i32.const 32)))
    (call $return_result (i32.const 0) (i32.const 28) (local.get $tok)))
"#;

#[test]
fn wasi_context_is_empty() {
    let rt = runtime();
    let sizes = wasi_runner(&rt, "sizes", WASI_SIZES);

    let output = sizes.run("x").unwrap();
    // No variables, no arguments, both calls succeed.
    assert_eq!(&output[..24], &[0u8; 24]);
    // No preopened directory at fd 3: EBADF.
    assert_eq!(as_i32(&output[24..]), 8);
}

#[test]
fn proc_exit_ends_the_invocation() {
    let rt = runtime();
    let quitter = wasi_runner(
        &rt,
        "quitter",
        r#"
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (call $proc_exit (i32.const 3))
          (call $return_result (local.get $ptr) (local.get $len) (local.get $tok)))
        "#,
    );

    match quitter.run("x") {
        Err(SandboxError::Exit { code }) => assert_eq!(code, 3),
        other => panic!("expected Exit, got: {other:?}"),
    }
    assert!(rt.idents().is_empty());

    // The instance stays usable.
    assert!(matches!(quitter.run("y"), Err(SandboxError::Exit { code: 3 })));
}

#[test]
fn proc_exit_zero_keeps_the_result() {
    let rt = runtime();
    let done = wasi_runner(
        &rt,
        "done",
        r#"
        (func (export "run_e") (param $ptr i32) (param $len i32) (param $tok i32)
          (call $return_result (local.get $ptr) (local.get $len) (local.get $tok))
          (call $proc_exit (i32.const 0)))
        "#,
    );

    assert_eq!(done.run("finished").unwrap(), b"finished");
}
