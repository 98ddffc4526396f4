//! Contracts in WebAssembly text format.

/// Returns 42 from its entry point.
pub const ANSWER: &str = r#"
(module
  (func (export "run") (result i64)
    (i64.const 42)))
"#;

/// Concludes with the string `hello`.
pub const HELLO: &str = r#"
(module
  (import "env" "conclude" (func $conclude (param i64 i64)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hello")
  (func (export "run")
    (call $conclude (i64.const 16) (i64.const 5))))
"#;

/// Increments the `count` state key and returns the new value.
pub const COUNTER: &str = r#"
(module
  (import "env" "state_get" (func $get (param i64 i64) (result i64)))
  (import "env" "state_set" (func $set (param i64 i64 i64)))
  (import "env" "log" (func $log (param i64)))
  (memory (export "memory") 1)
  (data (i32.const 0) "count")
  (func (export "run") (result i64)
    (local $next i64)
    (local.set $next
      (i64.add (call $get (i64.const 0) (i64.const 5)) (i64.const 1)))
    (call $set (i64.const 0) (i64.const 5) (local.get $next))
    (call $log (local.get $next))
    (local.get $next)))
"#;

/// Produces nothing.
pub const SILENT: &str = r#"
(module
  (func (export "run")))
"#;

/// Concludes with a buffer past the end of its memory.
pub const OUT_OF_BOUNDS: &str = r#"
(module
  (import "env" "conclude" (func $conclude (param i64 i64)))
  (memory (export "memory") 1)
  (func (export "run")
    (call $conclude (i64.const 1000000) (i64.const 5))))
"#;

/// Never returns.
pub const ENDLESS: &str = r#"
(module
  (func (export "run")
    (loop $forever
      (br $forever))))
"#;
