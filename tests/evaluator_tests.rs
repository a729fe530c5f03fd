use cmm::config::Config;
use cmm::environment::Environment;
use cmm::error::{CmmError, ErrorKind};
use cmm::evaluator::Evaluator;
use cmm::lexer::Lexer;
use cmm::natives::{NativeContext, NativeRegistry};
use cmm::parser::Parser;
use cmm::value::Value;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::rc::Rc;

/// Output sink the test keeps a handle to after the evaluator takes its box.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("output should be utf-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Run {
    result: Result<i32, CmmError>,
    output: String,
}

impl Run {
    fn status(&self) -> i32 {
        match &self.result {
            Ok(status) => *status,
            Err(err) => panic!("program failed: {}\noutput: {}", err, self.output),
        }
    }

    fn error(&self) -> &CmmError {
        match &self.result {
            Ok(status) => panic!("program succeeded with status {}", status),
            Err(err) => err,
        }
    }
}

fn execute(source: &str, input: &str, config: Config, natives: NativeRegistry) -> Run {
    let program = Parser::new(Lexer::new(source))
        .parse()
        .unwrap_or_else(|err| panic!("program should parse: {}", err));
    let output = SharedBuffer::default();
    let mut evaluator = Evaluator::new(&program)
        .with_config(config)
        .with_natives(natives)
        .with_input(Box::new(Cursor::new(input.to_string())))
        .with_output(Box::new(output.clone()));
    let result = evaluator.interpret(&["test.cmm".to_string(), "extra".to_string()]);
    Run {
        result,
        output: output.contents(),
    }
}

fn run(source: &str) -> Run {
    execute(source, "", Config::default(), NativeRegistry::standard())
}

fn run_error(source: &str) -> String {
    let run = run(source);
    let error = run.error();
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    error.message.clone()
}

// ============================================================================
// Program entry and exit status
// ============================================================================

#[test]
fn main_result_is_the_exit_status() {
    assert_eq!(run("int main() { return 42; }").status(), 42);
}

#[test]
fn top_level_return_ends_the_program() {
    let run = run("println(\"before\"); return 3; println(\"after\");");
    assert_eq!(run.status(), 3);
    assert_eq!(run.output, "before\n");
}

#[test]
fn top_level_statements_run_before_main() {
    let run = run(
        "int main() { println(\"main\"); return 0; }\n\
         println(\"top\");",
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "top\nmain\n");
}

#[test]
fn program_without_main_exits_with_zero() {
    assert_eq!(run("int x = 1; x += 1;").status(), 0);
}

#[test]
fn exit_status_keeps_the_full_int() {
    assert_eq!(run("int main() { return 256; }").status(), 256);
    assert_eq!(run("bool main() { return true; }").status(), 1);
    assert_eq!(run("return;").status(), 0);
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn arithmetic_promotes_mixed_operands() {
    let run = run(
        "int main() {\n\
             int x = 7;\n\
             double y = 2;\n\
             println(x / 2, \" \", x % 3, \" \", y * 1.5, \" \", x / 2.0);\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "3 1 3.0 3.5\n");
}

#[test]
fn integer_arithmetic_wraps() {
    let run = run("int big = 0x7FFFFFFFFFFFFFFF; println(big + 1);");
    assert_eq!(run.output, "-9223372036854775808\n");
}

#[test]
fn bitwise_and_shift_operators() {
    let run = run("println(6 & 3, \" \", 6 | 3, \" \", 6 ^ 3, \" \", 1 << 4, \" \", -16 >> 2, \" \", ~0);");
    assert_eq!(run.output, "2 7 5 16 -4 -1\n");
}

#[test]
fn strings_concatenate_and_compare() {
    let run = run(
        "string s = \"ab\" + \"c\";\n\
         println(s, \" \", s == \"abc\", \" \", \"a\" < \"b\", \" \", 1 == 1.0);",
    );
    assert_eq!(run.output, "abc true true true\n");
}

#[test]
fn logical_operators_short_circuit() {
    let run = run(
        "int calls = 0;\n\
         bool touch() { calls += 1; return true; }\n\
         int main() {\n\
             bool a = false && touch();\n\
             bool b = true || touch();\n\
             bool c = true && touch();\n\
             println(calls, \" \", a, \" \", b, \" \", c);\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "1 false true true\n");
}

#[test]
fn compound_assignment_reads_then_stores() {
    let source = "int main() {\n\
                      int x = 10;\n\
                      x -= 3; x *= 2; x /= 4; x %= 3; x <<= 2; x |= 1;\n\
                      return x;\n\
                  }";
    assert_eq!(run(source).status(), 1);
}

#[test]
fn assignment_is_an_expression() {
    assert_eq!(run("int main() { int a; int b; a = b = 4; return a + b; }").status(), 8);
}

#[test]
fn stores_convert_to_the_variable_type() {
    assert_eq!(run("int main() { int x = 0; x = 2.9; return x; }").status(), 2);
    let message = run_error("int main() { int x = 0; x = \"s\"; return x; }");
    assert!(message.contains("cannot store a string value"), "{}", message);
}

#[test]
fn operator_type_errors() {
    assert_eq!(run_error("int main() { return 1 / 0; }"), "Division by zero");
    assert_eq!(run_error("int main() { return 5 % 0; }"), "Division by zero");
    assert_eq!(
        run_error("int main() { return 1 << 64; }"),
        "Shift amount 64 is out of range"
    );
    assert_eq!(
        run_error("int main() { return \"a\" - 1; }"),
        "Cannot apply '-' to string and int"
    );
    assert!(run_error("int main() { return 1.5 & 1; }").contains("requires int operands"));
}

#[test]
fn conditions_must_be_bool_or_numeric() {
    let message = run_error("int main() { if (\"s\") return 1; return 0; }");
    assert!(message.starts_with("Condition must be a bool or a number"), "{}", message);
    assert_eq!(run("int main() { if (0 || 2) return 1; return 0; }").status(), 1);
}

// ============================================================================
// Statements and control flow
// ============================================================================

#[test]
fn break_propagates_out_of_nested_blocks() {
    let run = run(
        "int main() {\n\
             int i = 0;\n\
             while (true) {\n\
                 i += 1;\n\
                 if (i == 5) { break; }\n\
             }\n\
             println(i);\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.output, "5\n");
}

#[test]
fn continue_skips_to_the_for_increment() {
    let run = run(
        "int main() {\n\
             int sum = 0;\n\
             for (int i = 0; i < 10; i += 1) {\n\
                 if (i % 2 == 0) continue;\n\
                 sum += i;\n\
             }\n\
             return sum;\n\
         }",
    );
    assert_eq!(run.status(), 25);
}

#[test]
fn do_while_runs_the_body_first() {
    assert_eq!(
        run("int main() { int n = 10; do { n += 1; } while (n < 5); return n; }").status(),
        11
    );
}

#[test]
fn return_unwinds_loops() {
    let source = "int find(int target) {\n\
                      for (int i = 0; i < 100; i += 1) {\n\
                          while (true) { if (i == target) return i * 2; break; }\n\
                      }\n\
                      return -1;\n\
                  }\n\
                  int main() { return find(7); }";
    assert_eq!(run(source).status(), 14);
}

#[test]
fn for_loop_variable_is_scoped_to_the_loop() {
    let message = run_error("int main() { for (int i = 0; i < 2; i += 1) { } return i; }");
    assert_eq!(message, "Undefined variable 'i'");
}

// ============================================================================
// Scoping
// ============================================================================

#[test]
fn redeclaration_in_the_same_frame_is_an_error() {
    let message = run_error("int main() { int x = 1; int x = 2; return x; }");
    assert_eq!(message, "Variable 'x' is already declared in this scope");
}

#[test]
fn inner_blocks_may_shadow() {
    assert_eq!(
        run("int main() { int x = 1; { int x = 2; x += 1; } return x; }").status(),
        1
    );
}

#[test]
fn undefined_variable_and_function() {
    assert_eq!(run_error("int main() { return y; }"), "Undefined variable 'y'");
    assert_eq!(run_error("int main() { return nope(); }"), "Undefined function 'nope'");
}

#[test]
fn functions_do_not_see_caller_locals() {
    let message = run_error(
        "int peek() { return secret; }\n\
         int main() { int secret = 5; return peek(); }",
    );
    assert_eq!(message, "Undefined variable 'secret'");
}

#[test]
fn functions_share_top_level_bindings() {
    let source = "int counter = 0;\n\
                  void bump() { counter += 1; }\n\
                  int main() { bump(); bump(); return counter; }";
    assert_eq!(run(source).status(), 2);
}

// ============================================================================
// Functions and infix operators
// ============================================================================

#[test]
fn recursion() {
    let source = "int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); }\n\
                  int main() { return fact(5); }";
    assert_eq!(run(source).status(), 120);
}

#[test]
fn deep_but_bounded_recursion_succeeds() {
    let run = run(
        "int sum(int n) { if (n == 0) return 0; return n + sum(n - 1); }\n\
         int main() { println(sum(2000)); return 0; }",
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "2001000\n");
}

#[test]
fn deeply_nested_statements_and_expressions_run() {
    let source = "int main() {".to_string()
        + &"{".repeat(200)
        + &"if (1) ".repeat(200)
        + "return "
        + &"-".repeat(400)
        + "3;"
        + &"}".repeat(200)
        + " return 0; }";
    assert_eq!(run(&source).status(), 3);
}

#[test]
fn call_depth_limit_is_a_runtime_error() {
    let config = Config {
        max_call_depth: 50,
        ..Config::default()
    };
    let run = execute(
        "int down(int n) { return down(n + 1); }\n\
         int main() { return down(0); }",
        "",
        config,
        NativeRegistry::standard(),
    );
    assert_eq!(run.error().message, "Maximum call depth of 50 exceeded");
}

#[test]
fn arity_mismatch_is_reported_before_the_body_runs() {
    let run = run(
        "void f(int a) { println(\"ran\"); }\n\
         int main() { f(1, 2); return 0; }",
    );
    assert_eq!(run.error().message, "'f' expects 1 argument(s), got 2");
    assert_eq!(run.output, "");
}

#[test]
fn falling_off_the_end_returns_the_default_value() {
    let run = run(
        "int nothing() { }\n\
         double half(int n) { return n / 2; }\n\
         int main() { println(nothing(), \" \", half(5)); return 0; }",
    );
    assert_eq!(run.output, "0 2.0\n");
}

#[test]
fn void_function_cannot_return_a_value() {
    let message = run_error("void f() { return 1; } int main() { f(); return 0; }");
    assert_eq!(message, "Void function 'f' returned a value");
}

#[test]
fn returning_a_void_call_from_a_typed_function_is_an_error() {
    let message = run_error("void g() { } int f() { return g(); } int main() { return f(); }");
    assert_eq!(message, "'f' returns int: expected int, found void");
}

#[test]
fn bare_return_yields_the_default_and_void_calls_pass_through_void() {
    let source = "void g() { }\n\
                  void h() { return g(); }\n\
                  int k() { return; }\n\
                  int main() { h(); return k() + 7; }";
    assert_eq!(run(source).status(), 7);
}

#[test]
fn infix_operator_behaves_like_the_equivalent_call() {
    let run = run(
        "infix int `+`(int a, int b) { return a * 10 + b; }\n\
         int combine(int a, int b) { return a * 10 + b; }\n\
         int main() {\n\
             println(1 `+` 2, \" \", combine(1, 2), \" \", 1 `+` 2 `+` 3);\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "12 12 123\n");
}

#[test]
fn undefined_infix_operator_is_a_runtime_error() {
    assert_eq!(
        run_error("int main() { return 1 @@ 2; }"),
        "Unknown infix operator @@"
    );
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn array_elements_can_be_assigned() {
    let run = run(
        "int main() {\n\
             int a[3];\n\
             a[0] = 5;\n\
             a[2] = a[0] * 2;\n\
             int b[] = {1, 2, 3};\n\
             b[1] += 40;\n\
             println(a, \" \", b, \" \", len(b));\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.output, "[5, 0, 10] [1, 42, 3] 3\n");
}

#[test]
fn arrays_are_copied_on_assignment_and_call() {
    let run = run(
        "void clear(int xs[]) { xs[0] = 0; }\n\
         int main() {\n\
             int a[] = {1, 2};\n\
             int b[2];\n\
             b = a;\n\
             b[0] = 9;\n\
             clear(a);\n\
             println(a[0], \" \", b[0]);\n\
             return 0;\n\
         }",
    );
    assert_eq!(run.output, "1 9\n");
}

#[test]
fn whole_array_assignment_keeps_length_and_element_type() {
    assert_eq!(
        run_error("int a[2]; string s[3] = {\"x\", \"y\", \"z\"}; a = s;"),
        "cannot store an array of length 3 in an array of length 2"
    );
    assert_eq!(
        run_error("int a[2]; string s[2] = {\"x\", \"y\"}; a = s;"),
        "cannot store a string value in a int variable"
    );

    let run = run("int a[2]; double d[2] = {1.5, 2.5}; a = d; a[0] = 5; println(a, \" \", len(a));");
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "[5, 2] 2\n");
}

#[test]
fn array_indexing_is_bounds_checked() {
    assert_eq!(
        run_error("int main() { int a[2]; a[2] = 1; return 0; }"),
        "Index 2 is out of bounds for array of length 2"
    );
    assert_eq!(
        run_error("int main() { int a[2]; return a[-1]; }"),
        "Index -1 is out of bounds for array of length 2"
    );
    assert_eq!(
        run_error("int main() { int x = 1; return x[0]; }"),
        "Cannot index into a value of type int"
    );
}

#[test]
fn array_initializer_elements_are_coerced() {
    let run = run("double d[3] = {1, 2.5}; println(d);");
    assert_eq!(run.output, "[1.0, 2.5, 0.0]\n");
    let message = run_error("int a[1] = {1, 2};");
    assert!(message.starts_with("Too many initializers for 'a'"), "{}", message);
}

// ============================================================================
// Natives
// ============================================================================

#[test]
fn input_natives_read_lines() {
    let run = execute(
        "int main() {\n\
             int n = read_int();\n\
             double d = read_double();\n\
             string s = read_line();\n\
             print(s, \":\", n * 2, \":\", d);\n\
             return 0;\n\
         }",
        "21\n0.5\nhello world\n",
        Config::default(),
        NativeRegistry::standard(),
    );
    assert_eq!(run.status(), 0);
    assert_eq!(run.output, "hello world:42:0.5");
}

#[test]
fn bad_input_is_a_runtime_error() {
    let run = execute(
        "int main() { return read_int(); }",
        "abc\n",
        Config::default(),
        NativeRegistry::standard(),
    );
    assert_eq!(run.error().message, "read_int(): 'abc' is not an int");
}

#[test]
fn program_arguments() {
    let run = run("println(argc(), \" \", argv(0), \" \", argv(1));");
    assert_eq!(run.output, "2 test.cmm extra\n");
    assert_eq!(
        run_error("argv(5);"),
        "argv(): index 5 is out of bounds for 2 argument(s)"
    );
}

#[test]
fn native_errors_name_the_native() {
    assert_eq!(run_error("len(1);"), "len(): not supported for type int");
}

fn double_it(_ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Int(n)] => Ok(Value::Int(n * 2)),
        _ => Err("expected one int".to_string()),
    }
}

#[test]
fn host_registered_natives_are_callable() {
    let mut natives = NativeRegistry::standard();
    natives.register("double_it", double_it);
    let run = execute(
        "int main() { return double_it(21); }",
        "",
        Config::default(),
        natives,
    );
    assert_eq!(run.status(), 42);

    let program = Parser::new(Lexer::new("int main() { return double_it(5); }"))
        .parse()
        .expect("program should parse");
    let mut evaluator = Evaluator::new(&program).with_output(Box::new(io::sink()));
    evaluator.register_native("double_it", double_it);
    assert_eq!(evaluator.interpret(&[]).expect("program should run"), 10);
}

#[test]
fn natives_take_precedence_over_user_functions() {
    let run = run("int len(int x) { return 0; } int main() { return len(\"abc\"); }");
    assert_eq!(run.status(), 3);
}

// ============================================================================
// Environment
// ============================================================================

#[test]
fn environment_frames_chain_and_release() {
    let mut env = Environment::new();
    assert!(env.declare(Environment::GLOBAL, "g", Value::Int(1)));
    assert!(!env.declare(Environment::GLOBAL, "g", Value::Int(2)));

    let block = env.push(Environment::GLOBAL);
    assert!(env.declare(block, "g", Value::Int(3)));
    assert_eq!(env.get(block, "g"), Some(&Value::Int(3)));
    assert_eq!(env.resolve(block, "g"), Some(block));

    let call = env.push(Environment::GLOBAL);
    // A call frame skips the block below it and sees the global binding.
    assert_eq!(env.get(call, "g"), Some(&Value::Int(1)));
    assert_eq!(env.depth(), 3);

    env.pop(call);
    env.pop(block);
    assert_eq!(env.depth(), 1);
    assert_eq!(env.resolve(Environment::GLOBAL, "missing"), None);
}
