//! Script integration: `__LUA__` calls, `#+LUA_BEGIN` blocks, the
//! expression/statement fallback, diagnostics, and the interplay with lazy
//! expansion. Everything runs against the built-in evaluator.

use std::io::Write;
use std::sync::{Arc, Mutex};

use weft::{expand_str, Engine};

#[track_caller]
fn check(input: &str, expected: &str) {
    let actual = expand_str(input).unwrap();
    assert_eq!(actual, expected, "\ninput:\n{input}");
}

/// A cloneable sink for capturing output and diagnostics.
#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Shared {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// __LUA__ CALLS
// ============================================================================

#[test]
fn expression_results_substitute() {
    check("[[[__LUA__(return 3)]]]", "3");
    check("[[[__LUA__(return 1 + 2)]]]", "3");
    check("[[[__LUA__(return 1 + 2;)]]]", "3");
    // Bare expressions fall out of the implicit-return attempt.
    check("[[[__LUA__(3)]]]", "3");
    check("[[[__LUA__(1 + 2)]]]", "3");
}

#[test]
fn statements_fall_back_and_state_persists() {
    check(
        concat!("[[[__LUA__(x = 1;)]]]\n", "[[[__LUA__(return x;)]]]\n"),
        concat!("\n", "1\n"),
    );
    check(
        concat!("[[[__LUA__(x = 1;)]]]\n", "[[[__LUA__(x)]]]\n"),
        concat!("\n", "1\n"),
    );
}

#[test]
fn valueless_results_expand_to_nothing() {
    check("[[[__LUA__()]]]", "");
    check("[[[__LUA__(return nil;)]]]", "");
    check("[[[__LUA__(return 1 == 1)]]]", "");
}

#[test]
fn multiline_results_splice_like_block_macros() {
    check(
        "[[[__LUA__(return \"foo\\nbar\\n\")]]][[[__LUA__(return \"foo\\nbar\\n\")]]]\n",
        concat!("foo\n", "bar\n", "foo\n", "bar\n", "\n"),
    );
    // A result line that parses as a directive is processed as one.
    check(
        concat!(
            "[[[__LUA__(return \"#+MACRO bar BAR\\nfoo\")]]]\n",
            "[[[bar]]]\n"
        ),
        concat!("foo\n", "BAR\n"),
    );
}

#[test]
fn load_failure_surfaces_error_text_and_diagnostic() {
    let diag = Shared::default();
    let mut engine = Engine::new().with_diagnostics(Box::new(diag.clone()));
    engine.feed_str("[[[__LUA__(return 1 + ;)]]]").unwrap();
    let output = engine.end_input().unwrap().unwrap();
    assert_eq!(output, b"unexpected symbol near ';'");
    assert_eq!(
        diag.contents(),
        "script load failed: unexpected symbol near ';'\n"
    );
}

#[test]
fn eval_failure_surfaces_error_text_and_diagnostic() {
    let diag = Shared::default();
    let mut engine = Engine::new().with_diagnostics(Box::new(diag.clone()));
    engine.feed_str("[[[__LUA__(return nil + nil;)]]]").unwrap();
    let output = engine.end_input().unwrap().unwrap();
    assert_eq!(output, b"attempt to perform arithmetic on a nil value");
    assert_eq!(
        diag.contents(),
        "script evaluation failed: attempt to perform arithmetic on a nil value\n"
    );
}

#[test]
fn failures_without_a_diagnostics_sink_still_produce_the_error_text() {
    check(
        "[[[__LUA__(return 1 + ;)]]]",
        "unexpected symbol near ';'",
    );
}

// ============================================================================
// SCRIPT BLOCKS
// ============================================================================

#[test]
fn script_block_result_replaces_the_block() {
    check(
        concat!(
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "y = \"world\";\n",
            "return x .. \" \" .. y;\n",
            "#+LUA_END\n"
        ),
        "hello world\n",
    );
    // Without a return the block evaluates for side effects only.
    check(
        concat!(
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "y = \"world\";\n",
            "#+LUA_END\n",
            "[[[__LUA__(x .. \" \" .. y)]]]\n"
        ),
        "hello world\n",
    );
}

#[test]
fn script_block_lines_are_macro_expanded_before_evaluation() {
    check(
        concat!(
            "#+MACRO foo FOO\n",
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "y = \"world\";\n",
            "return x .. \" [[[foo]]] \" .. y;\n",
            "#+LUA_END\n"
        ),
        "hello FOO world\n",
    );
}

#[test]
fn unterminated_script_block_is_discarded() {
    check(
        concat!(
            "\n",
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "y = \"world\";\n",
            "return x .. y;\n"
        ),
        "\n",
    );
}

#[test]
fn script_block_inside_a_block_macro_body() {
    check(
        concat!(
            "#+MACRO_BEGIN macro\n",
            "foo\n",
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "y = \"world\";\n",
            "return x .. \" \" .. y;\n",
            "#+LUA_END\n",
            "bar\n",
            "#+MACRO_END\n",
            "[[[macro]]]\n"
        ),
        concat!("foo\n", "hello world\n", "bar\n"),
    );
}

#[test]
fn script_block_sees_block_macro_arguments() {
    check(
        concat!(
            "#+MACRO_BEGIN term\n",
            "#+LUA_BEGIN\n",
            "return \"$0\" .. \"$0\"\n",
            "#+LUA_END\n",
            "#+MACRO_END\n",
            "[[[term(FOO)]]]\n"
        ),
        "FOOFOO\n",
    );
}

#[test]
fn comment_block_inside_a_script_block() {
    check(
        concat!(
            "#+LUA_BEGIN\n",
            "x = \"hello\";\n",
            "#+COMMENT_BEGIN\n",
            "FOO\n",
            "BAR\n",
            "#+COMMENT_END\n",
            "y = \"world\";\n",
            "return x .. \" \" .. y;\n",
            "#+LUA_END\n"
        ),
        "hello world\n",
    );
}

// ============================================================================
// EVALUATION ORDER WITH LAZY CALLS
// ============================================================================

#[test]
fn counter_ordering_across_passes() {
    check(
        concat!(
            "#+MACRO counter [[[__LUA__(count = 0)]]]^[[[__LUA__(count = count + 1; return count;)]]]\n",
            "[[[counter]]]\n",
            "[[[counter]]]\n",
            "[[[counter]]]\n",
            "[[[counter]]]\n",
            "[[[counter]]]-[[[counter]]]-[[[counter]]]-[[[counter]]]\n",
            "[[[counter]]]-^[[[counter]]]-[[[counter]]]-^[[[counter]]]\n",
            "^[[[counter]]]-[[[counter]]]-^[[[counter]]]-[[[counter]]]\n"
        ),
        concat!(
            "1\n",
            "2\n",
            "3\n",
            "4\n",
            "8-7-6-5\n",
            "12-11-10-9\n",
            "16-15-14-13\n"
        ),
    );
}

#[test]
fn calls_inside_script_strings_expand_textually_first() {
    check(
        concat!(
            "#+MACRO counter [[[__LUA__(count = 0)]]]^[[[__LUA__(count = count + 1; return count;)]]]\n",
            "^[[[__LUA__(\"[[[counter]]]\" .. \"-\" .. \"[[[counter]]]\")]]]\n",
            "#+LUA_BEGIN\n",
            "\"[[[counter]]]\" .. \"-\" .. \"[[[counter]]]\";\n",
            "#+LUA_END\n",
            "#+LUA_BEGIN\n",
            "\"^[[[counter]]]\" .. \"-\" .. \"[[[counter]]]\";\n",
            "#+LUA_END\n"
        ),
        concat!("2-1\n", "4-3\n", "6-5\n"),
    );
}

#[test]
fn lazy_script_result_can_form_a_macro_call() {
    check(
        concat!(
            "\n",
            "#+MACRO FOO foo\n",
            "^[[[__LUA__(\"[\" .. \"[[FOO]]\" .. \"]\")]]]\n"
        ),
        concat!("\n", "foo\n"),
    );
    check(
        concat!(
            "\n",
            "#+MACRO FOO foo\n",
            "#+MACRO end #+LUA_END\n",
            "#+LUA_BEGIN\n",
            "return \"[\" .. \"[[FOO]]\" .. \"]\"\n",
            "^[[[__LUA__(\"[\" .. \"[[end]]\" .. \"]\")]]]\n"
        ),
        concat!("\n", "foo\n"),
    );
}

// ============================================================================
// ENABLE / DISABLE
// ============================================================================

#[test]
fn disable_lua_turns_calls_into_undefined_macros() {
    check(
        concat!(
            "\n",
            "[[[__LUA__(x = 1)]]]\n",
            "[[[__DISABLE_LUA__]]]\n",
            "[[[__LUA__(x = 2)]]]\n",
            "[[[__LUA__(x)]]]\n",
            "[[[__ENABLE_LUA__]]]\n",
            "[[[__LUA__(x)]]]\n"
        ),
        concat!("\n", "\n", "\n", "\n", "\n", "\n", "1\n"),
    );
}

#[test]
fn comment_blocks_disable_script_evaluation() {
    check(
        concat!(
            "\n",
            "[[[__LUA__(x = 1)]]]\n",
            "#+COMMENT_BEGIN\n",
            "[[[__LUA__(x = 100)]]]\n",
            "#+COMMENT_END\n",
            "[[[__LUA__(x)]]]\n"
        ),
        concat!("\n", "\n", "1\n"),
    );
    // __ENABLE_LUA__ inside the comment re-arms evaluation mid-skip.
    check(
        concat!(
            "\n",
            "[[[__LUA__(x = 1)]]]\n",
            "#+COMMENT_BEGIN\n",
            "[[[__ENABLE_LUA__]]]\n",
            "[[[__LUA__(x = 100)]]]\n",
            "#+COMMENT_END\n",
            "[[[__LUA__(x)]]]\n"
        ),
        concat!("\n", "\n", "100\n"),
    );
    check(
        concat!(
            "\n",
            "#+MACRO end #+COMMENT_END\n",
            "#+COMMENT_BEGIN\n",
            "foo\n",
            "bar\n",
            "^[[[__LUA__(\"[\" .. \"[[end]]\" .. \"]\")]]]\n"
        ),
        "\n",
    );
}

// ============================================================================
// CUSTOM SCRIPT ENGINES
// ============================================================================

#[test]
fn a_custom_engine_replaces_the_built_in_one() {
    struct Upper;
    impl weft::ScriptEngine for Upper {
        fn eval(&mut self, program: &str) -> Result<Option<String>, weft::ScriptError> {
            // Pretend every program is an expression in a language where
            // evaluation uppercases the source.
            Ok(Some(program.to_uppercase()))
        }
    }

    let mut engine = Engine::new().with_script_engine(|| Box::new(Upper));
    engine.feed_str("[[[__LUA__(abc)]]]\n").unwrap();
    let output = engine.end_input().unwrap().unwrap();
    assert_eq!(output, b"RETURN ABC\n");
}

#[test]
fn reset_tears_down_script_state() {
    let mut engine = Engine::new();
    engine.feed_str("[[[__LUA__(x = 1)]]]\n").unwrap();
    engine.feed_str("[[[__LUA__(x)]]]\n").unwrap();
    let output = engine.end_input().unwrap().unwrap();
    assert_eq!(output, b"\n1\n");

    engine.reset();
    engine.feed_str("x is [[[__LUA__(x)]]]\n").unwrap();
    let output = engine.end_input().unwrap().unwrap();
    assert_eq!(output, b"x is \n");
}
