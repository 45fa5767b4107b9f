// End-to-end scenarios against the full pipeline: scan -> compile -> run.
// Output is captured by handing the VM an in-memory `Vec<u8>` sink instead
// of real stdout.

use ruff::vm::{InterpretResult, Vm};

fn run_source(source: &str) -> (InterpretResult, String) {
    let mut out: Vec<u8> = Vec::new();
    let result = {
        let mut vm = Vm::new(&mut out);
        vm.interpret(source)
    };
    (result, String::from_utf8(out).expect("stdout is valid utf-8"))
}

#[test]
fn arithmetic_and_precedence() {
    let (result, stdout) = run_source("print 1 + 2 * 3;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "7\n");
}

#[test]
fn scoping_and_shadowing() {
    let (result, stdout) = run_source(
        r#"
        var a = "outer";
        { var a = "inner"; print a; }
        print a;
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "inner\nouter\n");
}

#[test]
fn closures_capture_by_reference() {
    let (result, stdout) = run_source(
        r#"
        fun makeCounter() {
          var i = 0;
          fun count() { i = i + 1; print i; }
          return count;
        }
        var c = makeCounter();
        c(); c(); c();
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "1\n2\n3\n");
}

#[test]
fn string_interning_equality() {
    let (result, stdout) = run_source(r#"print "ab" + "c" == "abc";"#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "true\n");
}

#[test]
fn for_loop_and_switch() {
    let (result, stdout) = run_source(
        r#"
        for (var i = 0; i < 3; i = i + 1) {
          switch (i):
            case 0: print "zero";
            case 1: print "one";
            default: print "other";
        }
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "zero\none\nother\n");
}

#[test]
fn runtime_type_error_surfaces_and_fails() {
    let (result, _stdout) = run_source(r#"print 1 + "a";"#);
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn defining_the_257th_local_is_a_compile_error() {
    let mut source = String::from("{\n");
    for i in 0..257 {
        source.push_str(&format!("var v{} = {};\n", i, i));
    }
    source.push('}');
    let (result, _) = run_source(&source);
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn a_function_with_256_parameters_is_a_compile_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
    let source = format!("fun f({}) {{ return 0; }}", params.join(", "));
    let (result, _) = run_source(&source);
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn returning_from_top_level_code_is_a_compile_error() {
    let (result, _) = run_source("return 1;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn reading_a_local_in_its_own_initializer_is_a_compile_error() {
    let (result, _) = run_source("{ var a = a; }");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn modulo_truncates_operands_before_applying() {
    let (result, stdout) = run_source("print 7.5 % 2;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "1\n");
}

#[test]
fn calling_a_non_callable_value_is_a_runtime_error() {
    let (result, _) = run_source("var x = 1; x();");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn do_while_runs_the_body_at_least_once() {
    let (result, stdout) = run_source(
        r#"
        var i = 0;
        do { print i; i = i + 1; } while (i < 3);
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn repeat_until_runs_the_body_at_least_once() {
    let (result, stdout) = run_source(
        r#"
        var i = 0;
        repeat { print i; i = i + 1; } until (i == 3);
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn classes_methods_and_inheritance() {
    let (result, stdout) = run_source(
        r#"
        class Animal {
          init(name) { this.name = name; }
          speak() { print this.name + " makes a sound."; }
        }
        class Dog < Animal {
          speak() {
            super.speak();
            print this.name + " barks.";
          }
        }
        var d = Dog("Rex");
        d.speak();
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "Rex makes a sound.\nRex barks.\n");
}
