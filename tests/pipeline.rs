//! Pruebas de extremo a extremo: fuente → optimizador → ensamblador
//! → intérprete. El intérprete sirve de oráculo: el mismo programa,
//! optimizado o no, debe producir la misma salida y el mismo código
//! de salida.
//!
//! Nota sobre el presupuesto de ranuras: el generador asigna un área
//! plana de 16 ranuras por función y no detecta el desborde; una
//! función con más de 16 entre locales, parámetros y temporales
//! escribe más allá de su área. El intérprete usa memoria dispersa,
//! así que estas pruebas no pueden observar ese desborde y tampoco
//! lo intentan.

use minic::{
    codegen,
    interp::{self, RunResult},
    lex::lex,
    opt::{self, OptStats, DEFAULT_MAX_PASSES},
    parse::parse,
};

fn compile(source: &str) -> (String, OptStats) {
    let program = parse(lex(source).unwrap()).unwrap();
    let (program, stats) = opt::optimize(&program, None).unwrap();

    (codegen::emit(&program).unwrap(), stats)
}

fn compile_raw(source: &str) -> String {
    let program = parse(lex(source).unwrap()).unwrap();
    codegen::emit(&program).unwrap()
}

fn execute(assembly: &str) -> RunResult {
    let result = interp::run(assembly);
    assert!(result.success, "execution failed: {:?}", result.error);

    result
}

#[test]
fn prints_a_literal() {
    let (assembly, _) = compile("int main() { printf(42); return 0; }");
    let result = execute(&assembly);

    assert_eq!(result.output, "42\n");
    assert_eq!(result.exit_code, 0);
}

#[test]
fn constant_chains_collapse_to_a_single_literal() {
    let (assembly, stats) = compile(
        "int main() { int x = 10; x = x + 5; x = 0 + x; printf(x); return 0; }",
    );

    assert!(stats.propagations > 0);
    assert!(stats.foldings > 0);

    // Tras converger solo queda el literal final
    assert!(assembly.contains("mov     x0, #15"));
    assert!(!assembly.contains("#10"));

    assert_eq!(execute(&assembly).output, "15\n");
}

#[test]
fn live_functions_survive_and_compute() {
    let (assembly, stats) = compile(
        "int f(int a, int b) { return a + b; } \
         int main() { printf(f(5, 5)); return 0; }",
    );

    assert_eq!(stats.functions_removed, 0);
    assert_eq!(execute(&assembly).output, "10\n");
}

#[test]
fn unreachable_functions_are_pruned() {
    let (assembly, stats) = compile(
        "int unused() { return 42; } \
         int main() { printf(5); return 0; }",
    );

    assert_eq!(stats.functions_removed, 1);
    assert!(!assembly.contains("_unused:"));
    assert_eq!(execute(&assembly).output, "5\n");
}

#[test]
fn dead_branches_never_execute() {
    let (assembly, _) = compile(
        "int main() { \
             if (5 > 10) { printf(999); } \
             if (0 == 0) { printf(42); } \
             return 0; \
         }",
    );

    assert!(!assembly.contains("#999"));
    assert_eq!(execute(&assembly).output, "42\n");
}

#[test]
fn else_branches_are_selected_too() {
    let (assembly, _) = compile(
        "int main() { if (1 > 2) { printf(1); } else { printf(2); } return 0; }",
    );

    assert_eq!(execute(&assembly).output, "2\n");
}

#[test]
fn pointer_programs_are_left_intact_and_still_run() {
    let source = "int main() { int i = 5; int* k = &i; *k = 7; printf(i); return 0; }";

    let program = parse(lex(source).unwrap()).unwrap();
    let (optimized, stats) = opt::optimize(&program, None).unwrap();

    // Con punteros presentes, el optimizador no reescribe nada
    assert_eq!(optimized, program);
    assert!(stats.pointers_detected > 0);
    assert_eq!(stats.propagations, 0);
    assert_eq!(stats.foldings, 0);

    let assembly = codegen::emit(&optimized).unwrap();
    assert_eq!(execute(&assembly).output, "7\n");
}

#[test]
fn printf_through_a_dereference() {
    let (assembly, stats) = compile(
        "int main() { int i = 7; int* k = &i; printf(*k); return 0; }",
    );

    assert!(stats.pointers_detected > 0);
    assert_eq!(execute(&assembly).output, "7\n");
}

#[test]
fn loops_terminate_with_the_right_accumulation() {
    let (assembly, _) = compile(
        "int main() { \
             int i = 0; \
             int s = 0; \
             while (i < 5) { s = s + i; i = i + 1; } \
             printf(s); \
             return s; \
         }",
    );

    let result = execute(&assembly);
    assert_eq!(result.output, "10\n");
    assert_eq!(result.exit_code, 10);
}

#[test]
fn recursion_unwinds_through_the_call_stack() {
    let (assembly, _) = compile(
        "int fact(int n) { if (n < 2) { return 1; } return n * fact(n - 1); } \
         int main() { printf(fact(5)); return 0; }",
    );

    assert_eq!(execute(&assembly).output, "120\n");
}

#[test]
fn exit_halts_with_its_argument() {
    let (assembly, _) = compile("int main() { exit(7); return 0; }");
    let result = execute(&assembly);

    assert_eq!(result.exit_code, 7);
}

#[test]
fn optimization_is_observably_sound() {
    // Mezcla de ciclo, condicional y llamada; la versión optimizada
    // y la cruda deben ser indistinguibles para el intérprete
    let source = "int twice(int a) { return a * 2; } \
                  int main() { \
                      int total = 0; \
                      int i = 1; \
                      while (i < 4) { \
                          if (i == 2) { total = total + twice(i); } \
                          else { total = total + i; } \
                          i = i + 1; \
                      } \
                      printf(total + 0 * 100); \
                      return total; \
                  }";

    let (optimized, _) = compile(source);
    let raw = compile_raw(source);

    let fast = execute(&optimized);
    let slow = execute(&raw);

    assert_eq!(fast.output, slow.output);
    assert_eq!(fast.exit_code, slow.exit_code);
    assert_eq!(fast.output, "8\n");

    // La versión optimizada nunca debería ejecutar más pasos
    assert!(fast.steps <= slow.steps);
}

// Anidamiento mayor a los ocho registros de la reserva, con una
// variable en lo más profundo para que haya cargas de ranura con la
// pila ya desplazada.
fn deep_sum(innermost: &str) -> String {
    let mut expr = String::from(innermost);
    for i in 2..=12 {
        expr = format!("({} + {})", i, expr);
    }

    expr
}

#[test]
fn stack_fallback_matches_register_results() {
    let source = format!(
        "int main() {{ int x = 1; printf({}); return 0; }}",
        deep_sum("x")
    );

    let raw = compile_raw(&source);
    assert!(raw.contains("str     x0, [sp, #-16]!"));
    assert_eq!(execute(&raw).output, "78\n");

    // El optimizador pliega la expresión completa; ambas rutas deben
    // coincidir
    let (optimized, _) = compile(&source);
    assert_eq!(execute(&optimized).output, "78\n");
}

#[test]
fn stack_fallback_compensates_sp_relative_slots() {
    let source = format!(
        "int f(int a) {{ return {}; }} int main() {{ printf(f(5)); return 0; }}",
        deep_sum("a")
    );

    let raw = compile_raw(&source);
    assert!(raw.contains("ldr     x1, [sp], #16"));
    assert_eq!(execute(&raw).output, "82\n");
}

#[test]
fn optimizer_reaches_a_fixed_point_quickly() {
    let program = parse(
        lex("int main() { int x = 1 + 2; int y = x * 3; printf(y); return y; }").unwrap(),
    )
    .unwrap();

    let (_, stats) = opt::optimize(&program, None).unwrap();
    assert!(stats.passes < DEFAULT_MAX_PASSES);
}

#[test]
fn folding_a_division_by_zero_aborts_compilation() {
    let program = parse(lex("int main() { return 1 / 0; }").unwrap()).unwrap();
    let result = opt::optimize(&program, None);

    assert!(result.is_err());
}
