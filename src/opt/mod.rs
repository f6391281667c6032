//! Optimizador iterativo.
//!
//! El optimizador aplica tres fases sobre una copia del árbol, en
//! orden fijo dentro de cada pasada: eliminación de código muerto
//! ([`dce`]), propagación de constantes ([`propagate`]) y plegado
//! con simplificación algebraica ([`fold`]). El orden importa: DCE
//! depende de los usos computados antes de propagar, la propagación
//! habilita el plegado, y el plegado produce código muerto nuevo
//! para la siguiente pasada. Se itera hasta alcanzar un punto fijo
//! o agotar el presupuesto de pasadas, y al final se ejecuta una
//! única fase de eliminación de funciones inalcanzables desde
//! `main`.
//!
//! Toda fase consulta primero el análisis de escape y deja intacta
//! cualquier sentencia o expresión blindada, sin excepción.

use std::collections::HashSet;

use crate::{
    ast::{Expr, Program, Statement, Target},
    error::CompileError,
    escape,
};

mod dce;
mod fold;
mod propagate;

/// Presupuesto de pasadas por omisión.
pub const DEFAULT_MAX_PASSES: u32 = 10;

/// Contadores por fase de una invocación de [`optimize`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OptStats {
    pub foldings: u32,
    pub propagations: u32,
    pub eliminations: u32,
    pub simplifications: u32,
    pub passes: u32,
    pub functions_removed: u32,
    pub pointers_detected: usize,
}

impl OptStats {
    fn phase_counters(&self) -> (u32, u32, u32, u32) {
        (
            self.foldings,
            self.propagations,
            self.eliminations,
            self.simplifications,
        )
    }
}

/// Optimiza una copia del programa y reporta estadísticas.
///
/// El árbol de entrada nunca se muta; si la optimización falla, el
/// original sigue siendo válido y reutilizable.
pub fn optimize(
    program: &Program,
    max_passes: Option<u32>,
) -> Result<(Program, OptStats), CompileError> {
    let escapes = escape::analyze(program);

    let mut stats = OptStats {
        pointers_detected: escapes.pointers_detected(),
        ..OptStats::default()
    };

    let budget = max_passes.unwrap_or(DEFAULT_MAX_PASSES);
    let mut current = program.clone();

    for pass in 0..budget {
        let before = stats.phase_counters();

        current = dce::run(&current, &escapes, &mut stats);
        current = propagate::run(&current, &escapes, &mut stats);
        current = fold::run(&current, &escapes, &mut stats)?;

        stats.passes += 1;
        log::debug!(
            "pass {}: foldings={} propagations={} eliminations={} simplifications={}",
            pass,
            stats.foldings,
            stats.propagations,
            stats.eliminations,
            stats.simplifications
        );

        if stats.phase_counters() == before {
            break;
        }
    }

    let current = prune_functions(current, &mut stats)?;
    Ok((current, stats))
}

/// Eliminación de funciones muertas: recorrido en anchura del grafo
/// de llamadas desde `main`. Corre una sola vez, después de que las
/// demás fases convergen, porque optimizar ramas condicionales puede
/// eliminar sitios de llamada que mantenían viva a una función.
fn prune_functions(program: Program, stats: &mut OptStats) -> Result<Program, CompileError> {
    if program.functions.is_empty() {
        return Err(CompileError::EmptyProgram);
    }

    if program.function("main").is_none() {
        return Err(CompileError::NoMain);
    }

    let mut reachable = HashSet::new();
    let mut queue = vec![String::from("main")];

    while let Some(name) = queue.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }

        if let Some(function) = program.function(&name) {
            let mut callees = HashSet::new();
            for statement in &function.body {
                collect_callees(statement, &mut callees);
            }

            queue.extend(callees.into_iter().filter(|c| !reachable.contains(c)));
        }
    }

    let total = program.functions.len();
    let functions = program
        .functions
        .into_iter()
        .filter(|function| reachable.contains(&function.name))
        .collect::<Vec<_>>();

    stats.functions_removed += (total - functions.len()) as u32;
    Ok(Program { functions })
}

fn collect_callees(statement: &Statement, callees: &mut HashSet<String>) {
    visit_exprs(statement, &mut |expr| {
        if let Expr::Call { callee, .. } = expr {
            callees.insert(callee.clone());
        }
    });

    match statement {
        Statement::Block(statements) => {
            for statement in statements {
                collect_callees(statement, callees);
            }
        }

        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_callees(then_branch, callees);
            if let Some(else_branch) = else_branch {
                collect_callees(else_branch, callees);
            }
        }

        Statement::While { body, .. } => collect_callees(body, callees),
        _ => {}
    }
}

/// Aplica `visit` a cada expresión inmediata de la sentencia y a sus
/// subexpresiones, sin descender a sentencias anidadas.
fn visit_exprs(statement: &Statement, visit: &mut dyn FnMut(&Expr)) {
    fn walk(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
        visit(expr);
        match expr {
            Expr::Binary { left, right, .. } => {
                walk(left, visit);
                walk(right, visit);
            }

            Expr::Unary { operand, .. } => walk(operand, visit),
            Expr::Call { arguments, .. } => {
                for argument in arguments {
                    walk(argument, visit);
                }
            }

            Expr::Number(_) | Expr::Variable(_) | Expr::Void => {}
        }
    }

    match statement {
        Statement::Declare { value, .. } => walk(value, visit),
        Statement::Assign { target, value } => {
            if let Target::Deref(pointer) = target {
                walk(pointer, visit);
            }

            walk(value, visit);
        }

        Statement::If { condition, .. } | Statement::While { condition, .. } => {
            walk(condition, visit)
        }

        Statement::Return(expr) | Statement::Expr(expr) => walk(expr, visit),
        Statement::Block(_) => {}
    }
}

/// Funciones puras según inspección sintáctica: sin parámetros
/// puntero, retorno no-`void` y un cuerpo sin llamadas ni
/// operaciones de puntero. No se intenta inferencia de pureza por
/// punto fijo sobre el programa completo.
fn pure_functions(program: &Program) -> HashSet<String> {
    program
        .functions
        .iter()
        .filter(|function| {
            function.return_type != crate::ast::Type::Void
                && function.parameters.iter().all(|p| !p.typ.is_pointer())
                && function.body.iter().all(stmt_is_pure)
        })
        .map(|function| function.name.clone())
        .collect()
}

fn stmt_is_pure(statement: &Statement) -> bool {
    let mut pure = true;
    visit_exprs(statement, &mut |expr| match expr {
        Expr::Call { .. } | Expr::Unary { .. } => pure = false,
        _ => {}
    });

    if !pure {
        return false;
    }

    match statement {
        Statement::Block(statements) => statements.iter().all(stmt_is_pure),
        Statement::Assign {
            target: Target::Deref(_),
            ..
        } => false,

        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            stmt_is_pure(then_branch)
                && else_branch.as_deref().map_or(true, stmt_is_pure)
        }

        Statement::While { body, .. } => stmt_is_pure(body),
        _ => true,
    }
}

/// Una expresión tiene efectos observables si contiene una llamada
/// a algo que no sea una función de usuario pura.
fn has_side_effect(expr: &Expr, pure: &HashSet<String>) -> bool {
    match expr {
        Expr::Number(_) | Expr::Variable(_) | Expr::Void => false,
        Expr::Unary { operand, .. } => has_side_effect(operand, pure),
        Expr::Binary { left, right, .. } => {
            has_side_effect(left, pure) || has_side_effect(right, pure)
        }

        Expr::Call { callee, arguments } => {
            !pure.contains(callee)
                || arguments.iter().any(|a| has_side_effect(a, pure))
        }
    }
}

/// Variables que una sentencia asigna o declara, en cualquier nivel
/// de anidamiento.
fn assigned_vars(statement: &Statement, assigned: &mut HashSet<String>) {
    match statement {
        Statement::Block(statements) => {
            for statement in statements {
                assigned_vars(statement, assigned);
            }
        }

        Statement::Declare { name, .. } => {
            assigned.insert(name.clone());
        }

        Statement::Assign {
            target: Target::Variable(name),
            ..
        } => {
            assigned.insert(name.clone());
        }

        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            assigned_vars(then_branch, assigned);
            if let Some(else_branch) = else_branch {
                assigned_vars(else_branch, assigned);
            }
        }

        Statement::While { body, .. } => assigned_vars(body, assigned),
        _ => {}
    }
}

/// División con redondeo hacia menos infinito, a diferencia del
/// truncamiento hacia cero de `sdiv`.
fn div_floor(a: i64, b: i64) -> i64 {
    let quotient = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        quotient - 1
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::lex, parse::parse};

    fn program(source: &str) -> Program {
        parse(lex(source).unwrap()).unwrap()
    }

    #[test]
    fn removes_unreachable_functions() {
        let (optimized, stats) = optimize(
            &program("int unused() { return 42; } int main() { return 5; }"),
            None,
        )
        .unwrap();

        assert_eq!(stats.functions_removed, 1);
        assert!(optimized.function("unused").is_none());
        assert!(optimized.function("main").is_some());
    }

    #[test]
    fn keeps_transitively_called_functions() {
        let (optimized, stats) = optimize(
            &program(
                "int g() { return 1; } \
                 int f(int a) { return g() + a; } \
                 int main() { return f(2); }",
            ),
            None,
        )
        .unwrap();

        assert_eq!(stats.functions_removed, 0);
        assert_eq!(optimized.functions.len(), 3);
    }

    #[test]
    fn missing_main_is_fatal() {
        let result = optimize(&program("int f() { return 1; }"), None);
        assert!(matches!(result, Err(CompileError::NoMain)));
    }

    #[test]
    fn empty_program_is_fatal() {
        let result = optimize(&Program { functions: vec![] }, None);
        assert!(matches!(result, Err(CompileError::EmptyProgram)));
    }

    #[test]
    fn converges_before_a_generous_cap() {
        let (_, stats) = optimize(
            &program("int main() { int x = 10; x = x + 5; x = 0 + x; return x; }"),
            Some(15),
        )
        .unwrap();

        assert!(stats.passes < 15);
    }

    #[test]
    fn reports_detected_pointers() {
        let (_, stats) = optimize(
            &program("int main() { int i = 7; int* k = &i; return *k; }"),
            None,
        )
        .unwrap();

        assert!(stats.pointers_detected > 0);
    }

    #[test]
    fn floor_division_semantics() {
        assert_eq!(div_floor(7, 2), 3);
        assert_eq!(div_floor(-7, 2), -4);
        assert_eq!(div_floor(7, -2), -4);
        assert_eq!(div_floor(-7, -2), 3);
        assert_eq!(div_floor(-6, 2), -3);
    }

    #[test]
    fn purity_is_syntactic() {
        let pure = pure_functions(&program(
            "int ok(int a) { return a + 1; } \
             int calls() { return ok(1); } \
             int deref(int* p) { return *p; } \
             int main() { return 0; }",
        ));

        assert!(pure.contains("ok"));
        assert!(!pure.contains("calls"));
        assert!(!pure.contains("deref"));
    }
}
