//! Propagación de constantes.
//!
//! Mantiene por función un mapa de variable a valor entero conocido,
//! válido solo para variables seguras. En un `if`, el estado
//! posterior se fusiona de forma conservadora: una variable conserva
//! su constante únicamente si ambas ramas la dejan con el mismo
//! valor (o, sin rama `else`, si la rama `then` no la altera). Un
//! `while` invalida toda variable que su cuerpo asigne antes de
//! evaluar la condición, pues la condición corre en cada iteración
//! con esas variables potencialmente ya mutadas; omitir esto
//! permitiría propagaciones inválidas a través del back-edge.

use std::collections::{HashMap, HashSet};

use super::OptStats;
use crate::{
    ast::{Expr, Function, Program, Statement, Target},
    escape::Escapes,
};

pub(super) fn run(program: &Program, escapes: &Escapes, stats: &mut OptStats) -> Program {
    let functions = program
        .functions
        .iter()
        .map(|function| {
            let mut propagator = Propagator {
                escapes,
                stats,
                env: HashMap::new(),
            };

            Function {
                body: propagator.block(&function.body),
                ..function.clone()
            }
        })
        .collect();

    Program { functions }
}

struct Propagator<'a> {
    escapes: &'a Escapes,
    stats: &'a mut OptStats,
    env: HashMap<String, i64>,
}

impl Propagator<'_> {
    fn block(&mut self, statements: &[Statement]) -> Vec<Statement> {
        statements.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, statement: &Statement) -> Statement {
        if self.escapes.shields_stmt(statement) {
            // La sentencia no se toca, pero sus escrituras invalidan
            // lo que se sabía de esas variables
            for name in assigned(statement) {
                self.env.remove(&name);
            }

            return statement.clone();
        }

        match statement {
            Statement::Block(statements) => Statement::Block(self.block(statements)),

            Statement::Declare { name, typ, value } => {
                let value = self.subst(value);
                self.record(name, &value);

                Statement::Declare {
                    name: name.clone(),
                    typ: *typ,
                    value,
                }
            }

            Statement::Assign {
                target: Target::Variable(name),
                value,
            } => {
                let value = self.subst(value);
                self.record(name, &value);

                Statement::Assign {
                    target: Target::Variable(name.clone()),
                    value,
                }
            }

            // Blindada por shields_stmt; se conserva por exhaustividad
            Statement::Assign { target, value } => Statement::Assign {
                target: target.clone(),
                value: value.clone(),
            },

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.subst(condition);
                let before = self.env.clone();

                let then_branch = Box::new(self.stmt(then_branch));
                let then_env = std::mem::replace(&mut self.env, before.clone());

                let (else_branch, merged) = match else_branch {
                    Some(else_branch) => {
                        let else_branch = Box::new(self.stmt(else_branch));
                        let else_env = std::mem::take(&mut self.env);
                        (Some(else_branch), intersect(then_env, &else_env))
                    }

                    None => (None, intersect(then_env, &before)),
                };

                self.env = merged;
                Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }

            Statement::While { condition, body } => {
                for name in assigned(body) {
                    self.env.remove(&name);
                }

                let condition = self.subst(condition);
                let body = Box::new(self.stmt(body));

                // Las declaraciones internas del cuerpo no sobreviven
                // al ciclo
                for name in assigned(&body) {
                    self.env.remove(&name);
                }

                Statement::While { condition, body }
            }

            Statement::Return(expr) => Statement::Return(self.subst(expr)),
            Statement::Expr(expr) => Statement::Expr(self.subst(expr)),
        }
    }

    fn record(&mut self, name: &str, value: &Expr) {
        match value.literal() {
            Some(literal) if !self.escapes.protected(name) => {
                self.env.insert(name.to_owned(), literal);
            }

            _ => {
                self.env.remove(name);
            }
        }
    }

    fn subst(&mut self, expr: &Expr) -> Expr {
        if self.escapes.shields_expr(expr) {
            return expr.clone();
        }

        match expr {
            Expr::Variable(name) => match self.env.get(name) {
                Some(&value) => {
                    self.stats.propagations += 1;
                    Expr::Number(value)
                }

                None => expr.clone(),
            },

            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(self.subst(left)),
                right: Box::new(self.subst(right)),
            },

            Expr::Call { callee, arguments } => Expr::Call {
                callee: callee.clone(),
                arguments: arguments.iter().map(|a| self.subst(a)).collect(),
            },

            expr => expr.clone(),
        }
    }
}

fn assigned(statement: &Statement) -> HashSet<String> {
    let mut assigned = HashSet::new();
    super::assigned_vars(statement, &mut assigned);

    assigned
}

fn intersect(env: HashMap<String, i64>, other: &HashMap<String, i64>) -> HashMap<String, i64> {
    env.into_iter()
        .filter(|(name, value)| other.get(name) == Some(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{escape, lex::lex, parse::parse};

    fn run_once(source: &str) -> (Program, OptStats) {
        let program = parse(lex(source).unwrap()).unwrap();
        let escapes = escape::analyze(&program);
        let mut stats = OptStats::default();
        let rewritten = run(&program, &escapes, &mut stats);

        (rewritten, stats)
    }

    fn main_body(program: &Program) -> &[Statement] {
        &program.function("main").unwrap().body
    }

    #[test]
    fn propagates_into_reads() {
        let (program, stats) = run_once("int main() { int x = 10; return x + 1; }");

        assert_eq!(stats.propagations, 1);
        assert!(matches!(
            &main_body(&program)[1],
            Statement::Return(Expr::Binary { left, .. }) if **left == Expr::Number(10)
        ));
    }

    #[test]
    fn assignment_invalidates_stale_values() {
        let (program, _) = run_once(
            "int main() { int x = 1; x = x + 1; return x; }",
        );

        // `x = 1 + 1` aún no es literal, así que el return no cambia
        assert!(matches!(
            &main_body(&program)[2],
            Statement::Return(Expr::Variable(name)) if name == "x"
        ));
    }

    #[test]
    fn if_branches_merge_conservatively() {
        let (program, _) = run_once(
            "int main() { int x = 1; if (2 > 1) { x = 5; } else { x = 6; } return x; }",
        );

        assert!(matches!(
            &main_body(&program)[2],
            Statement::Return(Expr::Variable(_))
        ));

        let (program, _) = run_once(
            "int main() { int x = 1; if (2 > 1) { x = 5; } else { x = 5; } return x; }",
        );

        assert_eq!(main_body(&program)[2], Statement::Return(Expr::Number(5)));
    }

    #[test]
    fn while_invalidates_loop_carried_values() {
        let (program, _) = run_once(
            "int main() { int i = 0; while (i < 3) { i = i + 1; } return i; }",
        );

        let main = main_body(&program);
        match &main[1] {
            Statement::While { condition, .. } => {
                // `i` no puede propagarse a la condición
                assert!(matches!(
                    condition,
                    Expr::Binary { left, .. } if **left == Expr::Variable(String::from("i"))
                ));
            }

            other => panic!("bad statement: {:?}", other),
        }

        assert!(matches!(&main[2], Statement::Return(Expr::Variable(_))));
    }

    #[test]
    fn protected_variables_never_propagate() {
        let (program, stats) = run_once(
            "int main() { int i = 7; int* k = &i; return i; }",
        );

        assert_eq!(stats.propagations, 0);
        assert!(matches!(
            &main_body(&program)[2],
            Statement::Return(Expr::Variable(_))
        ));
    }
}
