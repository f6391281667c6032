//! Eliminación de código muerto.
//!
//! Tres reglas por función: se descartan asignaciones a variables
//! seguras que nadie lee y cuyo lado derecho carece de efectos, se
//! recorta todo lo que siga a un `return` dentro del mismo bloque,
//! y un `if` cuya condición ya es literal se reemplaza por su rama
//! viva. El conjunto de lecturas se computa una vez por función al
//! inicio de la fase; lo que esta pasada no alcance a limpiar lo
//! recoge la siguiente.

use std::collections::HashSet;

use super::OptStats;
use crate::{
    ast::{Expr, Function, Program, Statement, Target},
    escape::Escapes,
};

pub(super) fn run(program: &Program, escapes: &Escapes, stats: &mut OptStats) -> Program {
    let pure = super::pure_functions(program);

    let functions = program
        .functions
        .iter()
        .map(|function| {
            let mut reads = HashSet::new();
            for statement in &function.body {
                collect_reads(statement, &mut reads);
            }

            let mut dce = Dce {
                escapes,
                stats,
                pure: &pure,
                reads,
            };

            Function {
                body: dce.block(&function.body),
                ..function.clone()
            }
        })
        .collect();

    Program { functions }
}

struct Dce<'a> {
    escapes: &'a Escapes,
    stats: &'a mut OptStats,
    pure: &'a HashSet<String>,
    reads: HashSet<String>,
}

impl Dce<'_> {
    fn block(&mut self, statements: &[Statement]) -> Vec<Statement> {
        let mut output = Vec::new();

        for (index, statement) in statements.iter().enumerate() {
            let statement = match self.stmt(statement) {
                Some(statement) => statement,
                None => continue,
            };

            let terminates = matches!(statement, Statement::Return(_));
            output.push(statement);

            if terminates {
                // Todo lo que sigue es inalcanzable
                let dropped = statements.len() - index - 1;
                self.stats.eliminations += dropped as u32;
                break;
            }
        }

        output
    }

    fn stmt(&mut self, statement: &Statement) -> Option<Statement> {
        if self.escapes.shields_stmt(statement) {
            return Some(statement.clone());
        }

        match statement {
            Statement::Block(statements) => Some(Statement::Block(self.block(statements))),

            Statement::Declare { name, value, .. } | Statement::Assign {
                target: Target::Variable(name),
                value,
            } if self.removable(name, value) => {
                self.stats.eliminations += 1;
                None
            }

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => match condition.literal() {
                // La rama viva se procesa en esta misma pasada
                Some(value) => {
                    self.stats.eliminations += 1;
                    let live = if value != 0 {
                        Some(then_branch.as_ref())
                    } else {
                        else_branch.as_deref()
                    };

                    match live {
                        Some(live) => self.stmt(live),
                        None => None,
                    }
                }

                None => Some(Statement::If {
                    condition: condition.clone(),
                    then_branch: Box::new(
                        self.stmt(then_branch)
                            .unwrap_or_else(|| Statement::Block(Vec::new())),
                    ),
                    else_branch: match else_branch {
                        Some(else_branch) => self.stmt(else_branch).map(Box::new),
                        None => None,
                    },
                }),
            },

            Statement::While { condition, body } => Some(Statement::While {
                condition: condition.clone(),
                body: Box::new(
                    self.stmt(body)
                        .unwrap_or_else(|| Statement::Block(Vec::new())),
                ),
            }),

            statement => Some(statement.clone()),
        }
    }

    fn removable(&self, name: &str, value: &Expr) -> bool {
        !self.reads.contains(name) && !super::has_side_effect(value, self.pure)
    }
}

/// Lecturas de variables en cualquier parte de la sentencia. El
/// destino simple de una asignación es una escritura, no cuenta.
fn collect_reads(statement: &Statement, reads: &mut HashSet<String>) {
    super::visit_exprs(statement, &mut |expr| {
        if let Expr::Variable(name) = expr {
            reads.insert(name.clone());
        }
    });

    match statement {
        Statement::Block(statements) => {
            for statement in statements {
                collect_reads(statement, reads);
            }
        }

        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_reads(then_branch, reads);
            if let Some(else_branch) = else_branch {
                collect_reads(else_branch, reads);
            }
        }

        Statement::While { body, .. } => collect_reads(body, reads),
        _ => {}
    }
}
