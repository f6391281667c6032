//! Plegado de constantes y simplificación algebraica.
//!
//! Reescritura ascendente de expresiones binarias: primero se
//! aplican identidades (`x±0`, `0+x`, `x*1`, `1*x`, `x*0`, `0*x`,
//! `x/1`) y luego, si ambos operandos son literales, se evalúa el
//! operador. La división pliega hacia menos infinito y dividir por
//! cero es un error fatal en tiempo de compilación. Los comparadores
//! pliegan a 1/0. Un `while` cuya condición pliega al literal 0 se
//! reemplaza por un bloque vacío: el ciclo jamás ejecuta.

use std::collections::HashSet;

use super::OptStats;
use crate::{
    ast::{BinOp, Expr, Function, Program, Statement},
    error::CompileError,
    escape::Escapes,
};

pub(super) fn run(
    program: &Program,
    escapes: &Escapes,
    stats: &mut OptStats,
) -> Result<Program, CompileError> {
    let pure = super::pure_functions(program);

    let functions = program
        .functions
        .iter()
        .map(|function| {
            let mut folder = Folder {
                escapes,
                stats,
                pure: &pure,
            };

            Ok(Function {
                body: folder.block(&function.body)?,
                ..function.clone()
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    Ok(Program { functions })
}

struct Folder<'a> {
    escapes: &'a Escapes,
    stats: &'a mut OptStats,
    pure: &'a HashSet<String>,
}

impl Folder<'_> {
    fn block(&mut self, statements: &[Statement]) -> Result<Vec<Statement>, CompileError> {
        statements.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, statement: &Statement) -> Result<Statement, CompileError> {
        if self.escapes.shields_stmt(statement) {
            return Ok(statement.clone());
        }

        Ok(match statement {
            Statement::Block(statements) => Statement::Block(self.block(statements)?),

            Statement::Declare { name, typ, value } => Statement::Declare {
                name: name.clone(),
                typ: *typ,
                value: self.expr(value)?,
            },

            Statement::Assign { target, value } => Statement::Assign {
                target: target.clone(),
                value: self.expr(value)?,
            },

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => Statement::If {
                condition: self.expr(condition)?,
                then_branch: Box::new(self.stmt(then_branch)?),
                else_branch: match else_branch {
                    Some(else_branch) => Some(Box::new(self.stmt(else_branch)?)),
                    None => None,
                },
            },

            Statement::While { condition, body } => {
                let condition = self.expr(condition)?;
                if condition.literal() == Some(0) {
                    // Ciclo probadamente muerto
                    self.stats.eliminations += 1;
                    return Ok(Statement::Block(Vec::new()));
                }

                Statement::While {
                    condition,
                    body: Box::new(self.stmt(body)?),
                }
            }

            Statement::Return(expr) => Statement::Return(self.expr(expr)?),
            Statement::Expr(expr) => Statement::Expr(self.expr(expr)?),
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<Expr, CompileError> {
        if self.escapes.shields_expr(expr) {
            return Ok(expr.clone());
        }

        Ok(match expr {
            Expr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;

                if let Some(simplified) = self.identity(*op, &left, &right) {
                    self.stats.simplifications += 1;
                    return Ok(simplified);
                }

                match (left.literal(), right.literal()) {
                    (Some(a), Some(b)) => {
                        let value = match op {
                            BinOp::Add => a.wrapping_add(b),
                            BinOp::Sub => a.wrapping_sub(b),
                            BinOp::Mul => a.wrapping_mul(b),
                            BinOp::Div => {
                                if b == 0 {
                                    return Err(CompileError::DivisionByZero);
                                }

                                super::div_floor(a, b)
                            }

                            BinOp::Less => (a < b) as i64,
                            BinOp::Greater => (a > b) as i64,
                            BinOp::Equal => (a == b) as i64,
                        };

                        self.stats.foldings += 1;
                        Expr::Number(value)
                    }

                    _ => Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                }
            }

            Expr::Call { callee, arguments } => Expr::Call {
                callee: callee.clone(),
                arguments: arguments
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<_, _>>()?,
            },

            expr => expr.clone(),
        })
    }

    /// Identidades algebraicas, evaluadas antes que el plegado.
    fn identity(&self, op: BinOp, left: &Expr, right: &Expr) -> Option<Expr> {
        use BinOp::*;

        match (op, left.literal(), right.literal()) {
            (Add, _, Some(0)) | (Sub, _, Some(0)) | (Mul, _, Some(1)) | (Div, _, Some(1)) => {
                Some(left.clone())
            }

            (Add, Some(0), _) | (Mul, Some(1), _) => Some(right.clone()),

            // `x*0` solo puede descartar a `x` si no tiene efectos
            (Mul, _, Some(0)) if !super::has_side_effect(left, self.pure) => {
                Some(Expr::Number(0))
            }

            (Mul, Some(0), _) if !super::has_side_effect(right, self.pure) => {
                Some(Expr::Number(0))
            }

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{escape, lex::lex, parse::parse};

    fn run_once(source: &str) -> Result<(Program, OptStats), CompileError> {
        let program = parse(lex(source).unwrap()).unwrap();
        let escapes = escape::analyze(&program);
        let mut stats = OptStats::default();
        let rewritten = run(&program, &escapes, &mut stats)?;

        Ok((rewritten, stats))
    }

    fn returned(program: &Program) -> &Expr {
        match program.function("main").unwrap().body.last().unwrap() {
            Statement::Return(expr) => expr,
            other => panic!("bad statement: {:?}", other),
        }
    }

    #[test]
    fn applies_identities_for_any_operand() {
        // `(0 - 9)` cubre operandos negativos: el lenguaje no tiene
        // literales negativos
        for (a, lexeme) in [(0, "0"), (1, "1"), (7, "7"), (1000, "1000"), (-9, "(0 - 9)")] {
            for source in [
                format!("int main() {{ return {} + 0; }}", lexeme),
                format!("int main() {{ return 0 + {}; }}", lexeme),
                format!("int main() {{ return {} - 0; }}", lexeme),
                format!("int main() {{ return {} * 1; }}", lexeme),
                format!("int main() {{ return 1 * {}; }}", lexeme),
                format!("int main() {{ return {} / 1; }}", lexeme),
            ] {
                let (program, stats) = run_once(&source).unwrap();
                assert_eq!(*returned(&program), Expr::Number(a), "{}", source);
                assert_eq!(stats.simplifications, 1, "{}", source);
            }

            for source in [
                format!("int main() {{ return {} * 0; }}", lexeme),
                format!("int main() {{ return 0 * {}; }}", lexeme),
            ] {
                let (program, _) = run_once(&source).unwrap();
                assert_eq!(*returned(&program), Expr::Number(0), "{}", source);
            }
        }
    }

    #[test]
    fn folds_literal_arithmetic() {
        let (program, stats) = run_once("int main() { return 2 + 3 * 4; }").unwrap();

        assert_eq!(*returned(&program), Expr::Number(14));
        assert_eq!(stats.foldings, 2);
    }

    #[test]
    fn division_folds_toward_negative_infinity() {
        let (program, _) = run_once("int main() { return (0 - 7) / 2; }").unwrap();
        assert_eq!(*returned(&program), Expr::Number(-4));
    }

    #[test]
    fn comparisons_fold_to_bits() {
        let (program, _) = run_once("int main() { return 5 > 10; }").unwrap();
        assert_eq!(*returned(&program), Expr::Number(0));

        let (program, _) = run_once("int main() { return 0 == 0; }").unwrap();
        assert_eq!(*returned(&program), Expr::Number(1));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let result = run_once("int main() { return 1 / 0; }");
        assert!(matches!(result, Err(CompileError::DivisionByZero)));
    }

    #[test]
    fn never_executing_while_becomes_empty_block() {
        let (program, stats) =
            run_once("int main() { while (0) { int x = 1; } return 2; }").unwrap();

        let main = program.function("main").unwrap();
        assert_eq!(main.body[0], Statement::Block(Vec::new()));
        assert_eq!(stats.eliminations, 1);
    }

    #[test]
    fn impure_operand_blocks_mul_zero() {
        let (program, _) =
            run_once("int main() { return printf(1) * 0; }").unwrap();

        assert!(matches!(*returned(&program), Expr::Binary { .. }));
    }

    #[test]
    fn shielded_expressions_are_untouched() {
        let (program, stats) = run_once(
            "int main() { int i = 7; int* k = &i; return *k + 0; }",
        )
        .unwrap();

        assert_eq!(stats.simplifications, 0);
        assert!(matches!(*returned(&program), Expr::Binary { .. }));
    }
}
