//! Análisis de escape.
//!
//! Recorrido único sobre el programa que clasifica variables en dos
//! conjuntos: las de tipo puntero y aquellas cuya dirección se toma
//! con `&`. Una variable "protegida" pertenece a alguno de los dos
//! conjuntos y queda fuera de toda optimización.
//!
//! La aproximación es deliberadamente conservadora: es insensible
//! al flujo, opera sobre el programa completo y no intenta análisis
//! de alias. Basta una sola desreferencia en cualquier parte para
//! que toda expresión que mencione punteros quede excluida, aunque
//! esa ocurrencia concreta no pueda alias a la variable en cuestión.
//! Se prefiere solidez sobre precisión.

use std::collections::HashSet;

use crate::ast::{Expr, Program, Statement, Target, UnOp};

/// Resultado del análisis, reconstruido en cada invocación de
/// [`crate::opt::optimize`] y nunca persistido.
#[derive(Debug, Default)]
pub struct Escapes {
    /// Existe algún uso de punteros en el programa.
    pub has_pointers: bool,

    /// Variables y parámetros declarados con tipo puntero.
    pub pointer_vars: HashSet<String>,

    /// Variables que aparecen como operando de `&`.
    pub address_taken: HashSet<String>,
}

impl Escapes {
    /// Una variable protegida no admite propagación de constantes,
    /// plegado a través de ella ni eliminación de código muerto.
    pub fn protected(&self, name: &str) -> bool {
        self.pointer_vars.contains(name) || self.address_taken.contains(name)
    }

    /// Tamaño de la unión de ambos conjuntos.
    pub fn pointers_detected(&self) -> usize {
        self.pointer_vars.union(&self.address_taken).count()
    }

    /// Una expresión queda blindada si contiene léxicamente una
    /// desreferencia, una toma de dirección o una referencia a una
    /// variable protegida.
    pub fn shields_expr(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Number(_) | Expr::Void => false,
            Expr::Variable(name) => self.protected(name),
            Expr::Unary { .. } => true,
            Expr::Binary { left, right, .. } => {
                self.shields_expr(left) || self.shields_expr(right)
            }

            Expr::Call { arguments, .. } => {
                arguments.iter().any(|argument| self.shields_expr(argument))
            }
        }
    }

    /// Extensión de [`Escapes::shields_expr`] a sentencias completas.
    pub fn shields_stmt(&self, statement: &Statement) -> bool {
        match statement {
            Statement::Block(statements) => statements.iter().any(|s| self.shields_stmt(s)),

            Statement::Declare { name, typ, value } => {
                typ.is_pointer() || self.protected(name) || self.shields_expr(value)
            }

            Statement::Assign { target, value } => {
                let target_shielded = match target {
                    Target::Variable(name) => self.protected(name),
                    Target::Deref(_) => true,
                };

                target_shielded || self.shields_expr(value)
            }

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.shields_expr(condition)
                    || self.shields_stmt(then_branch)
                    || else_branch.as_deref().map_or(false, |s| self.shields_stmt(s))
            }

            Statement::While { condition, body } => {
                self.shields_expr(condition) || self.shields_stmt(body)
            }

            Statement::Return(expr) | Statement::Expr(expr) => self.shields_expr(expr),
        }
    }
}

/// Ejecuta el análisis sobre un programa completo.
pub fn analyze(program: &Program) -> Escapes {
    let mut escapes = Escapes::default();

    for function in &program.functions {
        if function.return_type.is_pointer() {
            escapes.has_pointers = true;
        }

        for parameter in &function.parameters {
            if parameter.typ.is_pointer() {
                escapes.has_pointers = true;
                escapes.pointer_vars.insert(parameter.name.clone());
            }
        }

        for statement in &function.body {
            scan_stmt(&mut escapes, statement);
        }
    }

    escapes
}

fn scan_stmt(escapes: &mut Escapes, statement: &Statement) {
    match statement {
        Statement::Block(statements) => {
            for statement in statements {
                scan_stmt(escapes, statement);
            }
        }

        Statement::Declare { name, typ, value } => {
            if typ.is_pointer() {
                escapes.has_pointers = true;
                escapes.pointer_vars.insert(name.clone());
            }

            scan_expr(escapes, value);
        }

        Statement::Assign { target, value } => {
            if let Target::Deref(pointer) = target {
                escapes.has_pointers = true;
                scan_expr(escapes, pointer);
            }

            scan_expr(escapes, value);
        }

        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            scan_expr(escapes, condition);
            scan_stmt(escapes, then_branch);
            if let Some(else_branch) = else_branch {
                scan_stmt(escapes, else_branch);
            }
        }

        Statement::While { condition, body } => {
            scan_expr(escapes, condition);
            scan_stmt(escapes, body);
        }

        Statement::Return(expr) | Statement::Expr(expr) => scan_expr(escapes, expr),
    }
}

fn scan_expr(escapes: &mut Escapes, expr: &Expr) {
    match expr {
        Expr::Number(_) | Expr::Variable(_) | Expr::Void => {}

        Expr::Unary { op, operand } => {
            escapes.has_pointers = true;
            if let (UnOp::AddressOf, Expr::Variable(name)) = (op, operand.as_ref()) {
                escapes.address_taken.insert(name.clone());
            }

            scan_expr(escapes, operand);
        }

        Expr::Binary { left, right, .. } => {
            scan_expr(escapes, left);
            scan_expr(escapes, right);
        }

        Expr::Call { arguments, .. } => {
            for argument in arguments {
                scan_expr(escapes, argument);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::lex, parse::parse};

    fn analyze_source(source: &str) -> Escapes {
        analyze(&parse(lex(source).unwrap()).unwrap())
    }

    #[test]
    fn pointer_free_program_is_clean() {
        let escapes = analyze_source("int main() { int x = 1; return x; }");

        assert!(!escapes.has_pointers);
        assert_eq!(escapes.pointers_detected(), 0);
        assert!(!escapes.protected("x"));
    }

    #[test]
    fn classifies_both_sets() {
        let escapes =
            analyze_source("int main() { int i = 7; int* k = &i; return *k; }");

        assert!(escapes.has_pointers);
        assert!(escapes.pointer_vars.contains("k"));
        assert!(escapes.address_taken.contains("i"));
        assert!(escapes.protected("i") && escapes.protected("k"));
        assert_eq!(escapes.pointers_detected(), 2);
    }

    #[test]
    fn pointer_parameters_are_protected() {
        let escapes = analyze_source(
            "void f(int* p) { *p = 3; return; } int main() { return 0; }",
        );

        assert!(escapes.has_pointers);
        assert!(escapes.protected("p"));
    }

    #[test]
    fn shielding_is_lexical() {
        let escapes =
            analyze_source("int main() { int i = 1; int* k = &i; int y = 2; return y; }");

        // `y` no es puntero, pero cualquier expresión que mencione a
        // `i` o `k` queda blindada
        assert!(!escapes.protected("y"));
        assert!(escapes.shields_expr(&crate::ast::Expr::Variable(String::from("i"))));
        assert!(!escapes.shields_expr(&crate::ast::Expr::Variable(String::from("y"))));
    }
}
