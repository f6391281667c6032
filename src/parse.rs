//! Análisis sintáctico.
//!
//! Descenso recursivo sobre el flujo de tokens de [`crate::lex`].
//! Además de construir el árbol, este módulo verifica el invariante
//! de retorno: toda ruta de control de una función no-`void` termina
//! en un `return` con valor, y una función `void` jamás retorna un
//! valor. Las fases posteriores dependen de ese invariante y no lo
//! vuelven a comprobar.

use std::{iter::Peekable, vec};
use thiserror::Error;

use crate::{
    ast::{BinOp, Expr, Function, Parameter, Program, Statement, Target, Type, UnOp},
    lex::{Keyword, Lexeme, Token},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead at line {2}")]
    UnexpectedToken(String, Token, u32),

    #[error("Abrupt end of program")]
    UnexpectedEof,

    #[error("Expected `int`, `int*` or `void`")]
    ExpectedType,

    #[error("The operand of `&` must be a plain variable, at line {0}")]
    BadAddressOf(u32),

    #[error("Not all control paths of function `{0}` return a value")]
    MissingReturn(String),

    #[error("Void function `{0}` returns a value")]
    ReturnValueInVoid(String),

    #[error("Function `{0}` has a `return` without a value")]
    BareReturn(String),
}

type Parse<T> = Result<T, ParserError>;

/// Construye un [`Program`] a partir de la salida del lexer.
pub fn parse(tokens: Vec<Lexeme>) -> Parse<Program> {
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
        last_line: 1,
    };

    let mut functions = Vec::new();
    while parser.tokens.peek().is_some() {
        functions.push(parser.function()?);
    }

    for function in &functions {
        check_returns(function)?;
    }

    Ok(Program { functions })
}

struct Parser {
    tokens: Peekable<vec::IntoIter<Lexeme>>,
    last_line: u32,
}

impl Parser {
    fn function(&mut self) -> Parse<Function> {
        let return_type = self.typ()?;
        let name = self.id()?;

        self.expect(Token::OpenParen)?;
        let mut parameters = Vec::new();
        if self.peek() != Some(&Token::CloseParen) {
            loop {
                let typ = self.typ()?;
                let name = self.id()?;
                parameters.push(Parameter { name, typ });

                if self.peek() == Some(&Token::Comma) {
                    self.next()?;
                } else {
                    break;
                }
            }
        }

        self.expect(Token::CloseParen)?;
        let body = self.block()?;

        Ok(Function {
            name,
            parameters,
            return_type,
            body,
        })
    }

    fn typ(&mut self) -> Parse<Type> {
        match self.next()? {
            Token::Keyword(Keyword::Void) => Ok(Type::Void),

            Token::Keyword(Keyword::Int) => {
                if self.peek() == Some(&Token::Star) {
                    self.next()?;
                    Ok(Type::IntPtr)
                } else {
                    Ok(Type::Int)
                }
            }

            _ => Err(ParserError::ExpectedType),
        }
    }

    fn block(&mut self) -> Parse<Vec<Statement>> {
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        while self.peek() != Some(&Token::CloseCurly) {
            statements.push(self.statement()?);
        }

        self.expect(Token::CloseCurly)?;
        Ok(statements)
    }

    fn statement(&mut self) -> Parse<Statement> {
        match self.peek().ok_or(ParserError::UnexpectedEof)? {
            Token::OpenCurly => Ok(Statement::Block(self.block()?)),
            Token::Keyword(Keyword::Return) => self.return_statement(),
            Token::Keyword(Keyword::If) => self.if_statement(),
            Token::Keyword(Keyword::While) => self.while_statement(),
            Token::Keyword(Keyword::Int) => self.declaration(),

            // `*e = v;` o una sentencia de expresión
            Token::Star => {
                let target = self.unary()?;
                match target {
                    Expr::Unary {
                        op: UnOp::Deref,
                        operand,
                    } if self.peek() == Some(&Token::Assign) => {
                        self.next()?;
                        let value = self.expr()?;
                        self.expect(Token::Semicolon)?;

                        Ok(Statement::Assign {
                            target: Target::Deref(*operand),
                            value,
                        })
                    }

                    target => {
                        self.expect(Token::Semicolon)?;
                        Ok(Statement::Expr(target))
                    }
                }
            }

            _ => {
                let expr = self.expr()?;
                match (expr, self.peek()) {
                    (Expr::Variable(name), Some(&Token::Assign)) => {
                        self.next()?;
                        let value = self.expr()?;
                        self.expect(Token::Semicolon)?;

                        Ok(Statement::Assign {
                            target: Target::Variable(name),
                            value,
                        })
                    }

                    (expr, _) => {
                        self.expect(Token::Semicolon)?;
                        Ok(Statement::Expr(expr))
                    }
                }
            }
        }
    }

    fn return_statement(&mut self) -> Parse<Statement> {
        self.expect(Token::Keyword(Keyword::Return))?;

        let value = if self.peek() == Some(&Token::Semicolon) {
            Expr::Void
        } else {
            self.expr()?
        };

        self.expect(Token::Semicolon)?;
        Ok(Statement::Return(value))
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.expect(Token::Keyword(Keyword::If))?;
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.peek() == Some(&Token::Keyword(Keyword::Else)) {
            self.next()?;
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.expect(Token::Keyword(Keyword::While))?;
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;
        let body = Box::new(self.statement()?);

        Ok(Statement::While { condition, body })
    }

    fn declaration(&mut self) -> Parse<Statement> {
        let typ = self.typ()?;
        let name = self.id()?;
        self.expect(Token::Assign)?;
        let value = self.expr()?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::Declare { name, typ, value })
    }

    // Precedencia, de menor a mayor: comparación, aditivos,
    // multiplicativos, unarios, primarios.
    fn expr(&mut self) -> Parse<Expr> {
        let mut left = self.additive()?;

        loop {
            let op = match self.peek() {
                Some(&Token::Less) => BinOp::Less,
                Some(&Token::Greater) => BinOp::Greater,
                Some(&Token::Equal) => BinOp::Equal,
                _ => break Ok(left),
            };

            self.next()?;
            let right = self.additive()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Parse<Expr> {
        let mut left = self.multiplicative()?;

        loop {
            let op = match self.peek() {
                Some(&Token::Plus) => BinOp::Add,
                Some(&Token::Minus) => BinOp::Sub,
                _ => break Ok(left),
            };

            self.next()?;
            let right = self.multiplicative()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Parse<Expr> {
        let mut left = self.unary()?;

        loop {
            let op = match self.peek() {
                Some(&Token::Star) => BinOp::Mul,
                Some(&Token::Slash) => BinOp::Div,
                _ => break Ok(left),
            };

            self.next()?;
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Parse<Expr> {
        match self.peek() {
            Some(&Token::Star) => {
                self.next()?;
                let operand = self.unary()?;

                Ok(Expr::Unary {
                    op: UnOp::Deref,
                    operand: Box::new(operand),
                })
            }

            Some(&Token::Ampersand) => {
                self.next()?;
                match self.next()? {
                    Token::Id(name) => Ok(Expr::Unary {
                        op: UnOp::AddressOf,
                        operand: Box::new(Expr::Variable(name)),
                    }),

                    _ => Err(ParserError::BadAddressOf(self.last_line)),
                }
            }

            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Parse<Expr> {
        match self.next()? {
            Token::Int(value) => Ok(Expr::Number(value)),

            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;
                Ok(inner)
            }

            Token::Id(name) => {
                if self.peek() != Some(&Token::OpenParen) {
                    return Ok(Expr::Variable(name));
                }

                self.next()?;
                let mut arguments = Vec::new();
                if self.peek() != Some(&Token::CloseParen) {
                    loop {
                        arguments.push(self.expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.next()?;
                        } else {
                            break;
                        }
                    }
                }

                self.expect(Token::CloseParen)?;
                Ok(Expr::Call {
                    callee: name,
                    arguments,
                })
            }

            token => Err(ParserError::UnexpectedToken(
                String::from("an expression"),
                token,
                self.last_line,
            )),
        }
    }

    fn id(&mut self) -> Parse<String> {
        match self.next()? {
            Token::Id(name) => Ok(name),
            token => Err(ParserError::UnexpectedToken(
                String::from("an identifier"),
                token,
                self.last_line,
            )),
        }
    }

    fn expect(&mut self, expected: Token) -> Parse<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParserError::UnexpectedToken(
                expected.to_string(),
                token,
                self.last_line,
            ))
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(|lexeme| &lexeme.token)
    }

    fn next(&mut self) -> Parse<Token> {
        let lexeme = self.tokens.next().ok_or(ParserError::UnexpectedEof)?;
        self.last_line = lexeme.line;

        Ok(lexeme.token)
    }
}

/// Verifica el invariante de rutas de retorno de una función.
fn check_returns(function: &Function) -> Parse<()> {
    if function.return_type == Type::Void {
        if returns_value(&function.body) {
            return Err(ParserError::ReturnValueInVoid(function.name.clone()));
        }
    } else if bare_return(&function.body) {
        return Err(ParserError::BareReturn(function.name.clone()));
    } else if !always_returns(&function.body) {
        return Err(ParserError::MissingReturn(function.name.clone()));
    }

    Ok(())
}

fn returns_value(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Return(Expr::Void) => false,
        Statement::Return(_) => true,
        Statement::Block(inner) => returns_value(inner),
        Statement::While { body, .. } => returns_value(std::slice::from_ref(body)),
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            returns_value(std::slice::from_ref(then_branch))
                || else_branch
                    .as_deref()
                    .map_or(false, |s| returns_value(std::slice::from_ref(s)))
        }

        _ => false,
    })
}

fn bare_return(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Return(Expr::Void) => true,
        Statement::Block(inner) => bare_return(inner),
        Statement::While { body, .. } => bare_return(std::slice::from_ref(body)),
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            bare_return(std::slice::from_ref(then_branch))
                || else_branch
                    .as_deref()
                    .map_or(false, |s| bare_return(std::slice::from_ref(s)))
        }

        _ => false,
    })
}

fn always_returns(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Return(expr) => *expr != Expr::Void,
        Statement::Block(inner) => always_returns(inner),
        Statement::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => {
            always_returns(std::slice::from_ref(then_branch))
                && always_returns(std::slice::from_ref(else_branch))
        }

        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::lex;

    fn parse_source(source: &str) -> Parse<Program> {
        parse(lex(source).unwrap())
    }

    #[test]
    fn parses_precedence() {
        let program = parse_source("int main() { return 1 + 2 * 3 < 10; }").unwrap();
        let main = program.function("main").unwrap();

        match &main.body[0] {
            Statement::Return(Expr::Binary { op, left, .. }) => {
                assert_eq!(*op, BinOp::Less);
                match left.as_ref() {
                    Expr::Binary { op, right, .. } => {
                        assert_eq!(*op, BinOp::Add);
                        assert!(matches!(right.as_ref(), Expr::Binary { op: BinOp::Mul, .. }));
                    }

                    other => panic!("bad tree: {:?}", other),
                }
            }

            other => panic!("bad statement: {:?}", other),
        }
    }

    #[test]
    fn parses_pointers() {
        let program =
            parse_source("int main() { int i = 7; int* k = &i; *k = 9; return *k; }").unwrap();

        let main = program.function("main").unwrap();
        assert!(matches!(
            &main.body[1],
            Statement::Declare { typ: Type::IntPtr, .. }
        ));
        assert!(matches!(
            &main.body[2],
            Statement::Assign { target: Target::Deref(_), .. }
        ));
    }

    #[test]
    fn requires_return_on_every_path() {
        let missing = parse_source("int f() { if (1 > 0) { return 1; } }");
        assert!(matches!(missing, Err(ParserError::MissingReturn(_))));

        let both = parse_source("int f() { if (1 > 0) { return 1; } else { return 2; } }");
        assert!(both.is_ok());
    }

    #[test]
    fn rejects_value_return_in_void() {
        let bad = parse_source("void f() { return 3; }");
        assert!(matches!(bad, Err(ParserError::ReturnValueInVoid(_))));

        let good = parse_source("void f() { return; }");
        assert!(good.is_ok());
    }

    #[test]
    fn rejects_bare_return_in_non_void() {
        let bad = parse_source("int f() { if (1 > 0) { return; } return 1; }");
        assert!(matches!(bad, Err(ParserError::BareReturn(_))));
    }

    #[test]
    fn address_of_requires_variable() {
        let bad = parse_source("int main() { int* p = &3; return 0; }");
        assert!(matches!(bad, Err(ParserError::BadAddressOf(_))));
    }
}
