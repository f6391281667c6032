//! Árbol sintáctico del programa.
//!
//! Este módulo define el modelo de datos compartido por todas las
//! fases del compilador. El árbol que produce [`crate::parse`] se
//! considera canónico e inmutable: el optimizador trabaja siempre
//! sobre una copia profunda ([`Clone`]) y cada fase de reescritura
//! construye nodos nuevos en vez de mutar los existentes, de modo
//! que los subárboles pueden compartirse o descartarse sin riesgo
//! de aliasing entre el árbol original y el optimizado.

use std::fmt::{self, Display};

/// Un programa es una secuencia ordenada de funciones.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
}

impl Program {
    /// Busca una función por nombre. Los nombres distinguen mayúsculas.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub typ: Type,
}

/// Tipos del lenguaje: enteros, punteros de un solo nivel y `void`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    IntPtr,
    Void,
}

impl Type {
    pub fn is_pointer(self) -> bool {
        matches!(self, Type::IntPtr)
    }
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::IntPtr => fmt.write_str("int*"),
            Type::Void => fmt.write_str("void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Secuencia de sentencias. El lenguaje no tiene shadowing por
    /// bloque: todas las declaraciones comparten el espacio de
    /// nombres plano de la función.
    Block(Vec<Statement>),

    /// Declaración con inicializador obligatorio.
    Declare {
        name: String,
        typ: Type,
        value: Expr,
    },

    Assign {
        target: Target,
        value: Expr,
    },

    If {
        condition: Expr,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },

    While {
        condition: Expr,
        body: Box<Statement>,
    },

    /// `return e;`, o `return;` representado con [`Expr::Void`].
    Return(Expr),

    /// Expresión evaluada solo por sus efectos.
    Expr(Expr),
}

/// Lado izquierdo de una asignación.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Variable(String),

    /// `*e = v;`, donde la expresión es el puntero a desreferenciar.
    Deref(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    Variable(String),

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },

    Call {
        callee: String,
        arguments: Vec<Expr>,
    },

    /// Centinela para `return;` en funciones `void`.
    Void,
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Valor de la expresión si es un literal entero.
    pub fn literal(&self) -> Option<i64> {
        match self {
            Expr::Number(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    Greater,
    Equal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    /// `&x`; el operando debe ser una variable simple.
    AddressOf,

    /// `*e`; puede anidarse.
    Deref,
}
