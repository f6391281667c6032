//! Errores fatales compartidos por el optimizador y el back end.

use std::fmt;
use thiserror::Error;

/// Condiciones que abortan la compilación en curso.
///
/// Ninguna de estas se reintenta ni se recupera localmente: el
/// árbol original permanece válido y el llamador decide qué hacer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Program declares no functions")]
    EmptyProgram,

    #[error("Entrypoint not found, define a function `main`")]
    NoMain,

    #[error("Function `{0}` declares more than {1} parameters")]
    TooManyParameters(String, usize),

    #[error("Call to `{0}` passes more than {1} arguments")]
    TooManyArguments(String, usize),

    #[error("Reference to unresolved variable `{0}`")]
    UnresolvedVariable(String),

    #[error("Division by zero in constant expression")]
    DivisionByZero,

    #[error("Formatter failure")]
    Fmt(#[from] fmt::Error),
}
