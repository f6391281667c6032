//! Compilador para un subconjunto de C con punteros simples.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente. Este
//! archivo se somete primero a análisis léxico en [`lex`], de lo
//! cual se obtiene un flujo de tokens. El flujo de tokens se
//! dispone en un AST por medio de análisis sintáctico en [`parse`],
//! árbol descrito en [`ast`] que el resto del compilador comparte
//! sin transformarlo a una representación intermedia aparte.
//!
//! # Optimización
//! El árbol pasa por [`opt`], una canalización de punto fijo que
//! alterna eliminación de código muerto, propagación de constantes
//! y plegado. Toda fase consulta primero el análisis de escape de
//! [`escape`]: en presencia de punteros, ninguna reescritura toca
//! una sentencia o expresión que involucre variables cuya dirección
//! fue tomada.
//!
//! # Back end
//! La generación de código en [`codegen`] traduce el árbol a
//! ensamblador textual AArch64 con convención de llamada AAPCS64 y
//! símbolos al estilo Mach-O. No hay ensamblado ni enlazado aquí:
//! el listado emitido se entrega tal cual, y [`interp`] lo puede
//! re-ejecutar directamente como oráculo semántico sin depender de
//! una toolchain nativa.

#[macro_use]
mod macros;

pub mod ast;
pub mod codegen;
pub mod error;
pub mod escape;
pub mod interp;
pub mod lex;
pub mod opt;
pub mod parse;
