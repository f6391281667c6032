//! Generación de código AArch64 (dialecto textual de Darwin).
//!
//! Cada función recibe un marco de pila de tamaño fijo: el par
//! x29/x30, el área de respaldo de los registros de trabajo y un
//! presupuesto plano de ranuras de 8 bytes para parámetros, locales
//! y argumentos en tránsito, todo alineado a 16 bytes como exige la
//! ABI. La función `main` direcciona sus ranuras relativas a x29,
//! de modo que sigan siendo accesibles tras ajustes de `sp` a mitad
//! de función; las demás funciones direccionan relativas a `sp`,
//! compensando la profundidad de los push dinámicos.
//!
//! El resultado de toda expresión queda en el acumulador `x0`. Los
//! operandos intermedios viven en la reserva de [`regs`]; si la
//! reserva se agota, se cae a evaluación por pila, que produce
//! resultados idénticos.

use std::{collections::HashMap, fmt::Write};

use crate::{
    ast::{BinOp, Expr, Function, Program, Statement, Target, UnOp},
    error::CompileError,
};

use self::regs::{Pool, Reg};

mod regs;

/// Límite de argumentos y parámetros enteros por convención de
/// llamada: x0-x7.
pub const MAX_ARGS: usize = 8;

// Presupuesto plano de 16 ranuras de 8 bytes por función. Un
// desborde no se detecta; ver la nota en tests/pipeline.rs.
const SLOT_AREA: i64 = 128;

// x19-x26, cuatro pares
const SAVE_AREA: i64 = 64;

/// Traduce el programa a ensamblador. El árbol puede venir del
/// optimizador o directamente del parser.
pub fn emit(program: &Program) -> Result<String, CompileError> {
    let mut generator = Generator {
        out: String::new(),
        labels: 0,
        strings: Vec::new(),
    };

    writeln!(generator.out, ".text")?;

    for function in &program.functions {
        log::debug!("emitting function `{}`", function.name);

        let context = Context {
            generator: &mut generator,
            function,
            slots: HashMap::new(),
            next_offset: if function.name == "main" { -8 } else { 0 },
            frame_relative: function.name == "main",
            pool: Pool::new(),
            pushed: 0,
            temps: 0,
        };

        context.write_asm()?;
    }

    if !generator.strings.is_empty() {
        writeln!(generator.out, ".section __TEXT,__cstring,cstring_literals")?;
        for (index, text) in generator.strings.iter().enumerate() {
            writeln!(generator.out, "l_.str.{}:", index)?;
            writeln!(
                generator.out,
                "\t.asciz \"{}\"",
                text.replace('\n', "\\n")
            )?;
        }
    }

    writeln!(generator.out, ".subsections_via_symbols")?;
    Ok(generator.out)
}

/// Estado propio de una compilación: contadores de etiquetas y
/// literales de cadena. Nada de esto persiste entre compilaciones
/// independientes.
struct Generator {
    out: String,
    labels: u32,
    strings: Vec<String>,
}

impl Generator {
    fn fresh_label(&mut self, hint: &str) -> String {
        let label = format!("L{}_{}", hint, self.labels);
        self.labels += 1;

        label
    }

    /// Interna un literal de formato. Cada sitio de llamada recibe
    /// su propia etiqueta; no se deduplica.
    fn intern(&mut self, text: &str) -> String {
        let label = format!("l_.str.{}", self.strings.len());
        self.strings.push(text.to_owned());

        label
    }
}

struct Context<'a> {
    generator: &'a mut Generator,
    function: &'a Function,
    slots: HashMap<String, i64>,
    next_offset: i64,
    frame_relative: bool,
    pool: Pool,
    pushed: i64,
    temps: u32,
}

impl Context<'_> {
    fn out(&mut self) -> &mut String {
        &mut self.generator.out
    }

    fn write_asm(mut self) -> Result<(), CompileError> {
        let symbol = symbol(&self.function.name);
        writeln!(self.out(), ".globl {}", symbol)?;
        writeln!(self.out(), "{}:", symbol)?;

        // Prólogo
        if self.frame_relative {
            emit!(self, "stp", "x29, x30, [sp, #-16]!")?;
            emit!(self, "mov", "x29, sp")?;
            emit!(self, "sub", "sp, sp, #{}", SLOT_AREA + SAVE_AREA)?;
        } else {
            emit!(self, "sub", "sp, sp, #{}", SLOT_AREA + SAVE_AREA + 16)?;
            emit!(self, "stp", "x29, x30, [sp, #{}]", SLOT_AREA + SAVE_AREA)?;
            emit!(self, "add", "x29, sp, #{}", SLOT_AREA + SAVE_AREA)?;
        }

        let save_base = if self.frame_relative { 0 } else { SLOT_AREA };
        for (index, pair) in Reg::FILE.chunks(2).enumerate() {
            emit!(
                self,
                "stp",
                "{}, {}, [sp, #{}]",
                pair[0],
                pair[1],
                save_base + 16 * index as i64
            )?;
        }

        // Los parámetros entrantes se derraman de inmediato a sus
        // ranuras
        if self.function.parameters.len() > MAX_ARGS {
            return Err(CompileError::TooManyParameters(
                self.function.name.clone(),
                MAX_ARGS,
            ));
        }

        let function = self.function;
        for (index, parameter) in function.parameters.iter().enumerate() {
            let offset = self.define_slot(&parameter.name);
            let address = self.slot_address(offset);
            emit!(self, "str", "x{}, {}", index, address)?;
        }

        for statement in &function.body {
            self.stmt(statement)?;
        }

        // Epílogo único; todo `return` salta aquí
        let ret = ret_label(&self.function.name);
        writeln!(self.out(), "{}:", ret)?;

        for (index, pair) in Reg::FILE.chunks(2).enumerate() {
            emit!(
                self,
                "ldp",
                "{}, {}, [sp, #{}]",
                pair[0],
                pair[1],
                save_base + 16 * index as i64
            )?;
        }

        if self.frame_relative {
            emit!(self, "add", "sp, sp, #{}", SLOT_AREA + SAVE_AREA)?;
            emit!(self, "ldp", "x29, x30, [sp], #16")?;
        } else {
            emit!(self, "ldp", "x29, x30, [sp, #{}]", SLOT_AREA + SAVE_AREA)?;
            emit!(self, "add", "sp, sp, #{}", SLOT_AREA + SAVE_AREA + 16)?;
        }

        emit!(self, "ret")?;
        Ok(())
    }

    fn stmt(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Block(statements) => {
                for statement in statements {
                    self.stmt(statement)?;
                }

                Ok(())
            }

            Statement::Declare { name, value, .. } => {
                self.expr(value)?;
                let offset = self.define_slot(name);
                let address = self.slot_address(offset);
                emit!(self, "str", "x0, {}", address)?;

                Ok(())
            }

            Statement::Assign {
                target: Target::Variable(name),
                value,
            } => {
                self.expr(value)?;

                // DCE puede haber eliminado la declaración y dejado
                // esta asignación como primer uso
                let offset = match self.lookup_slot(name) {
                    Some(offset) => offset,
                    None => self.define_slot(name),
                };

                let address = self.slot_address(offset);
                emit!(self, "str", "x0, {}", address)?;

                Ok(())
            }

            // El valor se evalúa primero y se preserva mientras se
            // computa la dirección destino
            Statement::Assign {
                target: Target::Deref(pointer),
                value,
            } => {
                self.expr(value)?;

                match self.pool.take() {
                    Some(reg) => {
                        emit!(self, "mov", "{}, x0", reg)?;
                        self.expr(pointer)?;
                        emit!(self, "str", "{}, [x0]", reg)?;
                        self.pool.release(reg);
                    }

                    None => {
                        self.push_acc()?;
                        self.expr(pointer)?;
                        self.pop_into("x1")?;
                        emit!(self, "str", "x1, [x0]")?;
                    }
                }

                Ok(())
            }

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition)?;

                match else_branch {
                    None => {
                        let end = self.generator.fresh_label("end");
                        emit!(self, "cbz", "x0, {}", end)?;
                        self.stmt(then_branch)?;
                        writeln!(self.out(), "\t{}:", end)?;
                    }

                    Some(else_branch) => {
                        let other = self.generator.fresh_label("else");
                        let end = self.generator.fresh_label("end");

                        emit!(self, "cbz", "x0, {}", other)?;
                        self.stmt(then_branch)?;
                        emit!(self, "b", "{}", end)?;
                        writeln!(self.out(), "\t{}:", other)?;
                        self.stmt(else_branch)?;
                        writeln!(self.out(), "\t{}:", end)?;
                    }
                }

                Ok(())
            }

            Statement::While { condition, body } => {
                let head = self.generator.fresh_label("loop");
                let end = self.generator.fresh_label("end");

                writeln!(self.out(), "\t{}:", head)?;
                self.expr(condition)?;
                emit!(self, "cbz", "x0, {}", end)?;
                self.stmt(body)?;
                emit!(self, "b", "{}", head)?;
                writeln!(self.out(), "\t{}:", end)?;

                Ok(())
            }

            Statement::Return(value) => {
                if *value != Expr::Void {
                    self.expr(value)?;
                }

                let ret = ret_label(&self.function.name);
                emit!(self, "b", "{}", ret)?;
                Ok(())
            }

            Statement::Expr(expr) => self.expr(expr),
        }
    }

    /// Evalúa una expresión dejando el resultado en x0.
    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Number(value) => {
                emit!(self, "mov", "x0, #{}", value)?;
                Ok(())
            }

            Expr::Variable(name) => {
                let offset = self
                    .lookup_slot(name)
                    .ok_or_else(|| CompileError::UnresolvedVariable(name.clone()))?;

                let address = self.slot_address(offset);
                emit!(self, "ldr", "x0, {}", address)?;

                Ok(())
            }

            Expr::Unary {
                op: UnOp::AddressOf,
                operand,
            } => {
                let name = match operand.as_ref() {
                    Expr::Variable(name) => name.clone(),
                    _ => unreachable!("parser guarantees a plain variable"),
                };

                let offset = self
                    .lookup_slot(&name)
                    .ok_or(CompileError::UnresolvedVariable(name))?;

                if self.frame_relative {
                    emit!(self, "sub", "x0, x29, #{}", -offset)?;
                } else {
                    let depth = offset + self.pushed;
                    emit!(self, "add", "x0, sp, #{}", depth)?;
                }

                Ok(())
            }

            Expr::Unary {
                op: UnOp::Deref,
                operand,
            } => {
                self.expr(operand)?;
                emit!(self, "ldr", "x0, [x0]")?;

                Ok(())
            }

            Expr::Binary { op, left, right } => self.binary(*op, left, right),

            Expr::Call { callee, arguments } => self.call(callee, arguments),

            Expr::Void => Ok(()),
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.expr(left)?;

        match self.pool.take() {
            Some(left_reg) => {
                emit!(self, "mov", "{}, x0", left_reg)?;
                self.expr(right)?;

                match self.pool.take() {
                    Some(right_reg) => {
                        emit!(self, "mov", "{}, x0", right_reg)?;
                        self.combine(op, &left_reg.to_string(), &right_reg.to_string())?;
                        self.pool.release(right_reg);
                    }

                    None => self.combine(op, &left_reg.to_string(), "x0")?,
                }

                self.pool.release(left_reg);
            }

            // Válvula de escape: reserva agotada, se evalúa por pila
            None => {
                self.push_acc()?;
                self.expr(right)?;
                self.pop_into("x1")?;
                self.combine(op, "x1", "x0")?;
            }
        }

        Ok(())
    }

    fn combine(&mut self, op: BinOp, left: &str, right: &str) -> Result<(), CompileError> {
        match op {
            BinOp::Add => emit!(self, "add", "x0, {}, {}", left, right)?,
            BinOp::Sub => emit!(self, "sub", "x0, {}, {}", left, right)?,
            BinOp::Mul => emit!(self, "mul", "x0, {}, {}", left, right)?,
            BinOp::Div => emit!(self, "sdiv", "x0, {}, {}", left, right)?,

            BinOp::Less => {
                emit!(self, "cmp", "{}, {}", left, right)?;
                emit!(self, "cset", "x0, lt")?;
            }

            BinOp::Greater => {
                emit!(self, "cmp", "{}, {}", left, right)?;
                emit!(self, "cset", "x0, gt")?;
            }

            BinOp::Equal => {
                emit!(self, "cmp", "{}, {}", left, right)?;
                emit!(self, "cset", "x0, eq")?;
            }
        }

        Ok(())
    }

    fn call(&mut self, callee: &str, arguments: &[Expr]) -> Result<(), CompileError> {
        match callee {
            // Builtins con expansión fija, nunca llamadas ordinarias
            "printf" => return self.builtin_printf(arguments),
            "exit" => return self.builtin_exit(arguments),
            _ => {}
        }

        if arguments.len() > MAX_ARGS {
            return Err(CompileError::TooManyArguments(
                callee.to_owned(),
                MAX_ARGS,
            ));
        }

        match arguments {
            [] => {}
            [single] => self.expr(single)?,

            // Cada argumento se derrama a una ranura temporal para
            // no estropear los ya computados, y al final se cargan
            // todos en x0..x7
            arguments => {
                let mut staging = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    self.expr(argument)?;

                    let offset = self.define_temp();
                    let address = self.slot_address(offset);
                    emit!(self, "str", "x0, {}", address)?;
                    staging.push(offset);
                }

                for (index, offset) in staging.into_iter().enumerate() {
                    let address = self.slot_address(offset);
                    emit!(self, "ldr", "x{}, {}", index, address)?;
                }
            }
        }

        emit!(self, "bl", "{}", symbol(callee))?;
        Ok(())
    }

    fn builtin_printf(&mut self, arguments: &[Expr]) -> Result<(), CompileError> {
        if arguments.len() != 1 {
            return Err(CompileError::TooManyArguments(String::from("printf"), 1));
        }

        self.expr(&arguments[0])?;

        // Convención variádica de Darwin: el argumento va en la pila
        self.push_acc()?;

        let label = self.generator.intern("%ld\n");
        emit!(self, "adrp", "x0, {}@PAGE", label)?;
        emit!(self, "add", "x0, x0, {}@PAGEOFF", label)?;
        emit!(self, "bl", "_printf")?;
        emit!(self, "add", "sp, sp, #16")?;
        self.pushed -= 16;

        Ok(())
    }

    fn builtin_exit(&mut self, arguments: &[Expr]) -> Result<(), CompileError> {
        if arguments.len() != 1 {
            return Err(CompileError::TooManyArguments(String::from("exit"), 1));
        }

        self.expr(&arguments[0])?;

        // Llamada directa al sistema, sin convención de llamada
        emit!(self, "mov", "x16, #1")?;
        emit!(self, "svc", "#0x80")?;

        Ok(())
    }

    fn push_acc(&mut self) -> Result<(), CompileError> {
        emit!(self, "str", "x0, [sp, #-16]!")?;
        self.pushed += 16;

        Ok(())
    }

    fn pop_into(&mut self, reg: &str) -> Result<(), CompileError> {
        emit!(self, "ldr", "{}, [sp], #16", reg)?;
        self.pushed -= 16;

        Ok(())
    }

    /// Asigna una ranura nueva; los offsets jamás se reutilizan
    /// dentro de una función.
    fn define_slot(&mut self, name: &str) -> i64 {
        let offset = self.next_offset;
        self.next_offset += if self.frame_relative { -8 } else { 8 };
        self.slots.insert(name.to_owned(), offset);

        offset
    }

    fn define_temp(&mut self) -> i64 {
        let name = format!("$t{}", self.temps);
        self.temps += 1;

        self.define_slot(&name)
    }

    fn lookup_slot(&self, name: &str) -> Option<i64> {
        self.slots.get(name).copied()
    }

    fn slot_address(&self, offset: i64) -> String {
        if self.frame_relative {
            format!("[x29, #{}]", offset)
        } else {
            format!("[sp, #{}]", offset + self.pushed)
        }
    }
}

fn symbol(name: &str) -> String {
    format!("_{}", name)
}

fn ret_label(name: &str) -> String {
    format!("Lret_{}", name)
}
