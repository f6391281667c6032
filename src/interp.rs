//! Intérprete a nivel de instrucción.
//!
//! Re-ejecuta el ensamblador emitido por [`crate::codegen`] (o
//! texto escrito a mano en el mismo dialecto) como oráculo
//! semántico independiente. El modelo es deliberadamente simple:
//!
//! - Los registros son un mapa nombre→valor de 64 bits.
//! - La memoria es un mapa disperso dirección→valor, suficiente
//!   porque el código generado solo accede ranuras alineadas de
//!   8 bytes que él mismo reservó.
//! - `cmp` no modela un registro de banderas completo: guarda la
//!   diferencia con signo de sus operandos, y cada salto o `cset`
//!   condicional deriva su resultado del signo de esa diferencia.
//!   Esto no modela acarreo ni desborde sin signo, aceptable solo
//!   porque el código generado nunca depende de ellos.
//! - Las llamadas apilan el índice de retorno en una pila de
//!   llamadas explícita; `ret` con la pila vacía detiene la
//!   ejecución.
//!
//! Un contador acota el total de instrucciones ejecutadas, de modo
//! que un ciclo infinito en el programa compilado se reporta como
//! timeout y no cuelga al intérprete. Los mnemónicos no
//! reconocidos son no-ops que avanzan el contador de programa:
//! lenidad intencional para tolerar pseudo-instrucciones tipo
//! directiva.

use std::collections::HashMap;

/// Tope de instrucciones ejecutadas por corrida.
pub const STEP_LIMIT: u64 = 1_000_000;

const STACK_TOP: i64 = 0x7fff_fff0;
const STRING_BASE: i64 = 0x1000_0000;

/// Desenlace de una ejecución. Los fallos en tiempo de ejecución se
/// reportan aquí, nunca como `Err`, para que un arnés de pruebas
/// pueda afirmar sobre `success` y la salida parcial capturada.
#[derive(Debug)]
pub struct RunResult {
    pub success: bool,

    /// Concatenación de todo lo impreso por `printf`.
    pub output: String,

    /// Valor final del acumulador, interpretado como código de
    /// salida del programa.
    pub exit_code: i64,

    pub steps: u64,

    pub error: Option<String>,
}

#[derive(Debug, Clone)]
enum Operand {
    Reg(String),
    Imm(i64),
}

#[derive(Debug, Clone)]
enum Address {
    /// `[base, #off]`
    Offset(String, i64),

    /// `[base, #off]!`
    PreIndex(String, i64),

    /// `[base], #off`
    PostIndex(String, i64),
}

#[derive(Debug, Clone)]
enum Instr {
    Mov(String, Operand),
    Add(String, String, Operand),
    Sub(String, String, Operand),
    Mul(String, String, Operand),
    Sdiv(String, String, Operand),
    Cmp(String, Operand),
    Cset(String, String),
    B(String),
    BCond(String, String),
    Cbz(String, String),
    Cbnz(String, String),
    Bl(String),
    Ret,
    Svc,
    Ldr(String, Address),
    Str(String, Address),
    Ldp(String, String, Address),
    Stp(String, String, Address),
    Adrp(String, String),
    AddPageOff(String, String, String),

    /// Cualquier otra cosa; avanza el pc sin efecto.
    Nop,
}

struct Listing {
    instructions: Vec<Instr>,
    labels: HashMap<String, usize>,

    /// Literal `.asciz` declarado justo después de una etiqueta.
    strings: HashMap<String, String>,
}

/// Ejecuta un listado de ensamblador desde `_main`.
pub fn run(assembly: &str) -> RunResult {
    let listing = parse(assembly);

    let entry = match listing.labels.get("_main") {
        Some(&entry) => entry,
        None => {
            return RunResult {
                success: false,
                output: String::new(),
                exit_code: 0,
                steps: 0,
                error: Some(String::from("entry label `_main` not found")),
            }
        }
    };

    Machine::new(&listing).execute(entry)
}

fn parse(assembly: &str) -> Listing {
    let mut listing = Listing {
        instructions: Vec::new(),
        labels: HashMap::new(),
        strings: HashMap::new(),
    };

    let mut pending_label: Option<String> = None;

    for line in assembly.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(label) = line.strip_suffix(':') {
            listing
                .labels
                .insert(label.to_owned(), listing.instructions.len());
            pending_label = Some(label.to_owned());
            continue;
        }

        if let Some(rest) = line.strip_prefix(".asciz") {
            if let Some(label) = pending_label.take() {
                listing.strings.insert(label, unquote(rest.trim()));
            }

            continue;
        }

        pending_label = None;

        if line.starts_with('.') {
            // Directivas: irrelevantes para la ejecución
            continue;
        }

        listing.instructions.push(decode(line));
    }

    listing
}

fn strip_comment(line: &str) -> &str {
    let cut = line.find("//").map_or(line.len(), |at| at);
    let cut = line[..cut].find(';').map_or(cut, |at| at);

    &line[..cut]
}

fn unquote(text: &str) -> String {
    let inner = text.trim_matches('"');
    inner
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn decode(line: &str) -> Instr {
    let (mnemonic, rest) = match line.find(char::is_whitespace) {
        Some(at) => (&line[..at], line[at..].trim()),
        None => (line, ""),
    };

    let operands = split_operands(rest);
    let reg = |index: usize| operands[index].clone();

    match (mnemonic, operands.len()) {
        ("mov", 2) => Instr::Mov(reg(0), operand(&operands[1])),
        ("add", 3) if operands[2].ends_with("@PAGEOFF") => {
            let symbol = operands[2].trim_end_matches("@PAGEOFF").to_owned();
            Instr::AddPageOff(reg(0), reg(1), symbol)
        }

        ("add", 3) => Instr::Add(reg(0), reg(1), operand(&operands[2])),
        ("sub", 3) => Instr::Sub(reg(0), reg(1), operand(&operands[2])),
        ("mul", 3) => Instr::Mul(reg(0), reg(1), operand(&operands[2])),
        ("sdiv", 3) => Instr::Sdiv(reg(0), reg(1), operand(&operands[2])),
        ("cmp", 2) => Instr::Cmp(reg(0), operand(&operands[1])),
        ("cset", 2) => Instr::Cset(reg(0), reg(1)),
        ("b", 1) => Instr::B(reg(0)),
        ("cbz", 2) => Instr::Cbz(reg(0), reg(1)),
        ("cbnz", 2) => Instr::Cbnz(reg(0), reg(1)),
        ("bl", 1) => Instr::Bl(reg(0)),
        ("ret", _) => Instr::Ret,
        ("svc", _) => Instr::Svc,
        ("adrp", 2) => {
            let symbol = operands[1].trim_end_matches("@PAGE").to_owned();
            Instr::Adrp(reg(0), symbol)
        }

        ("ldr", 2..=3) => match address(&operands[1..]) {
            Some(address) => Instr::Ldr(reg(0), address),
            None => Instr::Nop,
        },

        ("str", 2..=3) => match address(&operands[1..]) {
            Some(address) => Instr::Str(reg(0), address),
            None => Instr::Nop,
        },

        ("ldp", 3..=4) => match address(&operands[2..]) {
            Some(address) => Instr::Ldp(reg(0), reg(1), address),
            None => Instr::Nop,
        },

        ("stp", 3..=4) => match address(&operands[2..]) {
            Some(address) => Instr::Stp(reg(0), reg(1), address),
            None => Instr::Nop,
        },

        (mnemonic, 1) if mnemonic.starts_with("b.") => {
            Instr::BCond(mnemonic[2..].to_owned(), reg(0))
        }

        // Lenidad intencional ante lo no modelado
        _ => Instr::Nop,
    }
}

/// Separa operandos por comas de nivel superior, respetando
/// corchetes de direccionamiento.
fn split_operands(rest: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in rest.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }

            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }

            ',' if depth == 0 => {
                operands.push(current.trim().to_owned());
                current = String::new();
            }

            c => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        operands.push(current.trim().to_owned());
    }

    operands
}

fn operand(text: &str) -> Operand {
    match immediate(text) {
        Some(value) => Operand::Imm(value),
        None => Operand::Reg(text.to_owned()),
    }
}

fn immediate(text: &str) -> Option<i64> {
    let text = text.strip_prefix('#')?;
    if let Some(hex) = text.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = text.strip_prefix("-0x") {
        i64::from_str_radix(hex, 16).ok().map(|value| -value)
    } else {
        text.parse().ok()
    }
}

/// Reconoce los modos de direccionamiento emitidos por el
/// generador: `[base]`, `[base, #off]`, `[base, #off]!` y
/// `[base], #off`.
fn address(operands: &[String]) -> Option<Address> {
    match operands {
        [single] => {
            if let Some(inner) = single.strip_suffix('!') {
                let (base, offset) = base_offset(inner)?;
                Some(Address::PreIndex(base, offset))
            } else {
                let (base, offset) = base_offset(single)?;
                Some(Address::Offset(base, offset))
            }
        }

        [bracket, post] => {
            let inner = bracket.strip_prefix('[')?.strip_suffix(']')?;
            let offset = immediate(post)?;
            Some(Address::PostIndex(inner.trim().to_owned(), offset))
        }

        _ => None,
    }
}

fn base_offset(bracketed: &str) -> Option<(String, i64)> {
    let inner = bracketed.strip_prefix('[')?.strip_suffix(']')?;
    match inner.split_once(',') {
        Some((base, offset)) => {
            Some((base.trim().to_owned(), immediate(offset.trim())?))
        }

        None => Some((inner.trim().to_owned(), 0)),
    }
}

struct Machine<'a> {
    listing: &'a Listing,
    regs: HashMap<String, i64>,
    memory: HashMap<i64, i64>,
    call_stack: Vec<usize>,

    /// Diferencia con signo de la última comparación.
    compare: i64,

    /// Direcciones sintéticas asignadas a los literales de cadena.
    string_addresses: HashMap<i64, String>,

    output: String,
    steps: u64,
}

impl<'a> Machine<'a> {
    fn new(listing: &'a Listing) -> Self {
        let mut regs = HashMap::new();
        regs.insert(String::from("sp"), STACK_TOP);
        regs.insert(String::from("x29"), STACK_TOP);

        // Cada etiqueta con literal recibe una dirección sintética
        let mut string_addresses = HashMap::new();
        let mut ordered = listing.strings.keys().collect::<Vec<_>>();
        ordered.sort();

        for (index, label) in ordered.into_iter().enumerate() {
            string_addresses.insert(STRING_BASE + 16 * index as i64, label.clone());
        }

        Machine {
            listing,
            regs,
            memory: HashMap::new(),
            call_stack: Vec::new(),
            compare: 0,
            string_addresses,
            output: String::new(),
            steps: 0,
        }
    }

    fn execute(mut self, entry: usize) -> RunResult {
        let mut pc = entry;

        loop {
            if self.steps >= STEP_LIMIT {
                return self.fail(format!(
                    "execution timed out after {} steps",
                    STEP_LIMIT
                ));
            }

            let instruction = match self.listing.instructions.get(pc) {
                Some(instruction) => instruction.clone(),
                None => return self.finish(),
            };

            self.steps += 1;
            pc += 1;

            match instruction {
                Instr::Mov(dst, src) => {
                    let value = self.value(&src);
                    self.set(&dst, value);
                }

                Instr::Add(dst, a, b) => {
                    let value = self.get(&a).wrapping_add(self.value(&b));
                    self.set(&dst, value);
                }

                Instr::Sub(dst, a, b) => {
                    let value = self.get(&a).wrapping_sub(self.value(&b));
                    self.set(&dst, value);
                }

                Instr::Mul(dst, a, b) => {
                    let value = self.get(&a).wrapping_mul(self.value(&b));
                    self.set(&dst, value);
                }

                Instr::Sdiv(dst, a, b) => {
                    let divisor = self.value(&b);

                    // sdiv con divisor cero produce cero en AArch64
                    let value = if divisor == 0 {
                        0
                    } else {
                        self.get(&a).wrapping_div(divisor)
                    };

                    self.set(&dst, value);
                }

                Instr::Cmp(a, b) => {
                    self.compare = self.get(&a).wrapping_sub(self.value(&b));
                }

                Instr::Cset(dst, condition) => match self.condition(&condition) {
                    Some(holds) => self.set(&dst, holds as i64),
                    None => {
                        return self.fail(format!("unknown condition code `{}`", condition))
                    }
                },

                Instr::B(label) => match self.listing.labels.get(&label) {
                    Some(&target) => pc = target,
                    None => return self.fail(format!("unknown label `{}`", label)),
                },

                Instr::BCond(condition, label) => match self.condition(&condition) {
                    Some(true) => match self.listing.labels.get(&label) {
                        Some(&target) => pc = target,
                        None => return self.fail(format!("unknown label `{}`", label)),
                    },

                    Some(false) => {}
                    None => {
                        return self.fail(format!("unknown condition code `{}`", condition))
                    }
                },

                Instr::Cbz(reg, label) => {
                    if self.get(&reg) == 0 {
                        match self.listing.labels.get(&label) {
                            Some(&target) => pc = target,
                            None => return self.fail(format!("unknown label `{}`", label)),
                        }
                    }
                }

                Instr::Cbnz(reg, label) => {
                    if self.get(&reg) != 0 {
                        match self.listing.labels.get(&label) {
                            Some(&target) => pc = target,
                            None => return self.fail(format!("unknown label `{}`", label)),
                        }
                    }
                }

                Instr::Bl(symbol) => {
                    if symbol == "_printf" {
                        if let Some(error) = self.printf() {
                            return self.fail(error);
                        }
                    } else {
                        match self.listing.labels.get(&symbol) {
                            Some(&target) => {
                                self.call_stack.push(pc);
                                pc = target;
                            }

                            None => {
                                return self
                                    .fail(format!("call to undefined symbol `{}`", symbol))
                            }
                        }
                    }
                }

                Instr::Ret => match self.call_stack.pop() {
                    Some(resume) => pc = resume,
                    None => return self.finish(),
                },

                Instr::Svc => {
                    // Única syscall reconocida: exit
                    if self.get("x16") == 1 {
                        return self.finish();
                    }
                }

                Instr::Ldr(dst, address) => {
                    let location = self.resolve(&address);
                    let value = self.memory.get(&location).copied().unwrap_or(0);
                    self.set(&dst, value);
                }

                Instr::Str(src, address) => {
                    let location = self.resolve(&address);
                    let value = self.get(&src);
                    self.memory.insert(location, value);
                }

                Instr::Ldp(a, b, address) => {
                    let location = self.resolve(&address);
                    let first = self.memory.get(&location).copied().unwrap_or(0);
                    let second = self.memory.get(&(location + 8)).copied().unwrap_or(0);
                    self.set(&a, first);
                    self.set(&b, second);
                }

                Instr::Stp(a, b, address) => {
                    let location = self.resolve(&address);
                    let first = self.get(&a);
                    let second = self.get(&b);
                    self.memory.insert(location, first);
                    self.memory.insert(location + 8, second);
                }

                Instr::Adrp(dst, symbol) => {
                    let address = self
                        .string_addresses
                        .iter()
                        .find(|(_, label)| **label == symbol)
                        .map(|(&address, _)| address)
                        .unwrap_or(0);

                    self.set(&dst, address);
                }

                Instr::AddPageOff(dst, src, _symbol) => {
                    // adrp ya cargó la dirección sintética completa
                    let value = self.get(&src);
                    self.set(&dst, value);
                }

                Instr::Nop => {}
            }
        }
    }

    /// Convención variádica modelada: formato en x0, argumento en
    /// el tope de la pila.
    fn printf(&mut self) -> Option<String> {
        let format_address = self.get("x0");
        let label = match self.string_addresses.get(&format_address) {
            Some(label) => label,
            None => return Some(String::from("printf format is not a string literal")),
        };

        let text = match self.listing.strings.get(label) {
            Some(text) => text.clone(),
            None => return Some(format!("missing string for label `{}`", label)),
        };

        let argument = {
            let sp = self.get("sp");
            self.memory.get(&sp).copied().unwrap_or(0)
        };

        let formatted = text.replace("%ld", &argument.to_string());
        self.set("x0", formatted.len() as i64);
        self.output.push_str(&formatted);

        None
    }

    fn condition(&self, code: &str) -> Option<bool> {
        match code {
            "eq" => Some(self.compare == 0),
            "ne" => Some(self.compare != 0),
            "lt" => Some(self.compare < 0),
            "gt" => Some(self.compare > 0),
            "le" => Some(self.compare <= 0),
            "ge" => Some(self.compare >= 0),
            _ => None,
        }
    }

    fn resolve(&mut self, address: &Address) -> i64 {
        match address {
            Address::Offset(base, offset) => self.get(base) + offset,

            Address::PreIndex(base, offset) => {
                let location = self.get(base) + offset;
                self.set(base, location);
                location
            }

            Address::PostIndex(base, offset) => {
                let location = self.get(base);
                self.set(base, location + offset);
                location
            }
        }
    }

    fn value(&self, operand: &Operand) -> i64 {
        match operand {
            Operand::Imm(value) => *value,
            Operand::Reg(name) => self.get(name),
        }
    }

    fn get(&self, name: &str) -> i64 {
        self.regs.get(name).copied().unwrap_or(0)
    }

    fn set(&mut self, name: &str, value: i64) {
        self.regs.insert(name.to_owned(), value);
    }

    fn finish(self) -> RunResult {
        RunResult {
            success: true,
            exit_code: self.get("x0"),
            output: self.output,
            steps: self.steps,
            error: None,
        }
    }

    fn fail(self, error: String) -> RunResult {
        log::debug!("execution failed: {}", error);

        RunResult {
            success: false,
            exit_code: self.get("x0"),
            output: self.output,
            steps: self.steps,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_handwritten_assembly() {
        let result = run(
            "_main:\n\
             \tmov     x0, #7\n\
             \tmov     x1, #5\n\
             \tadd     x0, x0, x1\n\
             \tret\n",
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 12);
        assert_eq!(result.steps, 4);
    }

    #[test]
    fn missing_entry_label_fails() {
        let result = run(".text\n_f:\n\tret\n");

        assert!(!result.success);
        assert!(result.error.unwrap().contains("_main"));
    }

    #[test]
    fn comparison_drives_conditional_set() {
        let result = run(
            "_main:\n\
             \tmov     x1, #3\n\
             \tmov     x2, #9\n\
             \tcmp     x1, x2\n\
             \tcset    x0, lt\n\
             \tret\n",
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn unknown_condition_code_is_an_error() {
        let result = run(
            "_main:\n\
             \tcmp     x0, #0\n\
             \tcset    x0, hs\n\
             \tret\n",
        );

        assert!(!result.success);
        assert!(result.error.unwrap().contains("condition code"));
    }

    #[test]
    fn infinite_loop_times_out() {
        let result = run("_main:\n\tb       _main\n");

        assert!(!result.success);
        assert_eq!(result.steps, STEP_LIMIT);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn unrecognized_mnemonics_are_no_ops() {
        let result = run(
            "_main:\n\
             \tdmb     ish\n\
             \tmov     x0, #3\n\
             \tret\n",
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[test]
    fn svc_exit_halts_with_code() {
        let result = run(
            "_main:\n\
             \tmov     x0, #9\n\
             \tmov     x16, #1\n\
             \tsvc     #0x80\n\
             \tmov     x0, #1\n\
             \tret\n",
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 9);
    }

    #[test]
    fn printf_formats_the_stacked_argument() {
        let result = run(
            "_main:\n\
             \tmov     x0, #42\n\
             \tstr     x0, [sp, #-16]!\n\
             \tadrp    x0, l_.str.0@PAGE\n\
             \tadd     x0, x0, l_.str.0@PAGEOFF\n\
             \tbl      _printf\n\
             \tadd     sp, sp, #16\n\
             \tmov     x0, #0\n\
             \tret\n\
             .section __TEXT,__cstring,cstring_literals\n\
             l_.str.0:\n\
             \t.asciz \"%ld\\n\"\n\
             .subsections_via_symbols\n",
        );

        assert!(result.success);
        assert_eq!(result.output, "42\n");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn calls_push_and_ret_pops() {
        let result = run(
            "_main:\n\
             \tbl      _f\n\
             \tadd     x0, x0, #1\n\
             \tret\n\
             _f:\n\
             \tmov     x0, #10\n\
             \tret\n",
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 11);
    }
}
