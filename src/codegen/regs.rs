//! Reserva de registros de trabajo.
//!
//! No hay asignación general de registros: el generador usa una
//! reserva fija de ocho registros preservados por el llamado
//! (`x19`–`x26`), administrada como lista libre con toma y
//! liberación explícitas. Agotar la reserva no es un error: el
//! generador cae a la estrategia de evaluación por pila.

use std::fmt;

/// Registro de trabajo del generador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reg(u8);

impl Reg {
    /// Registros de la reserva, en orden de preferencia. Todos son
    /// callee-saved en AAPCS64, por lo cual sobreviven a un `bl` y
    /// el prólogo de cada función los respalda.
    pub const FILE: [Reg; 8] = [
        Reg(19),
        Reg(20),
        Reg(21),
        Reg(22),
        Reg(23),
        Reg(24),
        Reg(25),
        Reg(26),
    ];
}

impl fmt::Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Reg(number) = self;
        write!(formatter, "x{}", number)
    }
}

/// Lista libre de registros de trabajo.
pub struct Pool {
    free: Vec<Reg>,
}

impl Pool {
    pub fn new() -> Self {
        let mut free = Reg::FILE.to_vec();
        free.reverse();

        Pool { free }
    }

    /// Toma un registro, o `None` si la reserva está agotada.
    pub fn take(&mut self) -> Option<Reg> {
        self.free.pop()
    }

    pub fn release(&mut self, reg: Reg) {
        debug_assert!(!self.free.contains(&reg), "double release of {}", reg);
        self.free.push(reg);
    }
}
