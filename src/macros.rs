macro_rules! emit {
    ($context:expr, $opcode:expr) => {
        writeln!($context.out(), "\t{}", $opcode)
    };

    ($context:expr, $opcode:expr, $($format:tt)*) => {{
        write!($context.out(), "\t{:7} ", $opcode)?;
        writeln!($context.out(), $($format)*)
    }};
}
