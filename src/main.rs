//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg};
use minic::{codegen, interp, lex, opt, parse};

use std::fs;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parsing de CLI
    let args = clap::App::new("minic")
        .version(crate_version!())
        .arg(
            Arg::new("INPUT")
                .required(true)
                .value_name("FILE")
                .about("Source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .default_value("-")
                .value_name("FILE")
                .about("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("no-opt")
                .long("no-opt")
                .about("Skip the optimization pipeline"),
        )
        .arg(
            Arg::new("passes")
                .long("passes")
                .takes_value(true)
                .value_name("N")
                .about("Maximum number of optimization passes"),
        )
        .arg(
            Arg::new("run")
                .long("run")
                .about("Interpret the emitted assembly instead of writing it"),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .about("Print optimization statistics to stderr"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let input = args.value_of("INPUT").expect("INPUT is required");
    let output = args.value_of("output").expect("output has a default");

    let source = fs::read_to_string(input)
        .with_context(|| format!("Failed to read source file: {}", input))?;

    let lexemes = lex::lex(&source)
        .with_context(|| format!("Lexical analysis failed: {}", input))?;

    let program = parse::parse(lexemes)
        .with_context(|| format!("Syntax analysis failed: {}", input))?;

    let program = if args.is_present("no-opt") {
        program
    } else {
        let passes = match args.value_of("passes") {
            Some(passes) => Some(
                passes
                    .parse()
                    .with_context(|| format!("Bad pass count: {}", passes))?,
            ),

            None => None,
        };

        let (program, stats) = opt::optimize(&program, passes).context("Optimization failed")?;
        if args.is_present("stats") {
            eprintln!("{:#?}", stats);
        }

        program
    };

    let assembly = codegen::emit(&program).context("Code generation failed")?;

    if args.is_present("run") {
        let result = interp::run(&assembly);
        print!("{}", result.output);

        match result.error {
            Some(error) => bail!("Execution failed: {}", error),
            None => std::process::exit(result.exit_code as i32),
        }
    }

    match output {
        "-" => print!("{}", assembly),
        path => fs::write(path, &assembly)
            .with_context(|| format!("Failed to write output file: {}", path))?,
    }

    Ok(())
}
