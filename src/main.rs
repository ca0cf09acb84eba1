
extern crate clap;
#[macro_use] extern crate log;
extern crate fern;
extern crate chrono;
extern crate term_grid;
extern crate thiserror;

pub mod interpreter;

use clap::{Arg, ArgMatches, App};
use term_grid::{Grid, GridOptions, Direction, Filling, Cell};

use std::fs;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use crate::interpreter::errors::RunError;
use crate::interpreter::lexer;
use crate::interpreter::program::Program;
use crate::interpreter::vm::{Status, Vm};

fn main() {
    let args = process_arguments();
    initialize_logging(args.occurrences_of("verbose"));

    debug!("Arguments:\n\tVerbosity: {}\n\tDebug: {}\n\tStep: {}\n\tInfile: {}",
        args.occurrences_of("verbose"),
        args.is_present("debug"),
        args.is_present("step"),
        args.value_of("INPUT").unwrap()
    );

    let ifile = args.value_of("INPUT").unwrap();
    let source = match fs::read_to_string(ifile) {
        Err(err) => {
            error!("fatal: unable to open input file `{}`: {}", ifile, err);
            std::process::exit(1);
        },
        Ok(source) => source,
    };

    let program = match Program::link(lexer::tokenize(&source)) {
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1);
        },
        Ok(program) => program,
    };

    let delay = match args.value_of("delay").unwrap_or("0.3").parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Duration::from_secs_f64(seconds),
        _ => {
            error!("fatal: invalid delay value");
            std::process::exit(1);
        },
    };

    let step_mode = args.is_present("step");
    let visualized = step_mode || args.is_present("debug");
    let mut vm = Vm::new(program);

    let result = if visualized {
        run_visualized(&mut vm, step_mode, delay)
    } else {
        vm.run()
    };

    match result {
        // The visualized runner already shows the output on its final
        // state screen.
        Ok(()) if !visualized => print!("{}", vm.output()),
        Ok(()) => {},
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1);
        },
    }
}

/// Steps the machine one instruction at a time, rendering its state
/// between steps. Step mode waits for Enter; debug mode sleeps for the
/// configured delay. Only ever reads the machine's public state.
fn run_visualized(vm: &mut Vm, step_mode: bool, delay: Duration) -> Result<(), RunError> {
    let mut history: Vec<String> = Vec::new();
    let mut steps = 0usize;

    loop {
        steps += 1;
        if let Some(instruction) = vm.program().fetch(vm.pc()) {
            history.push(format!("Step {:04}: {}", steps, instruction));
        }
        render(vm, steps, &history);

        if step_mode {
            prompt_enter("Press Enter to continue...");
        } else {
            thread::sleep(delay);
        }

        match vm.step()? {
            Status::Running => {},
            Status::Halted => break,
        }
    }

    render_final(vm, steps);
    if step_mode {
        prompt_enter("Press Enter to exit...");
    }
    Ok(())
}

fn render(vm: &Vm, steps: usize, history: &[String]) {
    clear_screen();
    println!("=== iasm - step {} ===", steps);
    println!("program counter: {}", vm.pc());

    println!("\nProgram context:");
    let first = vm.pc().saturating_sub(5);
    let last = (vm.pc() + 6).min(vm.program().len());
    for index in first..last {
        if let Some(instruction) = vm.program().fetch(index) {
            let marker = if index == vm.pc() { "->" } else { "  " };
            println!("{} {:04}: {}", marker, index, instruction);
        }
    }

    println!("\nRegisters:");
    if vm.registers().is_empty() {
        println!("  (none written yet)");
    } else {
        print!("{}", register_grid(vm));
    }

    println!("\nMemory:");
    if vm.memory().is_empty() {
        println!("  (empty)");
    } else {
        let mut cells: Vec<(&i64, &i64)> = vm.memory().iter().collect();
        cells.sort();
        for (address, value) in cells.iter().take(10) {
            println!("  {}: {}", address, value);
        }
        if cells.len() > 10 {
            println!("  ... and {} more", cells.len() - 10);
        }
    }

    println!("\nCall stack:");
    if vm.call_stack().is_empty() {
        println!("  (empty)");
    } else {
        for (depth, site) in vm.call_stack().iter().enumerate() {
            println!("  {}: instruction {}", depth, site);
        }
    }

    let (a, b) = vm.compare();
    println!("\nCompare pair: ({}, {})", a, b);

    if !history.is_empty() {
        println!("\nRecent steps:");
        for entry in history.iter().rev().take(5).rev() {
            println!("  {}", entry);
        }
    }

    if !vm.output().is_empty() {
        println!("\nOutput so far:");
        print!("{}", vm.output());
    }
}

fn render_final(vm: &Vm, steps: usize) {
    clear_screen();
    println!("=== iasm - execution complete in {} step(s) ===", steps);

    println!("\nFinal registers:");
    if vm.registers().is_empty() {
        println!("  (none written)");
    } else {
        print!("{}", register_grid(vm));
    }

    println!("\nFinal output:");
    print!("{}", vm.output());
}

fn register_grid(vm: &Vm) -> String {
    let mut grid = Grid::new(GridOptions {
        filling:     Filling::Spaces(1),
        direction:   Direction::LeftToRight,
    });

    let mut names: Vec<&String> = vm.registers().keys().collect();
    names.sort();
    for name in names {
        grid.add(Cell::from(format!("  {}:", name)));
        grid.add(Cell::from(vm.registers()[name].to_string()));
    }

    grid.fit_into_columns(8).to_string()
}

fn prompt_enter(message: &str) {
    print!("{}", message);
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
}

fn clear_screen() {
    print!("\x1B[2J\x1B[1;1H");
}

fn process_arguments() -> ArgMatches<'static> {
    App::new(option_env!("CARGO_PKG_NAME").unwrap())
        .version(option_env!("CARGO_PKG_VERSION").unwrap())
        .about(option_env!("CARGO_PKG_DESCRIPTION").unwrap())
        .arg(Arg::with_name("INPUT")
            .help("Sets the input file to use")
            .required(true)
            .multiple(false)
            .index(1))
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .takes_value(false)
            .help("Sets the level of verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .takes_value(false)
            .help("render the machine state between steps"))
        .arg(Arg::with_name("step")
            .short("s")
            .long("step")
            .takes_value(false)
            .help("pause for Enter after each rendered step"))
        .arg(Arg::with_name("delay")
            .long("delay")
            .takes_value(true)
            .help("seconds between steps in debug mode (default 0.3)"))
        .get_matches()
}

fn initialize_logging(verbosity: u64) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(match verbosity {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .chain(std::io::stdout())
        .apply().ok();
}
