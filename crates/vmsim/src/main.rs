use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

mod console;
mod workload;

use console::Console;
use workload::Machine;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Runs virtual memory workloads against emulated memory")]
struct Args {
    /// Frames of emulated physical memory
    #[arg(long, global = true, default_value_t = 256)]
    frames: usize,

    /// First frame handed to the page allocator; frames below it belong to the kernel
    #[arg(long, global = true, default_value_t = 160)]
    floor: usize,

    /// Pages on the swap device, bitmap included (0 disables swapping)
    #[arg(long, global = true, default_value_t = 64)]
    swap_pages: usize,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run several processes from one executable and show how its pages are shared
    Share {
        /// Number of processes to start
        #[arg(short, long, default_value_t = 4)]
        processes: usize,
    },
    /// Fork a process and write to the shared pages from both sides
    Fork {
        /// Pages the parent dirties before forking
        #[arg(short, long, default_value_t = 16)]
        pages: usize,

        /// Number of children to fork
        #[arg(short, long, default_value_t = 2)]
        children: usize,
    },
    /// Touch more pages than fit in memory and read them all back
    Pressure {
        /// Pages to touch (defaults to free memory plus half the swap device)
        #[arg(short, long)]
        pages: Option<usize>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = Console::init(level) {
        eprintln!("failed to install logger: {err}");
        return ExitCode::FAILURE;
    }

    let result = Machine::new(args.frames, args.floor, args.swap_pages).and_then(|mut machine| {
        match args.command {
            Command::Share { processes } => machine.share(processes)?,
            Command::Fork { pages, children } => machine.fork(pages, children)?,
            Command::Pressure { pages } => machine.pressure(pages)?,
        }
        machine.report();
        machine.shutdown();
        Ok(())
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
