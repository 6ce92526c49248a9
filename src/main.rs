use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "ravel", version, about = "A module-linking bytecode virtual machine")]
struct Cli {
    /// Root directory of the module tree to link and run.
    #[arg(default_value = "sample_project")]
    root: PathBuf,

    /// Write the sample project to the root path before running it.
    #[arg(long)]
    write_sample: bool,

    /// Report how long execution took, in microseconds.
    #[arg(long)]
    time: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.write_sample {
        if let Err(err) = ravel::sample::write_sample(&cli.root) {
            eprintln!("error: failed to write sample project: {err}");
            return ExitCode::FAILURE;
        }
    }

    match ravel::run(&cli.root) {
        Ok(report) => {
            if cli.time {
                println!("Time elapsed : {} us", report.elapsed.as_micros());
            }
            println!("Program exited with code {}", report.code);
            ExitCode::from(report.code as u8)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
