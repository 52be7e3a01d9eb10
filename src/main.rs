use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::debug;
use mincc::Session;

/// Compile a tiny C-like program into x86-64 assembly.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
  /// Full program text
  source: String,

  /// Write the listing to FILE instead of stdout
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,
}

fn main() {
  env_logger::init();
  let args = Args::parse();

  let mut session = Session::new(&args.source);
  let asm = match session.compile() {
    Ok(asm) => asm,
    Err(err) => {
      eprintln!("{}", err.render(session.source()));
      process::exit(1);
    }
  };

  let written = match &args.output {
    Some(path) => {
      debug!("writing {} bytes to {}", asm.len(), path.display());
      fs::write(path, &asm)
    }
    None => io::stdout().lock().write_all(asm.as_bytes()),
  };

  if let Err(err) = written {
    eprintln!("failed to write assembly: {err}");
    process::exit(1);
  }
}
