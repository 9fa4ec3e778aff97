use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  if args.iter().any(|a| a == "--help" || a == "-h") {
    println!("usage: saver-core [--console]");
    println!();
    println!("Watches the game's save folder and keeps timestamped backups.");
    println!("  --console   also log to stderr and accept commands on stdin");
    return Ok(());
  }

  saver_core::run(&args).context("run save saver")
}
