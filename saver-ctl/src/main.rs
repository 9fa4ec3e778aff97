use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  let cmd = saver_ctl::CtlCommand::from_args(&args)?;
  saver_ctl::run(cmd).context("saver-ctl run")
}
