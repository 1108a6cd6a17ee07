use clap::Parser;
use loopp_gen::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = loopp_gen::generate(&cli)?;
    println!("{}", paths.proto.display());
    println!("{}", paths.rpc.display());
    println!("{}", paths.test.display());
    Ok(())
}
