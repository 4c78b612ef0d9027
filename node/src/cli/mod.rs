use clap::Parser;

mod crypto;
pub mod init;
pub mod simulate;

#[derive(Parser, Debug, Clone)]
#[command()]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::InitCmd),
    Simulate(simulate::SimulateCmd),
    GenerateKeypair(crypto::GenerateKeypairCmd),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Init(cmd) => cmd.execute(),
            Subcommand::Simulate(cmd) => cmd.execute().await,
            Subcommand::GenerateKeypair(cmd) => {
                cmd.execute();
                Ok(())
            }
        }
    }
}
