use clap::Parser;

use crate::crypto::Keypair;

#[derive(Debug, Clone, Parser)]
pub struct GenerateKeypairCmd {
    /// Derive the key from a seed instead of the system rng.
    #[clap(long)]
    seed: Option<String>,
}

impl GenerateKeypairCmd {
    pub fn execute(self) {
        let keypair = Keypair::generate(self.seed.map(String::into_bytes));
        println!("Private key: {:>5}", keypair.to_base58());
        println!("Public  key: {:>5}", keypair.public_key());
    }
}
