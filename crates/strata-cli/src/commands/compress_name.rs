use clap::Args;
use colored::Colorize;
use strata_core::{compress_name, NAMEDATALEN};

#[derive(Args)]
pub struct CompressNameCommand {
    /// Identifier to compress
    pub name: String,

    /// Maximum identifier length
    #[arg(long, default_value_t = NAMEDATALEN)]
    pub max: usize,
}

impl CompressNameCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        if self.max < 12 {
            anyhow::bail!("--max must be at least 12, got {}", self.max);
        }
        let compressed = compress_name(&self.name, self.max);
        if compressed == self.name {
            println!("{}", compressed);
        } else {
            println!("{}", compressed.bright_white().bold());
            println!(
                "{}",
                format!("({} -> {} chars)", self.name.chars().count(), compressed.chars().count()).dimmed()
            );
        }
        Ok(())
    }
}
