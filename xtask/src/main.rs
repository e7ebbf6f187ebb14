use anyhow::Result;
use clap::{Parser, Subcommand};
use dfu_core::EngineConfig;
use std::path::PathBuf;
use std::process::Command;

/// Size of the generated demo image.
const DEMO_IMAGE_SIZE: usize = 1000;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Write the default engine configuration
    Config {
        #[arg(default_value = "dfu.toml")]
        path: PathBuf,
    },
    /// Download an image through the loopback simulator
    Simulate {
        /// Image to download; a generated demo image when absent
        image: Option<PathBuf>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

/// A small image whose vector table points into itself.
fn demo_image() -> Result<PathBuf> {
    let dir = PathBuf::from("target").join("xtask");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("demo.bin");

    let mut image: Vec<u8> = (0..DEMO_IMAGE_SIZE).map(|i| (i * 7) as u8).collect();
    image[..4].copy_from_slice(&0x2000_8000u32.to_le_bytes());
    image[4..8].copy_from_slice(&0x0000_8101u32.to_le_bytes());
    std::fs::write(&path, image)?;
    Ok(path)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Config { path } => {
            EngineConfig::default().save_to_file(path)?;
            println!("Wrote {}", path.display());
        }
        Commands::Simulate { image } => {
            let image = match image {
                Some(path) => path.clone(),
                None => demo_image()?,
            };
            println!("Simulating download of {}...", image.display());
            let image = image.to_string_lossy();
            cargo(
                &["run", "-p", "dfu-cli", "--", "--image", &image, "--switch"],
                "Simulation",
            )?;
        }
    }

    Ok(())
}
