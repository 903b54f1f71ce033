// Key generation CLI for agri-ledger nodes

use agri_ledger::crypto::keys::{generate_seed, signing_key_from_seed};
use agri_ledger::registry::generate_node_id;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Parser)]
#[command(name = "agri-keygen")]
#[command(about = "Generate identity and signing keys for an agri-ledger node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate NODE_ID and VALIDATOR_SEED_HEX and append them to an env file
    Init {
        /// Path to .env file (default: .env)
        #[arg(short, long, default_value = ".env")]
        env_file: String,
        /// Listen address the node id is derived from
        #[arg(long, default_value = "0.0.0.0:6001")]
        listen: String,
    },
    /// Generate a validator signing seed
    Validator {
        /// Print only the seed
        #[arg(short, long)]
        stdout: bool,
    },
    /// Print the public key for a seed
    Public {
        /// 32-byte seed, hex encoded
        seed_hex: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { env_file, listen } => init_env(&env_file, &listen)?,
        Commands::Validator { stdout } => generate_validator_key(stdout),
        Commands::Public { seed_hex } => print_public_key(&seed_hex)?,
    }

    Ok(())
}

fn init_env(env_file: &str, listen: &str) -> Result<()> {
    let env_path = Path::new(env_file);
    if env_path.exists() {
        let existing = fs::read_to_string(env_path).context("Failed to read env file")?;
        if existing.lines().any(|l| l.starts_with("VALIDATOR_SEED_HEX=")) {
            bail!("{} already contains VALIDATOR_SEED_HEX; refusing to overwrite", env_file);
        }
    }

    let (host, port) = match listen.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().context("invalid port in --listen")?),
        None => bail!("--listen must be host:port"),
    };
    let node_id = generate_node_id(host, port);
    let seed = generate_seed();
    let public = public_hex(&seed)?;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_path)
        .context("Failed to open env file")?;

    writeln!(file, "\n# Generated keys ({})", chrono::Utc::now())?;
    writeln!(file, "NODE_ID={}", node_id)?;
    writeln!(file, "P2P_LISTEN_ADDR={}", listen)?;
    writeln!(file, "VALIDATOR_SEED_HEX={}", hex::encode(seed))?;

    println!("Node id:    {}", node_id);
    println!("Public key: {}", public);
    println!("\nSaved to {}", env_file);
    println!("Never commit {} to version control", env_file);
    Ok(())
}

fn generate_validator_key(stdout: bool) {
    let seed = hex::encode(generate_seed());
    if stdout {
        println!("{}", seed);
    } else {
        println!("VALIDATOR_SEED_HEX={}", seed);
        println!("\nAdd this to your .env file");
    }
}

fn print_public_key(seed_hex: &str) -> Result<()> {
    let seed = hex::decode(seed_hex.trim()).context("seed is not hex")?;
    println!("{}", public_hex(&seed)?);
    Ok(())
}

fn public_hex(seed: &[u8]) -> Result<String> {
    let key = signing_key_from_seed(seed).context("seed must be exactly 32 bytes")?;
    Ok(hex::encode(key.verifying_key().to_bytes()))
}
