//! Capseal CLI — `capseal` command.
//!
//! Mint, inspect, attenuate and authorize capability tokens from the
//! command line. Tokens and third-party blocks are exchanged as base64
//! text; arguments that name an existing file are read from it.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use capseal::{
    Algorithm, AuthorizerBuilder, BlockBuilder, KeyPair, PrivateKey, PublicKey, RunLimits, Token,
    TokenBuilder, UnverifiedToken,
};

// ── Input helpers ─────────────────────────────────────────────────────────────

/// Accept a value either inline or as a path to a file holding it.
fn read_arg(value: &str) -> Result<String> {
    if Path::new(value).is_file() {
        let text = std::fs::read_to_string(value)
            .with_context(|| format!("failed to read {value}"))?;
        Ok(text.trim().to_string())
    } else {
        Ok(value.to_string())
    }
}

fn parse_algorithm(name: Option<&str>) -> Result<Algorithm> {
    match name {
        None => Ok(Algorithm::Ed25519),
        Some(name) => Algorithm::from_name(name)
            .map_err(|_| anyhow!("unknown algorithm '{name}' (expected ed25519 or secp256r1)")),
    }
}

fn load_private_key(value: &str) -> Result<PrivateKey> {
    let text = read_arg(value)?;
    if text.contains("-----BEGIN") {
        return PrivateKey::from_pem(&text).context("failed to parse private key PEM");
    }
    PrivateKey::from_hex(&text).context("failed to parse private key")
}

fn load_public_key(value: &str) -> Result<PublicKey> {
    let text = read_arg(value)?;
    if text.contains("-----BEGIN") {
        return PublicKey::from_pem(&text).context("failed to parse public key PEM");
    }
    PublicKey::from_hex(&text).context("failed to parse public key")
}

fn load_token(value: &str, root: &str) -> Result<Token> {
    let text = read_arg(value)?;
    let key = load_public_key(root)?;
    Token::from_base64(&text, key).context("token verification failed")
}

// ── CLI structure ─────────────────────────────────────────────────────────────

/// Capseal CLI — mint, inspect, attenuate and authorize capability
/// tokens.
#[derive(Parser, Debug)]
#[command(
    name = "capseal",
    about = "Capseal CLI",
    version,
    long_about = "capseal — capability token CLI\n\nMint tokens from datalog source, attenuate them offline,\nand authorize requests against them."
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a root key pair
    Keygen {
        /// Signature algorithm (ed25519 or secp256r1)
        #[arg(long)]
        algorithm: Option<String>,
    },

    /// Mint a token from datalog source
    Mint {
        /// Root private key (hex, PEM, or a file holding either)
        #[arg(long)]
        key: String,

        /// Authority block source, e.g. 'user("alice"); check if time($t), $t < 2030-01-01T00:00:00Z'
        #[arg(long)]
        code: String,

        /// Cleartext root key id hint
        #[arg(long)]
        root_key_id: Option<u32>,

        /// Free-form context string for the authority block
        #[arg(long)]
        context: Option<String>,
    },

    /// Print a token's blocks and revocation ids without verifying it
    Inspect {
        /// Token (base64 or a file holding it)
        token: String,
    },

    /// Verify a token's signature chain
    Verify {
        /// Token (base64 or a file holding it)
        token: String,

        /// Root public key (hex, PEM, or a file holding either)
        #[arg(long)]
        key: String,
    },

    /// Append an attenuation block to a token
    Attenuate {
        /// Token (base64 or a file holding it)
        token: String,

        /// Block source, e.g. 'check if operation("read")'
        #[arg(long)]
        code: String,

        /// Free-form context string for the new block
        #[arg(long)]
        context: Option<String>,
    },

    /// Verify a token and evaluate authorizer code against it
    Authorize {
        /// Token (base64 or a file holding it)
        token: String,

        /// Root public key (hex, PEM, or a file holding either)
        #[arg(long)]
        key: String,

        /// Authorizer source, policies included, e.g. 'operation("read"); allow if user($u)'
        #[arg(long)]
        code: String,

        /// Add a time() fact sampled now
        #[arg(long)]
        time: bool,

        /// Maximum facts the evaluation may derive
        #[arg(long)]
        max_facts: Option<usize>,

        /// Maximum evaluation iterations
        #[arg(long)]
        max_iterations: Option<usize>,
    },
}

// ── Command handlers ──────────────────────────────────────────────────────────

fn cmd_keygen(algorithm: Option<&str>) -> Result<()> {
    let keypair = KeyPair::generate(parse_algorithm(algorithm)?);
    let out = serde_json::json!({
        "algorithm": keypair.algorithm().name(),
        "private_key": keypair.private().to_hex(),
        "public_key": keypair.public().to_hex(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_mint(
    key: &str,
    code: &str,
    root_key_id: Option<u32>,
    context: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let root = load_private_key(key)?;
    let mut builder = TokenBuilder::new();
    builder.add_code(&read_arg(code)?)?;
    if let Some(id) = root_key_id {
        builder.set_root_key_id(id);
    }
    if let Some(context) = context {
        builder.set_context(context)?;
    }
    let token = builder.build(&root)?;
    if verbose {
        eprintln!("{token}");
    }
    println!("{}", token.to_base64()?);
    Ok(())
}

fn cmd_inspect(token: &str) -> Result<()> {
    let token = UnverifiedToken::from_base64(&read_arg(token)?)?;
    let mut blocks = Vec::new();
    for i in 0..token.block_count() {
        blocks.push(serde_json::json!({
            "index": i,
            "source": token.block_source(i)?,
            "context": token.block_context(i)?,
            "external_key": token.block_external_key(i)?.map(|k| k.to_hex()),
        }));
    }
    let out = serde_json::json!({
        "root_key_id": token.root_key_id(),
        "block_count": token.block_count(),
        "blocks": blocks,
        "revocation_ids": token
            .revocation_ids()
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_verify(token: &str, key: &str, verbose: bool) -> Result<()> {
    let token = load_token(token, key)?;
    if verbose {
        eprintln!("{token}");
    }
    println!("ok: {} block(s) verified", token.block_count());
    Ok(())
}

fn cmd_attenuate(token: &str, code: &str, context: Option<&str>, verbose: bool) -> Result<()> {
    let token = UnverifiedToken::from_base64(&read_arg(token)?)?;
    let mut block = BlockBuilder::new();
    block.add_code(&read_arg(code)?)?;
    if let Some(context) = context {
        block.set_context(context)?;
    }
    let attenuated = token.append(&block)?;
    if verbose {
        eprintln!("{attenuated}");
    }
    println!("{}", attenuated.to_base64()?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_authorize(
    token: &str,
    key: &str,
    code: &str,
    time: bool,
    max_facts: Option<usize>,
    max_iterations: Option<usize>,
    verbose: bool,
) -> Result<()> {
    let token = load_token(token, key)?;
    let mut builder = AuthorizerBuilder::new();
    builder.add_code(&read_arg(code)?)?;
    if time {
        builder.set_time()?;
    }
    let mut limits = RunLimits::default();
    if let Some(max_facts) = max_facts {
        limits.max_facts = max_facts;
    }
    if let Some(max_iterations) = max_iterations {
        limits.max_iterations = max_iterations;
    }
    builder.set_limits(limits)?;

    let mut authorizer = builder.build(&token)?;
    if verbose {
        eprintln!("{}", authorizer.print_world());
    }
    let policy = authorizer.authorize()?;
    println!("authorized by policy {policy}");
    Ok(())
}

// ── Main entry point ──────────────────────────────────────────────────────────

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = match cli.command {
        Commands::Keygen { algorithm } => cmd_keygen(algorithm.as_deref()),
        Commands::Mint {
            key,
            code,
            root_key_id,
            context,
        } => cmd_mint(&key, &code, root_key_id, context.as_deref(), verbose),
        Commands::Inspect { token } => cmd_inspect(&token),
        Commands::Verify { token, key } => cmd_verify(&token, &key, verbose),
        Commands::Attenuate {
            token,
            code,
            context,
        } => cmd_attenuate(&token, &code, context.as_deref(), verbose),
        Commands::Authorize {
            token,
            key,
            code,
            time,
            max_facts,
            max_iterations,
        } => cmd_authorize(
            &token,
            &key,
            &code,
            time,
            max_facts,
            max_iterations,
            verbose,
        ),
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
