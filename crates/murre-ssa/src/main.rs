use anyhow::{Context, Result};
use clap::Parser;
use murre_ssa::ir::Module;
use murre_ssa::{optimize_module, Options};
use std::fs;
use std::path::PathBuf;

/// murre-ssa — standalone SSA optimizer for Murre module dumps.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Module dump produced by the front end (JSON)
    input: PathBuf,

    /// Output file for the optimized dump (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Print a human-readable listing instead of the dump
    #[arg(long)]
    dump: bool,

    /// Check IR well-formedness after optimizing
    #[arg(long)]
    verify: bool,

    /// Disable individual passes (repeatable), e.g. --no sink
    #[arg(long = "no", value_name = "PASS")]
    disabled: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let module: Module = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;

    let mut options = Options::new();
    for pass in &cli.disabled {
        options.disable(pass);
    }

    eprintln!(
        "murre-ssa: optimizing {} ({} functions)",
        module.name.as_str(),
        module.functions.len(),
    );

    let module = optimize_module(module, &options).context("optimization failed")?;

    if cli.verify {
        murre_ssa::verify::check_module(&module).context("optimizer produced ill-formed IR")?;
    }

    let rendered = if cli.dump {
        module.to_string()
    } else {
        serde_json::to_string_pretty(&module).context("failed to serialize module")?
    };

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &rendered)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("murre-ssa: wrote {}", output_path.display());
    } else {
        print!("{rendered}");
    }

    Ok(())
}
