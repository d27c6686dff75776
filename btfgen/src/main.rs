use std::path::PathBuf;
use std::process::exit;

use anyhow::bail;
use anyhow::Context as _;
use anyhow::Result;
use structopt::StructOpt;

use btfgen::HeaderBuilder;
use btfparse::Btf;

#[derive(Debug, StructOpt)]
#[structopt(name = "btfgen", about = "Inspect BTF blobs and generate C headers")]
enum Command {
    /// Print every record of the given BTF blobs, one per id
    Dump {
        /// Base BTF file, optionally followed by split BTF files
        #[structopt(parse(from_os_str), required = true)]
        paths: Vec<PathBuf>,
    },
    /// Generate a C header declaring every recorded type
    Include {
        /// Base BTF file, optionally followed by split BTF files
        #[structopt(parse(from_os_str), required = true)]
        paths: Vec<PathBuf>,
    },
}

fn dump(paths: &[PathBuf]) -> Result<()> {
    let btf = Btf::from_paths(paths).context("failed to open the BTF file")?;
    if btf.is_empty() {
        bail!("no types were found");
    }

    for (id, ty) in btf.types().iter().enumerate().skip(1) {
        println!("[{id}] {} {ty}", ty.kind());
    }
    Ok(())
}

fn include(paths: &[PathBuf]) -> Result<()> {
    let mut builder = HeaderBuilder::new();
    for path in paths {
        builder.path(path);
    }

    let header = builder.generate()?;
    println!("{header}");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let result = match Command::from_args() {
        Command::Dump { paths } => dump(&paths),
        Command::Include { paths } => include(&paths),
    };

    if let Err(err) = result {
        eprintln!("{err:#}");
        exit(1);
    }
}
