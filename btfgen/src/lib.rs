//! btfgen renders the type graph of one or more BTF blobs as a single,
//! self-contained C translation unit that declares every recorded type with
//! identical layout and naming.
//!
//! btfgen supports two interfaces:
//! * the [`HeaderBuilder`] API, for embedding in other tools
//! * the `btfgen` command line utility (`dump` and `include` subcommands)
//!
//! # Generating a header
//!
//! ```no_run
//! use btfgen::HeaderBuilder;
//!
//! let header = HeaderBuilder::new()
//!     .path("/sys/kernel/btf/vmlinux")
//!     .generate()
//!     .unwrap();
//!
//! print!("{header}");
//! ```
//!
//! The output is wrapped in `#pragma pack(push, 1)` / `#pragma pack(pop)`
//! and every implicit padding byte is materialized as an explicit member, so
//! a conformant C compiler reproduces the kernel's layout exactly. Every
//! declaration is preceded by a `/* BTF Type #<id> */` comment naming the
//! record it came from.

use std::path::Path;
use std::path::PathBuf;
use std::result;

use thiserror::Error as ThisError;

mod gen;


/// Canonical error type for this crate.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Error parsing BTF: {0}")]
    Parse(#[from] btfparse::Error),
    #[error("Error generating header: {0}")]
    Generate(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Generate the C header for an already parsed [`Btf`](btfparse::Btf).
pub fn generate_header(btf: &btfparse::Btf) -> Result<String> {
    gen::generate(btf).map_err(|err| Error::Generate(format!("{err:#}")))
}

/// `HeaderBuilder` parses one or more BTF blobs and renders the C header.
///
/// Blobs compose the way the kernel splits them: pass the base BTF first and
/// any module (split) BTF files after it.
#[derive(Debug, Default)]
pub struct HeaderBuilder {
    paths: Vec<PathBuf>,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a BTF file to parse.
    pub fn path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Parse every registered blob and render the header.
    pub fn generate(&self) -> Result<String> {
        let btf = btfparse::Btf::from_paths(&self.paths)?;
        generate_header(&btf)
    }
}
