//! Parser for the [BPF Type Format][btf-docs] (BTF) sections produced by the
//! Linux kernel and its modules.
//!
//! BTF encodes C types as a compact, id-indexed type graph plus a string
//! table. [`Btf`] decodes one or more such blobs into a store of [`BtfType`]
//! records, validating the kind-specific encoding rules along the way.
//!
//! [btf-docs]: https://www.kernel.org/doc/html/latest/bpf/btf.html
//!
//! ### Parsing BTF
//!
//! ```no_run
//! use btfparse::Btf;
//!
//! let btf = Btf::from_path("/sys/kernel/btf/vmlinux").unwrap();
//! ```
//!
//! Kernel modules ship split BTF whose type ids and string offsets continue
//! where the base blob left off. Pass the base file first and the module
//! files after it:
//!
//! ```no_run
//! use btfparse::Btf;
//!
//! let btf = Btf::from_paths(&["/sys/kernel/btf/vmlinux", "/sys/kernel/btf/btusb"]).unwrap();
//! ```
//!
//! Byte-slice equivalents ([`Btf::from_bytes`], [`Btf::from_bytes_list`]) are
//! available when the blob is already in memory.
//!
//! ### Resolving types
//!
//! Type id 0 is reserved for `void`; parsed records are assigned sequential
//! ids starting at 1, preserved across blobs.
//!
//! ```no_run
//! use btfparse::{Btf, BtfType};
//!
//! let btf = Btf::from_path("/sys/kernel/btf/vmlinux").unwrap();
//!
//! for (id, ty) in btf.types().iter().enumerate().skip(1) {
//!     if let BtfType::Func(func) = ty {
//!         println!("[{id}] {}", func.name);
//!     }
//! }
//! ```
//!
//! Malformed input never panics: every decode failure is reported as an
//! [`Error`] carrying an [`ErrorKind`] code and, for errors that point at
//! bytes, the offending [`FileRange`].

pub mod btf;
mod error;
mod reader;

pub use crate::btf::Btf;
pub use crate::btf::BtfArray;
pub use crate::btf::BtfComposite;
pub use crate::btf::BtfConst;
pub use crate::btf::BtfDataSec;
pub use crate::btf::BtfDataSecVar;
pub use crate::btf::BtfEnum;
pub use crate::btf::BtfEnumValue;
pub use crate::btf::BtfFloat;
pub use crate::btf::BtfFunc;
pub use crate::btf::BtfFuncParam;
pub use crate::btf::BtfFuncProto;
pub use crate::btf::BtfFwd;
pub use crate::btf::BtfFwdKind;
pub use crate::btf::BtfInt;
pub use crate::btf::BtfKind;
pub use crate::btf::BtfMember;
pub use crate::btf::BtfPtr;
pub use crate::btf::BtfRestrict;
pub use crate::btf::BtfType;
pub use crate::btf::BtfTypedef;
pub use crate::btf::BtfVar;
pub use crate::btf::BtfVolatile;
pub use crate::btf::FuncLinkage;
pub use crate::btf::IntEncoding;
pub use crate::error::Error;
pub use crate::error::ErrorKind;
pub use crate::error::FileRange;
pub use crate::error::Result;
