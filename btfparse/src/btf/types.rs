use std::fmt;

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

/// The kind tag discriminating a BTF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum BtfKind {
    Void = 0,
    Int = 1,
    Ptr = 2,
    Array = 3,
    Struct = 4,
    Union = 5,
    Enum = 6,
    Fwd = 7,
    Typedef = 8,
    Volatile = 9,
    Const = 10,
    Restrict = 11,
    Func = 12,
    FuncProto = 13,
    Var = 14,
    DataSec = 15,
    Float = 16,
}

impl fmt::Display for BtfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BtfKind::Void => "VOID",
            BtfKind::Int => "INT",
            BtfKind::Ptr => "PTR",
            BtfKind::Array => "ARRAY",
            BtfKind::Struct => "STRUCT",
            BtfKind::Union => "UNION",
            BtfKind::Enum => "ENUM",
            BtfKind::Fwd => "FWD",
            BtfKind::Typedef => "TYPEDEF",
            BtfKind::Volatile => "VOLATILE",
            BtfKind::Const => "CONST",
            BtfKind::Restrict => "RESTRICT",
            BtfKind::Func => "FUNC",
            BtfKind::FuncProto => "FUNC_PROTO",
            BtfKind::Var => "VAR",
            BtfKind::DataSec => "DATASEC",
            BtfKind::Float => "FLOAT",
        };
        f.write_str(name)
    }
}

/// Integer encoding; at most one of the signed/char/bool flags may be set on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntEncoding {
    None,
    Signed,
    Char,
    Bool,
}

impl fmt::Display for IntEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntEncoding::None => "(none)",
            IntEncoding::Signed => "SIGNED",
            IntEncoding::Char => "CHAR",
            IntEncoding::Bool => "BOOL",
        };
        f.write_str(name)
    }
}

/// Function linkage, carried in the `vlen` field of a `Func` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum FuncLinkage {
    Static = 0,
    Global = 1,
    Extern = 2,
}

impl fmt::Display for FuncLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuncLinkage::Static => "static",
            FuncLinkage::Global => "global",
            FuncLinkage::Extern => "extern",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfInt {
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    pub encoding: IntEncoding,
    /// Bit offset and width for bitfield-style integers.
    pub offset: u8,
    pub bits: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfPtr {
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfArray {
    pub val_type_id: u32,
    pub index_type_id: u32,
    pub nelems: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfMember {
    pub name: Option<String>,
    pub type_id: u32,
    /// Offset of the member, in bits.
    pub bit_offset: u32,
    /// Bitfield width; only recorded when the parent had `kind_flag` set.
    pub bitfield_size: Option<u8>,
}

/// Struct or union; the two kinds share the same record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfComposite {
    pub name: Option<String>,
    pub size: u32,
    pub members: Vec<BtfMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfEnumValue {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfEnum {
    pub name: Option<String>,
    pub size: u32,
    pub values: Vec<BtfEnumValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtfFwdKind {
    Struct,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfFwd {
    pub name: String,
    pub kind: BtfFwdKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfTypedef {
    pub name: String,
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfVolatile {
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfConst {
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfRestrict {
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfFunc {
    pub name: String,
    pub proto_type_id: u32,
    pub linkage: FuncLinkage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfFuncParam {
    pub name: Option<String>,
    pub type_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfFuncProto {
    pub ret_type_id: u32,
    pub params: Vec<BtfFuncParam>,
    pub is_variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfFloat {
    pub name: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfVar {
    pub name: String,
    pub type_id: u32,
    /// Raw linkage value; 0 is static, 1 is global-allocated.
    pub linkage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfDataSecVar {
    pub type_id: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtfDataSec {
    pub name: String,
    pub size: u32,
    pub vars: Vec<BtfDataSecVar>,
}

/// A decoded BTF record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtfType {
    Void,
    Int(BtfInt),
    Ptr(BtfPtr),
    Array(BtfArray),
    Struct(BtfComposite),
    Union(BtfComposite),
    Enum(BtfEnum),
    Fwd(BtfFwd),
    Typedef(BtfTypedef),
    Volatile(BtfVolatile),
    Const(BtfConst),
    Restrict(BtfRestrict),
    Func(BtfFunc),
    FuncProto(BtfFuncProto),
    Var(BtfVar),
    DataSec(BtfDataSec),
    Float(BtfFloat),
}

impl BtfType {
    pub fn kind(&self) -> BtfKind {
        match self {
            BtfType::Void => BtfKind::Void,
            BtfType::Int(_) => BtfKind::Int,
            BtfType::Ptr(_) => BtfKind::Ptr,
            BtfType::Array(_) => BtfKind::Array,
            BtfType::Struct(_) => BtfKind::Struct,
            BtfType::Union(_) => BtfKind::Union,
            BtfType::Enum(_) => BtfKind::Enum,
            BtfType::Fwd(_) => BtfKind::Fwd,
            BtfType::Typedef(_) => BtfKind::Typedef,
            BtfType::Volatile(_) => BtfKind::Volatile,
            BtfType::Const(_) => BtfKind::Const,
            BtfType::Restrict(_) => BtfKind::Restrict,
            BtfType::Func(_) => BtfKind::Func,
            BtfType::FuncProto(_) => BtfKind::FuncProto,
            BtfType::Var(_) => BtfKind::Var,
            BtfType::DataSec(_) => BtfKind::DataSec,
            BtfType::Float(_) => BtfKind::Float,
        }
    }

    /// The record's own name, for the kinds that carry one.
    pub fn name(&self) -> Option<&str> {
        match self {
            BtfType::Int(t) => Some(&t.name),
            BtfType::Struct(t) | BtfType::Union(t) => t.name.as_deref(),
            BtfType::Enum(t) => t.name.as_deref(),
            BtfType::Fwd(t) => Some(&t.name),
            BtfType::Typedef(t) => Some(&t.name),
            BtfType::Func(t) => Some(&t.name),
            BtfType::Var(t) => Some(&t.name),
            BtfType::DataSec(t) => Some(&t.name),
            BtfType::Float(t) => Some(&t.name),
            _ => None,
        }
    }
}

fn opt_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("(anon)")
}

impl fmt::Display for BtfInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' size={} bits_offset={} nr_bits={} encoding={}",
            self.name, self.size, self.offset, self.bits, self.encoding
        )
    }
}

impl fmt::Display for BtfArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'(anon)' type_id={} index_type_id={} nr_elems={}",
            self.val_type_id, self.index_type_id, self.nelems
        )
    }
}

impl fmt::Display for BtfComposite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' size={} vlen={}",
            opt_name(&self.name),
            self.size,
            self.members.len()
        )?;
        for member in &self.members {
            write!(
                f,
                "\n\t'{}' type_id={} bits_offset={}",
                opt_name(&member.name),
                member.type_id,
                member.bit_offset
            )?;
            if let Some(bits) = member.bitfield_size.filter(|&bits| bits != 0) {
                write!(f, " bitfield_size={bits}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for BtfEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' size={} vlen={}",
            opt_name(&self.name),
            self.size,
            self.values.len()
        )?;
        for value in &self.values {
            // `val` is signed on the wire but bpftool prints it as unsigned.
            write!(f, "\n\t'{}' val={}", value.name, value.value as u32)?;
        }
        Ok(())
    }
}

impl fmt::Display for BtfFwd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            BtfFwdKind::Struct => "struct",
            BtfFwdKind::Union => "union",
        };
        write!(f, "'{}' fwd_kind={kind}", self.name)
    }
}

impl fmt::Display for BtfTypedef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' type_id={}", self.name, self.type_id)
    }
}

impl fmt::Display for BtfFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' type_id={} linkage={}",
            self.name, self.proto_type_id, self.linkage
        )
    }
}

impl fmt::Display for BtfFuncProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The decoder strips the unnamed trailing parameter that marks a
        // variadic prototype; put it back when printing in bpftool format.
        let vlen = self.params.len() + usize::from(self.is_variadic);
        write!(f, "'(anon)' ret_type_id={} vlen={vlen}", self.ret_type_id)?;
        for param in &self.params {
            write!(
                f,
                "\n\t'{}' type_id={}",
                opt_name(&param.name),
                param.type_id
            )?;
        }
        if self.is_variadic {
            write!(f, "\n\t'(anon)' type_id=0")?;
        }
        Ok(())
    }
}

impl fmt::Display for BtfFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' size={}", self.name, self.size)
    }
}

impl fmt::Display for BtfVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' type_id={}, linkage=", self.name, self.type_id)?;
        match self.linkage {
            0 => f.write_str("static"),
            1 => f.write_str("global-alloc"),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for BtfDataSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' size={} vlen={}",
            self.name,
            self.size,
            self.vars.len()
        )?;
        for var in &self.vars {
            write!(
                f,
                "\n\ttype_id={} offset={} size={}",
                var.type_id, var.offset, var.size
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for BtfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BtfType::Void => Ok(()),
            BtfType::Int(t) => t.fmt(f),
            BtfType::Ptr(t) => write!(f, "'(anon)' type_id={}", t.type_id),
            BtfType::Array(t) => t.fmt(f),
            BtfType::Struct(t) | BtfType::Union(t) => t.fmt(f),
            BtfType::Enum(t) => t.fmt(f),
            BtfType::Fwd(t) => t.fmt(f),
            BtfType::Typedef(t) => t.fmt(f),
            BtfType::Volatile(t) => write!(f, "'(anon)' type_id={}", t.type_id),
            BtfType::Const(t) => write!(f, "'(anon)' type_id={}", t.type_id),
            BtfType::Restrict(t) => write!(f, "'(anon)' type_id={}", t.type_id),
            BtfType::Func(t) => t.fmt(f),
            BtfType::FuncProto(t) => t.fmt(f),
            BtfType::Var(t) => t.fmt(f),
            BtfType::DataSec(t) => t.fmt(f),
            BtfType::Float(t) => t.fmt(f),
        }
    }
}
