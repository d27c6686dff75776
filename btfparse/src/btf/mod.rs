//! BTF blob decoding and the id-indexed type store.

mod c_types;
mod types;

use std::ffi::c_void;
use std::fs;
use std::mem::size_of;
use std::path::Path;

use scroll::Endian;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::FileRange;
use crate::error::Result;
use crate::reader::ByteReader;

use c_types::BTF_MAGIC;
use c_types::BTF_MAGIC_SWAPPED;
use c_types::BTF_TYPE_HEADER_SIZE;

pub use types::*;

fn get_vlen(info: u32) -> u32 {
    info & 0xffff
}

fn get_kind(info: u32) -> u32 {
    (info >> 24) & 0x1f
}

fn get_kind_flag(info: u32) -> bool {
    (info >> 31) == 1
}

/// One input blob, with its endianness and decoded 24-byte header.
struct Blob<'data> {
    data: &'data [u8],
    endian: Endian,
    hdr: c_types::btf_header,
}

impl<'data> Blob<'data> {
    fn new(data: &'data [u8]) -> Result<Self> {
        let endian = detect_endianness(data)?;

        let mut reader = ByteReader::new(data);
        reader.set_endian(endian);
        let hdr: c_types::btf_header = reader.read()?;

        Ok(Self { data, endian, hdr })
    }

    fn reader(&self) -> ByteReader<'data> {
        let mut reader = ByteReader::new(self.data);
        reader.set_endian(self.endian);
        reader
    }
}

/// The magic doubles as the byte-order mark: a little-endian read yields the
/// nominal value on little-endian blobs and the swapped one otherwise.
fn detect_endianness(data: &[u8]) -> Result<Endian> {
    let mut reader = ByteReader::new(data);
    match reader.u16()? {
        BTF_MAGIC => Ok(Endian::Little),
        BTF_MAGIC_SWAPPED => Ok(Endian::Big),
        _ => Err(Error::new(ErrorKind::InvalidMagicValue)),
    }
}

/// Common record header with the `info` word decomposed.
struct TypeHeader {
    name_off: u32,
    vlen: u32,
    kind_flag: bool,
    size_or_type: u32,
}

type KindParser = fn(&TypeLoader<'_>, &mut ByteReader<'_>, &TypeHeader, u64) -> Result<BtfType>;

/// Kind dispatch table. `Void` never appears in the type section, so a
/// lookup miss maps to `UnsupportedBtfKind`.
fn parser_for(kind: BtfKind) -> Option<KindParser> {
    let parser: KindParser = match kind {
        BtfKind::Void => return None,
        BtfKind::Int => parse_int,
        BtfKind::Ptr => parse_ptr,
        BtfKind::Array => parse_array,
        BtfKind::Struct => parse_struct,
        BtfKind::Union => parse_union,
        BtfKind::Enum => parse_enum,
        BtfKind::Fwd => parse_fwd,
        BtfKind::Typedef => parse_typedef,
        BtfKind::Volatile => parse_volatile,
        BtfKind::Const => parse_const,
        BtfKind::Restrict => parse_restrict,
        BtfKind::Func => parse_func,
        BtfKind::FuncProto => parse_func_proto,
        BtfKind::Var => parse_var,
        BtfKind::DataSec => parse_datasec,
        BtfKind::Float => parse_float,
    };
    Some(parser)
}

fn invalid_encoding(kind: BtfKind, range: FileRange) -> Error {
    Error::with_range(ErrorKind::InvalidTypeEncoding(kind), range)
}

fn header_range(start: u64) -> FileRange {
    FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE,
    }
}

struct TypeLoader<'data> {
    blobs: &'data [Blob<'data>],
}

impl<'data> TypeLoader<'data> {
    /// Walks every blob's type section in input order, assigning sequential
    /// ids starting at 1.
    fn load(&self) -> Result<Vec<BtfType>> {
        let mut types = vec![BtfType::Void];

        for blob in self.blobs {
            let mut reader = blob.reader();

            let section_start = u64::from(blob.hdr.hdr_len) + u64::from(blob.hdr.type_off);
            let section_end = section_start + u64::from(blob.hdr.type_len);
            reader.seek(section_start)?;

            while reader.offset() < section_end {
                types.push(self.load_type(&mut reader)?);
            }
        }

        Ok(types)
    }

    fn load_type(&self, reader: &mut ByteReader<'_>) -> Result<BtfType> {
        let start = reader.offset();
        let raw: c_types::btf_type = reader.read()?;

        let hdr = TypeHeader {
            name_off: raw.name_off,
            vlen: get_vlen(raw.info),
            kind_flag: get_kind_flag(raw.info),
            size_or_type: raw.size_or_type,
        };

        let kind = BtfKind::try_from(get_kind(raw.info))
            .map_err(|_| Error::with_range(ErrorKind::InvalidBtfKind, header_range(start)))?;

        let parser = parser_for(kind).ok_or(Error::with_range(
            ErrorKind::UnsupportedBtfKind,
            header_range(start),
        ))?;

        parser(self, reader, &hdr, start)
    }

    /// Resolves a logical offset against the concatenated string tables.
    fn string_at(&self, offset: u32) -> Result<String> {
        let mut start: u64 = 0;

        for blob in self.blobs {
            let end = start + u64::from(blob.hdr.str_len);
            if u64::from(offset) < end {
                let relative = u64::from(offset) - start;
                let absolute = u64::from(blob.hdr.hdr_len) + u64::from(blob.hdr.str_off) + relative;
                return read_cstr(blob, absolute);
            }
            start = end;
        }

        Err(Error::with_range(
            ErrorKind::InvalidStringOffset,
            FileRange {
                offset: u64::from(offset),
                size: 0,
            },
        ))
    }

    /// Offset 0 denotes "no name".
    fn name_at(&self, name_off: u32) -> Result<Option<String>> {
        if name_off == 0 {
            return Ok(None);
        }
        self.string_at(name_off).map(Some)
    }

    fn parse_composite(
        &self,
        reader: &mut ByteReader<'_>,
        hdr: &TypeHeader,
    ) -> Result<BtfComposite> {
        let name = self.name_at(hdr.name_off)?;

        let mut members = Vec::with_capacity(hdr.vlen as usize);
        for _ in 0..hdr.vlen {
            let raw: c_types::btf_member = reader.read()?;

            // With `kind_flag` set the offset word carries the bitfield
            // width in its top byte and the bit offset below it.
            let (bit_offset, bitfield_size) = if hdr.kind_flag {
                (raw.offset & 0x00ff_ffff, Some((raw.offset >> 24) as u8))
            } else {
                (raw.offset, None)
            };

            members.push(BtfMember {
                name: self.name_at(raw.name_off)?,
                type_id: raw.type_id,
                bit_offset,
                bitfield_size,
            });
        }

        Ok(BtfComposite {
            name,
            size: hdr.size_or_type,
            members,
        })
    }
}

fn parse_int(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let range = FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE + 4,
    };

    if hdr.kind_flag || hdr.vlen != 0 {
        return Err(invalid_encoding(BtfKind::Int, range));
    }
    if !matches!(hdr.size_or_type, 1 | 2 | 4 | 8 | 16) {
        return Err(invalid_encoding(BtfKind::Int, range));
    }

    let name = loader.name_at(hdr.name_off)?.unwrap_or_default();

    let info = reader.u32()?;

    let is_signed = (info >> 24) & 1 != 0;
    let is_char = (info >> 24) & 2 != 0;
    let is_bool = (info >> 24) & 4 != 0;
    if u32::from(is_signed) + u32::from(is_char) + u32::from(is_bool) > 1 {
        return Err(invalid_encoding(BtfKind::Int, range));
    }
    let encoding = if is_signed {
        IntEncoding::Signed
    } else if is_char {
        IntEncoding::Char
    } else if is_bool {
        IntEncoding::Bool
    } else {
        IntEncoding::None
    };

    let bits = (info & 0xff) as u8;
    if u32::from(bits) > 128 || u32::from(bits) > hdr.size_or_type * 8 {
        return Err(invalid_encoding(BtfKind::Int, range));
    }

    let offset = ((info >> 16) & 0xff) as u8;
    if u32::from(offset) + u32::from(bits) > hdr.size_or_type * 8 {
        return Err(invalid_encoding(BtfKind::Int, range));
    }

    Ok(BtfType::Int(BtfInt {
        name,
        size: hdr.size_or_type,
        encoding,
        offset,
        bits,
    }))
}

/// Ptr and the three qualifiers share their encoding rules: unnamed, no
/// flag, zero vlen, referent in `size_or_type`.
fn referent_of(kind: BtfKind, hdr: &TypeHeader, start: u64) -> Result<u32> {
    if hdr.name_off != 0 || hdr.kind_flag || hdr.vlen != 0 {
        return Err(invalid_encoding(kind, header_range(start)));
    }
    Ok(hdr.size_or_type)
}

fn parse_ptr(
    _loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let type_id = referent_of(BtfKind::Ptr, hdr, start)?;
    Ok(BtfType::Ptr(BtfPtr { type_id }))
}

fn parse_volatile(
    _loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let type_id = referent_of(BtfKind::Volatile, hdr, start)?;
    Ok(BtfType::Volatile(BtfVolatile { type_id }))
}

fn parse_const(
    _loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let type_id = referent_of(BtfKind::Const, hdr, start)?;
    Ok(BtfType::Const(BtfConst { type_id }))
}

fn parse_restrict(
    _loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let type_id = referent_of(BtfKind::Restrict, hdr, start)?;
    Ok(BtfType::Restrict(BtfRestrict { type_id }))
}

fn parse_array(
    _loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let range = FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE + size_of::<c_types::btf_array>(),
    };

    if hdr.name_off != 0 || hdr.kind_flag || hdr.vlen != 0 || hdr.size_or_type != 0 {
        return Err(invalid_encoding(BtfKind::Array, range));
    }

    let info: c_types::btf_array = reader.read()?;
    Ok(BtfType::Array(BtfArray {
        val_type_id: info.val_type_id,
        index_type_id: info.idx_type_id,
        nelems: info.nelems,
    }))
}

fn parse_struct(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    _start: u64,
) -> Result<BtfType> {
    Ok(BtfType::Struct(loader.parse_composite(reader, hdr)?))
}

fn parse_union(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    _start: u64,
) -> Result<BtfType> {
    Ok(BtfType::Union(loader.parse_composite(reader, hdr)?))
}

fn parse_enum(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let range = FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE + hdr.vlen as usize * size_of::<c_types::btf_enum>(),
    };

    if hdr.kind_flag {
        return Err(invalid_encoding(BtfKind::Enum, range));
    }
    if !matches!(hdr.size_or_type, 1 | 2 | 4 | 8) {
        return Err(invalid_encoding(BtfKind::Enum, range));
    }

    let name = loader.name_at(hdr.name_off)?;

    let mut values = Vec::with_capacity(hdr.vlen as usize);
    for _ in 0..hdr.vlen {
        let raw: c_types::btf_enum = reader.read()?;
        if raw.name_off == 0 {
            return Err(invalid_encoding(BtfKind::Enum, range));
        }
        values.push(BtfEnumValue {
            name: loader.string_at(raw.name_off)?,
            value: raw.val,
        });
    }

    Ok(BtfType::Enum(BtfEnum {
        name,
        size: hdr.size_or_type,
        values,
    }))
}

fn parse_fwd(
    loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    if hdr.name_off == 0 || hdr.vlen != 0 || hdr.size_or_type != 0 {
        return Err(invalid_encoding(BtfKind::Fwd, header_range(start)));
    }

    Ok(BtfType::Fwd(BtfFwd {
        name: loader.string_at(hdr.name_off)?,
        kind: if hdr.kind_flag {
            BtfFwdKind::Union
        } else {
            BtfFwdKind::Struct
        },
    }))
}

fn parse_typedef(
    loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    if hdr.name_off == 0 || hdr.kind_flag || hdr.vlen != 0 {
        return Err(invalid_encoding(BtfKind::Typedef, header_range(start)));
    }

    Ok(BtfType::Typedef(BtfTypedef {
        name: loader.string_at(hdr.name_off)?,
        type_id: hdr.size_or_type,
    }))
}

fn parse_func(
    loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    if hdr.name_off == 0 || hdr.kind_flag {
        return Err(invalid_encoding(BtfKind::Func, header_range(start)));
    }

    // Linkage rides in vlen; anything past `extern` is malformed.
    let linkage = FuncLinkage::try_from(hdr.vlen)
        .map_err(|_| invalid_encoding(BtfKind::Func, header_range(start)))?;

    Ok(BtfType::Func(BtfFunc {
        name: loader.string_at(hdr.name_off)?,
        proto_type_id: hdr.size_or_type,
        linkage,
    }))
}

fn parse_func_proto(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    if hdr.name_off != 0 || hdr.kind_flag {
        return Err(invalid_encoding(BtfKind::FuncProto, header_range(start)));
    }

    let mut params = Vec::with_capacity(hdr.vlen as usize);
    for _ in 0..hdr.vlen {
        let raw: c_types::btf_param = reader.read()?;
        params.push(BtfFuncParam {
            name: loader.name_at(raw.name_off)?,
            type_id: raw.type_id,
        });
    }

    // A trailing unnamed parameter of type 0 marks a variadic prototype;
    // strip it and record the flag instead.
    let mut is_variadic = false;
    if let Some(last) = params.last() {
        if last.name.is_none() && last.type_id == 0 {
            params.pop();
            is_variadic = true;
        }
    }

    Ok(BtfType::FuncProto(BtfFuncProto {
        ret_type_id: hdr.size_or_type,
        params,
        is_variadic,
    }))
}

fn parse_float(
    loader: &TypeLoader<'_>,
    _reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    if hdr.name_off == 0 || hdr.kind_flag || hdr.vlen != 0 {
        return Err(invalid_encoding(BtfKind::Float, header_range(start)));
    }
    if !matches!(hdr.size_or_type, 2 | 4 | 8 | 12 | 16) {
        return Err(invalid_encoding(BtfKind::Float, header_range(start)));
    }

    Ok(BtfType::Float(BtfFloat {
        name: loader.string_at(hdr.name_off)?,
        size: hdr.size_or_type,
    }))
}

fn parse_var(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let range = FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE + 4,
    };

    if hdr.name_off == 0 || hdr.kind_flag || hdr.vlen != 0 {
        return Err(invalid_encoding(BtfKind::Var, range));
    }

    let name = loader.string_at(hdr.name_off)?;
    let linkage = reader.u32()?;

    Ok(BtfType::Var(BtfVar {
        name,
        type_id: hdr.size_or_type,
        linkage,
    }))
}

fn parse_datasec(
    loader: &TypeLoader<'_>,
    reader: &mut ByteReader<'_>,
    hdr: &TypeHeader,
    start: u64,
) -> Result<BtfType> {
    let range = FileRange {
        offset: start,
        size: BTF_TYPE_HEADER_SIZE + hdr.vlen as usize * size_of::<c_types::btf_datasec_var>(),
    };

    if hdr.name_off == 0 || hdr.kind_flag {
        return Err(invalid_encoding(BtfKind::DataSec, range));
    }

    let name = loader.string_at(hdr.name_off)?;

    let mut vars = Vec::with_capacity(hdr.vlen as usize);
    for _ in 0..hdr.vlen {
        let raw: c_types::btf_datasec_var = reader.read()?;
        vars.push(BtfDataSecVar {
            type_id: raw.type_id,
            offset: raw.offset,
            size: raw.size,
        });
    }

    Ok(BtfType::DataSec(BtfDataSec {
        name,
        size: hdr.size_or_type,
        vars,
    }))
}

/// Reads a NUL-terminated string from a blob at an absolute offset.
fn read_cstr(blob: &Blob<'_>, offset: u64) -> Result<String> {
    let mut reader = blob.reader();
    reader.seek(offset)?;

    let mut buffer = Vec::new();
    loop {
        let ch = reader.u8()?;
        if ch == 0 {
            break;
        }
        buffer.push(ch);
    }

    String::from_utf8(buffer)
        .map_err(|_| Error::with_range(ErrorKind::InvalidStringOffset, FileRange { offset, size: 0 }))
}

/// An id-indexed store of decoded BTF records.
///
/// Index 0 always holds [`BtfType::Void`]; parsed records follow with
/// sequential ids across every blob the store was built from. The store is
/// immutable after construction.
#[derive(Debug)]
pub struct Btf {
    types: Vec<BtfType>,
    ptr_size: u32,
}

impl Btf {
    /// Parse a single BTF file, e.g. `/sys/kernel/btf/vmlinux`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_paths(&[path])
    }

    /// Parse a base BTF file followed by any number of split BTF files.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            contents.push(fs::read(path)?);
        }
        let slices: Vec<&[u8]> = contents.iter().map(Vec::as_slice).collect();
        Self::from_bytes_list(&slices)
    }

    /// Parse a single in-memory blob.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_bytes_list(&[data])
    }

    /// Parse logically concatenated blobs: type ids are assigned across
    /// blobs in input order and string offsets past one blob's table
    /// address the next one's.
    pub fn from_bytes_list(blobs: &[&[u8]]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(blobs.len());
        for data in blobs {
            parsed.push(Blob::new(data)?);
        }

        let types = TypeLoader { blobs: &parsed }.load()?;

        Ok(Self {
            types,
            ptr_size: size_of::<*const c_void>() as u32,
        })
    }

    /// All records in ascending id order, `void` included at index 0.
    pub fn types(&self) -> &[BtfType] {
        &self.types
    }

    pub fn type_by_id(&self, id: u32) -> Option<&BtfType> {
        self.types.get(id as usize)
    }

    pub fn kind_by_id(&self, id: u32) -> Option<BtfKind> {
        self.type_by_id(id).map(BtfType::kind)
    }

    /// Number of records in the store, the implicit `void` entry included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the store holds nothing beyond the implicit `void` entry.
    pub fn is_empty(&self) -> bool {
        self.types.len() <= 1
    }

    /// Pointer width in bytes assumed for layout math.
    pub fn ptr_size(&self) -> u32 {
        self.ptr_size
    }
}
