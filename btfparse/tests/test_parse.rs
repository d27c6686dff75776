mod common;

use std::io::Write as _;

use tempfile::NamedTempFile;

use btfparse::Btf;
use btfparse::BtfFwdKind;
use btfparse::BtfKind;
use btfparse::BtfType;
use btfparse::ErrorKind;
use btfparse::FileRange;
use btfparse::FuncLinkage;
use btfparse::IntEncoding;

use common::info;
use common::BlobBuilder;
use common::KIND_ARRAY;
use common::KIND_CONST;
use common::KIND_DATASEC;
use common::KIND_ENUM;
use common::KIND_FLOAT;
use common::KIND_FUNC;
use common::KIND_FUNC_PROTO;
use common::KIND_FWD;
use common::KIND_INT;
use common::KIND_PTR;
use common::KIND_STRUCT;
use common::KIND_TYPEDEF;
use common::KIND_VAR;

fn parse(builder: &BlobBuilder) -> Btf {
    Btf::from_bytes(&builder.build()).expect("failed to parse blob")
}

fn parse_err(builder: &BlobBuilder) -> btfparse::Error {
    Btf::from_bytes(&builder.build()).expect_err("blob parsed unexpectedly")
}

#[test]
fn signed_int() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("int");
    b.typ(name, info(KIND_INT, 0, false), 4, &[0x0100_0020]);

    let btf = parse(&b);
    assert_eq!(btf.len(), 2);
    match &btf.types()[1] {
        BtfType::Int(int) => {
            assert_eq!(int.name, "int");
            assert_eq!(int.size, 4);
            assert_eq!(int.encoding, IntEncoding::Signed);
            assert_eq!(int.offset, 0);
            assert_eq!(int.bits, 32);
        }
        other => panic!("expected an Int, got {other:?}"),
    }
}

#[test]
fn big_endian_blob_decodes_identically() {
    let mut le = BlobBuilder::new();
    let name = le.str_off("long unsigned int");
    le.typ(name, info(KIND_INT, 0, false), 8, &[0x40]);

    let mut be = BlobBuilder::big_endian();
    let name = be.str_off("long unsigned int");
    be.typ(name, info(KIND_INT, 0, false), 8, &[0x40]);

    assert_eq!(parse(&le).types(), parse(&be).types());
}

#[test]
fn invalid_magic() {
    let err = Btf::from_bytes(&[0x12, 0x34, 0, 0, 0, 0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMagicValue);
}

#[test]
fn truncated_header() {
    let err = Btf::from_bytes(&[0x9f]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);

    // Valid magic but nothing behind it.
    let err = Btf::from_bytes(&[0x9f, 0xeb, 1, 0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);
}

#[test]
fn int_rejects_conflicting_encodings() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("bad");
    // Signed and char at the same time.
    b.typ(name, info(KIND_INT, 0, false), 4, &[0x0300_0020]);

    let err = parse_err(&b);
    assert_eq!(err.kind(), ErrorKind::InvalidTypeEncoding(BtfKind::Int));
    assert_eq!(err.range(), Some(FileRange { offset: 24, size: 16 }));
}

#[test]
fn int_rejects_bad_sizes_and_widths() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_INT, 0, false), 3, &[0x20]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Int)
    );

    // 64 bits do not fit a 4-byte integer.
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x40]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Int)
    );

    // Offset plus width crosses the storage unit.
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x0010_0018]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Int)
    );
}

#[test]
fn ptr_and_qualifiers() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_PTR, 0, false), 3, &[]);
    b.typ(0, info(KIND_CONST, 0, false), 1, &[]);
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x20]);

    let btf = parse(&b);
    assert!(matches!(&btf.types()[1], BtfType::Ptr(p) if p.type_id == 3));
    assert!(matches!(&btf.types()[2], BtfType::Const(c) if c.type_id == 1));
}

#[test]
fn ptr_rejects_name() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("p");
    b.typ(name, info(KIND_PTR, 0, false), 1, &[]);

    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Ptr)
    );
}

#[test]
fn array() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x20]);
    b.typ(0, info(KIND_ARRAY, 0, false), 0, &[1, 1, 16]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::Array(array) => {
            assert_eq!(array.val_type_id, 1);
            assert_eq!(array.index_type_id, 1);
            assert_eq!(array.nelems, 16);
        }
        other => panic!("expected an Array, got {other:?}"),
    }

    // Arrays carry no size; a non-zero `size_or_type` word is malformed.
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_ARRAY, 0, false), 4, &[1, 1, 16]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Array)
    );
}

#[test]
fn typedef_requires_name() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_TYPEDEF, 0, false), 1, &[]);

    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Typedef)
    );
}

#[test]
fn struct_members_with_bitfields() {
    let mut b = BlobBuilder::new();
    let s = b.str_off("S");
    let a = b.str_off("a");
    let flags = b.str_off("flags");
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x20]);
    b.typ(
        s,
        info(KIND_STRUCT, 2, true),
        8,
        &[a, 1, 0, flags, 1, (5 << 24) | 32],
    );

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::Struct(composite) => {
            assert_eq!(composite.name.as_deref(), Some("S"));
            assert_eq!(composite.size, 8);
            assert_eq!(composite.members.len(), 2);

            assert_eq!(composite.members[0].name.as_deref(), Some("a"));
            assert_eq!(composite.members[0].bit_offset, 0);
            assert_eq!(composite.members[0].bitfield_size, Some(0));

            assert_eq!(composite.members[1].name.as_deref(), Some("flags"));
            assert_eq!(composite.members[1].bit_offset, 32);
            assert_eq!(composite.members[1].bitfield_size, Some(5));
        }
        other => panic!("expected a Struct, got {other:?}"),
    }
}

#[test]
fn struct_without_kind_flag_has_plain_offsets() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x20]);
    // Without the flag the whole offset word is a bit offset.
    b.typ(0, info(KIND_STRUCT, 1, false), 8, &[0, 1, (5 << 24) | 32]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::Struct(composite) => {
            assert_eq!(composite.members[0].bit_offset, (5 << 24) | 32);
            assert_eq!(composite.members[0].bitfield_size, None);
        }
        other => panic!("expected a Struct, got {other:?}"),
    }
}

#[test]
fn enum_values() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("E");
    let zero = b.str_off("ZERO");
    let minus = b.str_off("MINUS");
    b.typ(
        name,
        info(KIND_ENUM, 2, false),
        4,
        &[zero, 0, minus, (-1i32) as u32],
    );

    let btf = parse(&b);
    match &btf.types()[1] {
        BtfType::Enum(e) => {
            assert_eq!(e.name.as_deref(), Some("E"));
            assert_eq!(e.values.len(), 2);
            assert_eq!(e.values[1].name, "MINUS");
            assert_eq!(e.values[1].value, -1);
        }
        other => panic!("expected an Enum, got {other:?}"),
    }
}

#[test]
fn enum_rejects_unnamed_value_and_bad_size() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(KIND_ENUM, 1, false), 4, &[0, 7]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Enum)
    );

    let mut b = BlobBuilder::new();
    let name = b.str_off("A");
    b.typ(0, info(KIND_ENUM, 1, false), 16, &[name, 7]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Enum)
    );
}

#[test]
fn variadic_func_proto() {
    let mut b = BlobBuilder::new();
    let a = b.str_off("a");
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x0100_0020]);
    b.typ(0, info(KIND_FUNC_PROTO, 2, false), 1, &[a, 1, 0, 0]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::FuncProto(proto) => {
            assert!(proto.is_variadic);
            assert_eq!(proto.ret_type_id, 1);
            assert_eq!(proto.params.len(), 1);
            assert_eq!(proto.params[0].name.as_deref(), Some("a"));
            assert_eq!(proto.params[0].type_id, 1);
        }
        other => panic!("expected a FuncProto, got {other:?}"),
    }
}

#[test]
fn func_proto_keeps_named_trailing_param() {
    let mut b = BlobBuilder::new();
    let a = b.str_off("a");
    let z = b.str_off("z");
    b.typ(0, info(KIND_INT, 0, false), 4, &[0x20]);
    b.typ(0, info(KIND_FUNC_PROTO, 2, false), 0, &[a, 1, z, 0]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::FuncProto(proto) => {
            assert!(!proto.is_variadic);
            assert_eq!(proto.params.len(), 2);
        }
        other => panic!("expected a FuncProto, got {other:?}"),
    }
}

#[test]
fn func_linkage() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("do_exit");
    b.typ(0, info(KIND_FUNC_PROTO, 0, false), 0, &[]);
    b.typ(name, info(KIND_FUNC, 1, false), 1, &[]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::Func(func) => {
            assert_eq!(func.name, "do_exit");
            assert_eq!(func.proto_type_id, 1);
            assert_eq!(func.linkage, FuncLinkage::Global);
        }
        other => panic!("expected a Func, got {other:?}"),
    }

    // Only static/global/extern are valid linkage values.
    let mut b = BlobBuilder::new();
    let name = b.str_off("f");
    b.typ(name, info(KIND_FUNC, 3, false), 1, &[]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Func)
    );
}

#[test]
fn fwd_union_bit() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("sem_undo");
    b.typ(name, info(KIND_FWD, 0, true), 0, &[]);

    let btf = parse(&b);
    match &btf.types()[1] {
        BtfType::Fwd(fwd) => {
            assert_eq!(fwd.name, "sem_undo");
            assert_eq!(fwd.kind, BtfFwdKind::Union);
        }
        other => panic!("expected a Fwd, got {other:?}"),
    }

    let mut b = BlobBuilder::new();
    let name = b.str_off("bad");
    b.typ(name, info(KIND_FWD, 0, false), 4, &[]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Fwd)
    );
}

#[test]
fn float_sizes() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("long double");
    b.typ(name, info(KIND_FLOAT, 0, false), 16, &[]);

    let btf = parse(&b);
    assert!(matches!(&btf.types()[1], BtfType::Float(f) if f.size == 16));

    let mut b = BlobBuilder::new();
    let name = b.str_off("odd");
    b.typ(name, info(KIND_FLOAT, 0, false), 3, &[]);
    assert_eq!(
        parse_err(&b).kind(),
        ErrorKind::InvalidTypeEncoding(BtfKind::Float)
    );
}

#[test]
fn var_and_datasec() {
    let mut b = BlobBuilder::new();
    let var_name = b.str_off("jiffies");
    let sec_name = b.str_off(".data");
    b.typ(0, info(KIND_INT, 0, false), 8, &[0x40]);
    b.typ(var_name, info(KIND_VAR, 0, false), 1, &[1]);
    b.typ(sec_name, info(KIND_DATASEC, 1, false), 8, &[2, 0, 8]);

    let btf = parse(&b);
    match &btf.types()[2] {
        BtfType::Var(var) => {
            assert_eq!(var.name, "jiffies");
            assert_eq!(var.type_id, 1);
            assert_eq!(var.linkage, 1);
        }
        other => panic!("expected a Var, got {other:?}"),
    }
    match &btf.types()[3] {
        BtfType::DataSec(sec) => {
            assert_eq!(sec.name, ".data");
            assert_eq!(sec.size, 8);
            assert_eq!(sec.vars.len(), 1);
            assert_eq!(sec.vars[0].size, 8);
        }
        other => panic!("expected a DataSec, got {other:?}"),
    }
}

#[test]
fn kind_out_of_range() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(17, 0, false), 0, &[]);

    let err = parse_err(&b);
    assert_eq!(err.kind(), ErrorKind::InvalidBtfKind);
    assert_eq!(err.range(), Some(FileRange { offset: 24, size: 12 }));
}

#[test]
fn void_kind_is_unsupported_in_type_section() {
    let mut b = BlobBuilder::new();
    b.typ(0, info(0, 0, false), 0, &[]);

    assert_eq!(parse_err(&b).kind(), ErrorKind::UnsupportedBtfKind);
}

#[test]
fn truncated_record_payload() {
    let mut b = BlobBuilder::new();
    // An Int whose 4-byte payload is missing entirely.
    b.typ(0, info(KIND_INT, 0, false), 4, &[]);

    let err = parse_err(&b);
    assert_eq!(err.kind(), ErrorKind::IoError);
    assert_eq!(err.range(), Some(FileRange { offset: 36, size: 4 }));
}

#[test]
fn ids_continue_across_blobs() {
    let mut b0 = BlobBuilder::new();
    let name = b0.str_off("int");
    b0.typ(name, info(KIND_INT, 0, false), 4, &[0x0100_0020]);
    b0.typ(0, info(KIND_PTR, 0, false), 1, &[]);

    let mut b1 = BlobBuilder::new();
    b1.typ(0, info(KIND_PTR, 0, false), 1, &[]);

    let blobs = [b0.build(), b1.build()];
    let btf = Btf::from_bytes_list(&[blobs[0].as_slice(), blobs[1].as_slice()]).unwrap();

    assert_eq!(btf.len(), 4);
    assert_eq!(btf.kind_by_id(0), Some(BtfKind::Void));
    assert_eq!(btf.kind_by_id(1), Some(BtfKind::Int));
    assert_eq!(btf.kind_by_id(2), Some(BtfKind::Ptr));
    assert_eq!(btf.kind_by_id(3), Some(BtfKind::Ptr));
}

#[test]
fn strings_resolve_across_blobs() {
    let mut b0 = BlobBuilder::new();
    let name = b0.str_off("int");
    b0.str_off("abcd");
    b0.typ(name, info(KIND_INT, 0, false), 4, &[0x0100_0020]);
    let base = b0.str_len();
    assert_eq!(base, 10);

    let mut b1 = BlobBuilder::new();
    b1.str_off("m");
    let local = b1.str_off("tcp_sock");
    b1.typ(base + local, info(KIND_TYPEDEF, 0, false), 1, &[]);

    let blobs = [b0.build(), b1.build()];
    let btf = Btf::from_bytes_list(&[blobs[0].as_slice(), blobs[1].as_slice()]).unwrap();

    match &btf.types()[2] {
        BtfType::Typedef(td) => {
            assert_eq!(td.name, "tcp_sock");
            assert_eq!(td.type_id, 1);
        }
        other => panic!("expected a Typedef, got {other:?}"),
    }
}

#[test]
fn string_offset_past_all_tables() {
    let mut b = BlobBuilder::new();
    b.typ(4096, info(KIND_TYPEDEF, 0, false), 0, &[]);

    let err = parse_err(&b);
    assert_eq!(err.kind(), ErrorKind::InvalidStringOffset);
    assert_eq!(err.range(), Some(FileRange { offset: 4096, size: 0 }));
}

#[test]
fn from_path() {
    let mut b = BlobBuilder::new();
    let name = b.str_off("char");
    b.typ(name, info(KIND_INT, 0, false), 1, &[0x0200_0008]);

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&b.build()).unwrap();
    file.flush().unwrap();

    let btf = Btf::from_path(file.path()).unwrap();
    assert_eq!(btf.len(), 2);
    assert!(matches!(&btf.types()[1], BtfType::Int(i) if i.encoding == IntEncoding::Char));
}

#[test]
fn missing_file() {
    let err = Btf::from_path("/this/path/does/not/exist.btf").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[test]
fn empty_store() {
    let b = BlobBuilder::new();
    let btf = parse(&b);
    assert!(btf.is_empty());
    assert_eq!(btf.len(), 1);
    assert_eq!(btf.type_by_id(0), Some(&BtfType::Void));
    assert_eq!(btf.type_by_id(1), None);
}

#[test]
fn dump_display_format() {
    let mut b = BlobBuilder::new();
    let int_name = b.str_off("int");
    let enum_name = b.str_off("E");
    let val_name = b.str_off("MINUS");
    let var_name = b.str_off("v");
    b.typ(int_name, info(KIND_INT, 0, false), 4, &[0x0100_0020]);
    b.typ(enum_name, info(KIND_ENUM, 1, false), 4, &[val_name, (-1i32) as u32]);
    b.typ(0, info(KIND_FUNC_PROTO, 1, false), 1, &[0, 0]);
    b.typ(var_name, info(KIND_VAR, 0, false), 1, &[1]);

    let btf = parse(&b);
    assert_eq!(
        btf.types()[1].to_string(),
        "'int' size=4 bits_offset=0 nr_bits=32 encoding=SIGNED"
    );
    assert_eq!(
        btf.types()[2].to_string(),
        "'E' size=4 vlen=1\n\t'MINUS' val=4294967295"
    );
    assert_eq!(
        btf.types()[3].to_string(),
        "'(anon)' ret_type_id=1 vlen=1\n\t'(anon)' type_id=0"
    );
    assert_eq!(btf.types()[4].to_string(), "'v' type_id=1, linkage=global-alloc");
    assert_eq!(btf.types()[3].kind().to_string(), "FUNC_PROTO");
}
