#![allow(non_camel_case_types)]

use scroll_derive::Pread as DerivePread;
use scroll_derive::Pwrite;
use scroll_derive::SizeWith;

/// Magic value as read with little-endian byte order.
pub(crate) const BTF_MAGIC: u16 = 0xEB9F;
/// The same magic read from a big-endian blob.
pub(crate) const BTF_MAGIC_SWAPPED: u16 = 0x9FEB;

/// Size of the common record header on disk.
pub(crate) const BTF_TYPE_HEADER_SIZE: usize = 12;

/// All offsets are in bytes relative to the end of this header.
#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_header {
    pub magic: u16,
    pub version: u8,
    pub flags: u8,
    pub hdr_len: u32,
    pub type_off: u32,
    pub type_len: u32,
    pub str_off: u32,
    pub str_len: u32,
}

/// Common 12-byte record header; `size_or_type` is a union in the kernel.
#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_type {
    pub name_off: u32,
    pub info: u32,
    pub size_or_type: u32,
}

#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_array {
    pub val_type_id: u32,
    pub idx_type_id: u32,
    pub nelems: u32,
}

#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_member {
    pub name_off: u32,
    pub type_id: u32,
    pub offset: u32,
}

#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_enum {
    pub name_off: u32,
    pub val: i32,
}

#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_param {
    pub name_off: u32,
    pub type_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, DerivePread, Pwrite, SizeWith)]
pub(crate) struct btf_datasec_var {
    pub type_id: u32,
    pub offset: u32,
    pub size: u32,
}
