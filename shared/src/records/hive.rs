/// Whole-file envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HiveRecord {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Unnamed root of the tree; its children are the native root segments
    /// (`MACHINE`, `USER`, ...).
    #[prost(message, optional, tag = "2")]
    pub root: ::core::option::Option<KeyRecord>,
}

/// One key node and, recursively, its subtree.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyRecord {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "2")]
    pub class: ::core::option::Option<::prost::alloc::string::String>,
    /// FILETIME, 100ns ticks since 1601-01-01 UTC.
    #[prost(uint64, tag = "3")]
    pub last_write_time: u64,
    #[prost(message, repeated, tag = "4")]
    pub values: ::prost::alloc::vec::Vec<ValueRecord>,
    #[prost(message, repeated, tag = "5")]
    pub subkeys: ::prost::alloc::vec::Vec<KeyRecord>,
    /// Self-relative security descriptor, stored verbatim.
    #[prost(bytes = "vec", tag = "6")]
    pub security: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueRecord {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Raw `REG_*` type code.
    #[prost(uint32, tag = "2")]
    pub kind: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
