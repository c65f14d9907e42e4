//! Small PDU encode/decode helper macros, built directly on `ironrdp_core`'s error-builder
//! traits (`Self::NAME`/`Self::FIXED_PART_SIZE` convention, matching `ironrdp-pdu`'s own PDU
//! structs throughout this crate's `pdu` module).

macro_rules! ensure_size {
    (in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if received < expected {
            return Err(::ironrdp_core::not_enough_bytes_err(Self::NAME, received, expected));
        }
    }};
}

macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        ensure_size!(in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

macro_rules! invalid_field_err {
    ($field:expr, $reason:expr) => {
        ::ironrdp_core::invalid_field_err::<::ironrdp_core::DecodeError>(Self::NAME, $field, $reason)
    };
}

macro_rules! cast_length {
    ($field:expr, $len:expr) => {{
        ::core::convert::TryFrom::try_from($len).map_err(|_| invalid_field_err!($field, "too many elements"))
    }};
}
