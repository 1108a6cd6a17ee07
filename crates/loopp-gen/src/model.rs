//! In-memory description of one RPC service.
//!
//! Built once per generator run from trait introspection, rendered to the
//! three output artifacts, then discarded. Wire-tag determinism lives here:
//! fields are numbered by encounter order, and messages are memoized so a
//! type referenced from several methods is emitted exactly once.

use crate::config::{EnumMapping, ExternalType};

/// The whole service: everything the renderers need.
#[derive(Debug)]
pub struct Service {
    /// Proto service name.
    pub name: String,
    /// Source trait name.
    pub trait_name: String,
    pub proto_pkg: String,
    /// Rust path the generated code imports the trait and its types from.
    pub rust_use: String,
    pub methods: Vec<Method>,
    /// User messages in encounter order.
    pub messages: Vec<UserMessage>,
    /// Oneof containers in encounter order.
    pub oneofs: Vec<InterfaceOneof>,
    /// Config enums actually referenced by the trait.
    pub enums: Vec<EnumMapping>,
    /// Config externals actually referenced by the trait.
    pub externals: Vec<ExternalType>,
}

#[derive(Debug)]
pub struct Method {
    pub rust_name: String,
    pub proto_name: String,
    pub params: Vec<Field>,
    pub ret: ReturnKind,
}

impl Method {
    pub fn request_name(&self) -> String {
        format!("{}Request", self.proto_name)
    }

    pub fn reply_name(&self) -> String {
        format!("{}Reply", self.proto_name)
    }
}

#[derive(Debug)]
pub enum ReturnKind {
    Unit,
    Value(Field),
}

/// A struct referenced from a method signature, emitted as a generated
/// message.
#[derive(Debug)]
pub struct UserMessage {
    pub rust_name: String,
    pub fields: Vec<Field>,
}

/// A closed enum mapped to a tagged wire union.
#[derive(Debug)]
pub struct InterfaceOneof {
    pub rust_enum: String,
    pub container: String,
    /// `(variant_name, case_struct_name)` in wire-tag order.
    pub cases: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct Field {
    pub rust_name: String,
    pub tag: u32,
    pub kind: FieldKind,
    pub repeated: bool,
    pub optional: bool,
    /// The parameter was `&[u8]`, `&str`, or `&[T]`.
    pub borrowed: bool,
    /// Fixed-size scalar array `[T; N]`: repeated on the wire with a
    /// length-check obligation on decode.
    pub array_len: Option<usize>,
}

#[derive(Debug)]
pub enum FieldKind {
    Scalar(Scalar),
    Bytes { fixed_len: Option<usize> },
    /// Index of a [`UserMessage`] in `Service::messages`, by name.
    Message(String),
    /// Index into `Service::enums`.
    Enum(usize),
    /// Index into `Service::externals`.
    External(usize),
    /// Index into `Service::oneofs`.
    Oneof(usize),
}

#[derive(Debug)]
pub struct Scalar {
    /// The Rust spelling, e.g. `u16`.
    pub rust: &'static str,
    /// The proto wire type, e.g. `uint32`.
    pub proto: &'static str,
    /// The Rust type is narrower than the wire type; decoding needs a
    /// range check.
    pub widened: bool,
}

/// `token_prices_usd` -> `TokenPricesUsd`.
pub fn snake_to_pascal(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `TokenPricesUsd` -> `token_prices_usd`.
pub fn pascal_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `TokenPricesUsd` -> `TOKEN_PRICES_USD`.
pub fn screaming_snake(s: &str) -> String {
    pascal_to_snake(s).to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_conversions() {
        assert_eq!(snake_to_pascal("lookup"), "Lookup");
        assert_eq!(snake_to_pascal("token_prices_usd"), "TokenPricesUsd");
        assert_eq!(pascal_to_snake("Lookup"), "lookup");
        assert_eq!(pascal_to_snake("TokenPricesUsd"), "token_prices_usd");
        assert_eq!(screaming_snake("FeedSource"), "FEED_SOURCE");
    }

    #[test]
    fn pascal_round_trips_snake() {
        for name in ["a", "get_send_requests_between", "new_reporting_plugin"] {
            assert_eq!(pascal_to_snake(&snake_to_pascal(name)), name);
        }
    }
}
