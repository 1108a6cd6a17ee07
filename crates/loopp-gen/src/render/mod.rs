//! Rendering of the three output artifacts from one service model.
//!
//! All three renderers are pure string builders over [`Service`]; nothing
//! touches the filesystem here, so a failure in any renderer leaves no
//! partial output behind.

pub mod proto;
pub mod rust;
pub mod tests;

use crate::model::{Field, FieldKind, Service};

/// Maximum nesting depth for synthesized fixture values. Self-referential
/// messages bottom out with empty/absent values at this depth.
pub(crate) const FIXTURE_DEPTH: usize = 3;

/// The proto spelling of a field's element type.
pub(crate) fn proto_type(field: &Field, service: &Service) -> String {
    match &field.kind {
        FieldKind::Scalar(scalar) => scalar.proto.to_string(),
        FieldKind::Bytes { .. } => "bytes".to_string(),
        FieldKind::Message(name) => name.clone(),
        FieldKind::Enum(idx) => service.enums[*idx].proto_type.clone(),
        FieldKind::External(idx) => service.externals[*idx].proto_type.clone(),
        FieldKind::Oneof(idx) => service.oneofs[*idx].container.clone(),
    }
}

/// The Rust spelling of a field's element type, without the
/// repeated/optional/borrowed shell.
pub(crate) fn rust_base_type(kind: &FieldKind, service: &Service) -> String {
    match kind {
        FieldKind::Scalar(scalar) => scalar.rust.to_string(),
        FieldKind::Bytes { fixed_len: Some(n) } => format!("[u8; {n}]"),
        FieldKind::Bytes { fixed_len: None } => "Vec<u8>".to_string(),
        FieldKind::Message(name) => name.clone(),
        FieldKind::Enum(idx) => service.enums[*idx].rust_type.clone(),
        FieldKind::External(idx) => service.externals[*idx].rust_type.clone(),
        FieldKind::Oneof(idx) => service.oneofs[*idx].rust_enum.clone(),
    }
}

/// The Rust spelling of a parameter or result type as it appears in the
/// source trait.
pub(crate) fn rust_field_type(field: &Field, service: &Service) -> String {
    let base = rust_base_type(&field.kind, service);
    if field.repeated {
        if let Some(n) = field.array_len {
            format!("[{base}; {n}]")
        } else if field.borrowed {
            format!("&[{base}]")
        } else {
            format!("Vec<{base}>")
        }
    } else if field.optional {
        format!("Option<{base}>")
    } else {
        match &field.kind {
            FieldKind::Bytes { fixed_len: None } if field.borrowed => "&[u8]".to_string(),
            FieldKind::Scalar(scalar) if scalar.rust == "String" && field.borrowed => {
                "&str".to_string()
            }
            _ => base,
        }
    }
}

/// Names from the source module the generated code must import: the trait,
/// every user message, every oneof enum, and configured enums with simple
/// (unpathed) names.
pub(crate) fn domain_imports(service: &Service) -> Vec<String> {
    let mut names = vec![service.trait_name.clone()];
    for msg in &service.messages {
        names.push(msg.rust_name.clone());
    }
    for oneof in &service.oneofs {
        names.push(oneof.rust_enum.clone());
    }
    for mapping in &service.enums {
        if !mapping.rust_type.contains("::") {
            names.push(mapping.rust_type.clone());
        }
    }
    names.sort();
    names.dedup();
    names
}
