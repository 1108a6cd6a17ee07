//! Renders `rpc.rs`: the client/server shim pair and the bidirectional
//! message converters.
//!
//! The generated file defers message/stub codegen to
//! `tonic::include_proto!` (driven by the `.proto` artifact) and contains
//! only the domain-facing layer: a client implementing the source trait
//! over a channel, a server delegating to a boxed implementation, and
//! `*_to_proto`/`*_from_proto` converters with length checks for every
//! fixed-size field.

use super::{domain_imports, rust_field_type};
use crate::model::{Field, FieldKind, ReturnKind, Service, pascal_to_snake};

pub fn render(service: &Service) -> String {
    let mut out = String::new();
    out.push_str("// Code generated by loopp-gen. DO NOT EDIT.\n\n");
    out.push_str(&format!(
        "pub mod proto {{\n    tonic::include_proto!(\"{}\");\n}}\n\n",
        service.proto_pkg
    ));

    out.push_str("use loopp::{Error, Result};\n");
    out.push_str("use std::sync::Arc;\n");
    out.push_str("use tonic::transport::Channel;\n");
    out.push_str("use tonic::{Request, Response, Status};\n");
    for external in &service.externals {
        if let Some(import) = &external.import {
            out.push_str(&format!("use {import};\n"));
        }
    }
    out.push_str(&format!(
        "use {}::{{{}}};\n\n",
        service.rust_use,
        domain_imports(service).join(", ")
    ));

    for msg in &service.messages {
        render_message_converters(&mut out, &msg.rust_name, &msg.fields, service);
    }
    for idx in 0..service.oneofs.len() {
        render_oneof_converters(&mut out, idx, service);
    }

    render_client(&mut out, service);
    render_server(&mut out, service);
    out
}

fn render_message_converters(out: &mut String, name: &str, fields: &[Field], service: &Service) {
    let snake = pascal_to_snake(name);

    out.push_str(&format!(
        "pub fn {snake}_to_proto(value: {name}) -> proto::{name} {{\n    proto::{name} {{\n"
    ));
    for field in fields {
        out.push_str(&format!(
            "        {}: {},\n",
            field.rust_name,
            encode_field(field, service, &format!("value.{}", field.rust_name))
        ));
    }
    out.push_str("    }\n}\n\n");

    out.push_str(&format!(
        "pub fn {snake}_from_proto(value: proto::{name}) -> Result<{name}> {{\n"
    ));
    for field in fields {
        out.push_str(&decode_field_stmts(
            field,
            service,
            &format!("value.{}", field.rust_name),
            &field.rust_name,
            "    ",
        ));
    }
    out.push_str(&format!("    Ok({name} {{\n"));
    for field in fields {
        out.push_str(&format!("        {},\n", field.rust_name));
    }
    out.push_str("    })\n}\n\n");
}

fn render_oneof_converters(out: &mut String, idx: usize, service: &Service) {
    let oneof = &service.oneofs[idx];
    let snake = pascal_to_snake(&oneof.container);
    let module = pascal_to_snake(&oneof.container);
    let rust_enum = &oneof.rust_enum;
    let container = &oneof.container;

    out.push_str(&format!(
        "pub fn {snake}_to_proto(value: {rust_enum}) -> proto::{container} {{\n    proto::{container} {{\n        value: Some(match value {{\n"
    ));
    for (variant, case) in &oneof.cases {
        out.push_str(&format!(
            "            {rust_enum}::{variant}(v) => proto::{module}::Value::{variant}({}_to_proto(v)),\n",
            pascal_to_snake(case)
        ));
    }
    out.push_str("        }),\n    }\n}\n\n");

    out.push_str(&format!(
        "pub fn {snake}_from_proto(value: proto::{container}) -> Result<{rust_enum}> {{\n    Ok(match value.value.ok_or_else(|| Error::required(\"{container}\"))? {{\n"
    ));
    for (variant, case) in &oneof.cases {
        out.push_str(&format!(
            "        proto::{module}::Value::{variant}(v) => {rust_enum}::{variant}({}_from_proto(v)?),\n",
            pascal_to_snake(case)
        ));
    }
    out.push_str("    })\n}\n\n");
}

fn render_client(out: &mut String, service: &Service) {
    let name = &service.name;
    let tr = &service.trait_name;
    let snake = pascal_to_snake(name);

    out.push_str(&format!(
        "/// [`{tr}`] implemented over a gRPC channel.\npub struct {name}Client {{\n    channel: Channel,\n}}\n\nimpl {name}Client {{\n    pub fn new(channel: Channel) -> Self {{\n        Self {{ channel }}\n    }}\n}}\n\n#[tonic::async_trait]\nimpl {tr} for {name}Client {{\n"
    ));
    for method in &service.methods {
        let params = method
            .params
            .iter()
            .map(|p| format!(", {}: {}", p.rust_name, rust_field_type(p, service)))
            .collect::<String>();
        let ret = match &method.ret {
            ReturnKind::Unit => "()".to_string(),
            ReturnKind::Value(field) => rust_field_type(field, service),
        };
        out.push_str(&format!(
            "    async fn {}(&self{params}) -> Result<{ret}> {{\n",
            method.rust_name
        ));
        out.push_str(&format!(
            "        let request = proto::{} {{\n",
            method.request_name()
        ));
        for param in &method.params {
            out.push_str(&format!(
                "            {}: {},\n",
                param.rust_name,
                encode_field(param, service, &param.rust_name)
            ));
        }
        out.push_str("        };\n");
        out.push_str(&format!(
            "        let reply = proto::{snake}_client::{name}Client::new(self.channel.clone())\n            .{}(request)\n            .await\n            .map_err(Error::from)?\n            .into_inner();\n",
            method.rust_name
        ));
        match &method.ret {
            ReturnKind::Unit => {
                out.push_str("        let _ = reply;\n        Ok(())\n");
            }
            ReturnKind::Value(field) => {
                out.push_str(&decode_field_stmts(
                    field,
                    service,
                    "reply.result",
                    "result",
                    "        ",
                ));
                out.push_str("        Ok(result)\n");
            }
        }
        out.push_str("    }\n\n");
    }
    out.push_str("}\n\n");
}

fn render_server(out: &mut String, service: &Service) {
    let name = &service.name;
    let tr = &service.trait_name;
    let snake = pascal_to_snake(name);

    out.push_str(&format!(
        "/// Serves a concrete [`{tr}`] implementation over gRPC, owning its lifetime.\npub struct {name}Server {{\n    inner: Arc<dyn {tr}>,\n}}\n\nimpl {name}Server {{\n    pub fn new(inner: Arc<dyn {tr}>) -> Self {{\n        Self {{ inner }}\n    }}\n\n    pub fn into_service(self) -> proto::{snake}_server::{name}Server<Self> {{\n        proto::{snake}_server::{name}Server::new(self)\n    }}\n}}\n\n#[tonic::async_trait]\nimpl proto::{snake}_server::{name} for {name}Server {{\n"
    ));
    for method in &service.methods {
        out.push_str(&format!(
            "    async fn {}(\n        &self,\n        request: Request<proto::{}>,\n    ) -> std::result::Result<Response<proto::{}>, Status> {{\n",
            method.rust_name,
            method.request_name(),
            method.reply_name()
        ));
        if method.params.is_empty() {
            out.push_str("        let _ = request.into_inner();\n");
        } else {
            out.push_str("        let req = request.into_inner();\n");
            for param in &method.params {
                out.push_str(&decode_field_stmts(
                    param,
                    service,
                    &format!("req.{}", param.rust_name),
                    &param.rust_name,
                    "        ",
                ));
            }
        }
        let args = method
            .params
            .iter()
            .map(|p| {
                if p.borrowed {
                    format!("&{}", p.rust_name)
                } else {
                    p.rust_name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        match &method.ret {
            ReturnKind::Unit => {
                out.push_str(&format!(
                    "        self.inner.{}({args}).await?;\n        Ok(Response::new(proto::{} {{}}))\n",
                    method.rust_name,
                    method.reply_name()
                ));
            }
            ReturnKind::Value(field) => {
                out.push_str(&format!(
                    "        let result = self.inner.{}({args}).await?;\n",
                    method.rust_name
                ));
                out.push_str(&format!(
                    "        Ok(Response::new(proto::{} {{\n            result: {},\n        }}))\n",
                    method.reply_name(),
                    encode_field(field, service, "result")
                ));
            }
        }
        out.push_str("    }\n\n");
    }
    out.push_str("}\n");
}

/// Expression converting one domain element (already owned) to its wire
/// value.
fn encode_value(kind: &FieldKind, service: &Service, src: &str) -> String {
    match kind {
        FieldKind::Scalar(scalar) if scalar.widened => match scalar.proto {
            "uint32" => format!("u32::from({src})"),
            "int32" => format!("i32::from({src})"),
            other => unreachable!("widened scalar with wire type {other}"),
        },
        FieldKind::Scalar(_) => src.to_string(),
        FieldKind::Bytes { fixed_len: Some(_) } => format!("{src}.to_vec()"),
        FieldKind::Bytes { fixed_len: None } => src.to_string(),
        FieldKind::Message(name) => format!("{}_to_proto({src})", pascal_to_snake(name)),
        FieldKind::Enum(idx) => {
            let mapping = &service.enums[*idx];
            let arms = mapping
                .values
                .iter()
                .map(|v| {
                    format!(
                        "{}::{v} => proto::{}::{v}",
                        mapping.rust_type, mapping.proto_type
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("(match {src} {{ {arms} }}) as i32")
        }
        FieldKind::External(idx) => format!("{}({src})", service.externals[*idx].to_proto),
        FieldKind::Oneof(idx) => format!(
            "{}_to_proto({src})",
            pascal_to_snake(&service.oneofs[*idx].container)
        ),
    }
}

/// Expression converting a whole field (with its repeated/optional/borrowed
/// shell) into the wire representation.
fn encode_field(field: &Field, service: &Service, src: &str) -> String {
    if field.repeated {
        let elem = encode_value(&field.kind, service, "v");
        let iter = if field.borrowed {
            format!("{src}.iter().cloned()")
        } else {
            format!("{src}.into_iter()")
        };
        return format!("{iter}.map(|v| {elem}).collect()");
    }
    if field.optional {
        let elem = encode_value(&field.kind, service, "v");
        return format!("{src}.map(|v| {elem})");
    }
    match &field.kind {
        FieldKind::Message(_) | FieldKind::Oneof(_) => {
            format!("Some({})", encode_value(&field.kind, service, src))
        }
        FieldKind::Bytes { fixed_len: None } if field.borrowed => format!("{src}.to_vec()"),
        FieldKind::Scalar(scalar) if scalar.rust == "String" && field.borrowed => {
            format!("{src}.to_string()")
        }
        _ => encode_value(&field.kind, service, src),
    }
}

/// Expression decoding one wire element into its domain value. `element`
/// means the source is already unwrapped (repeated/optional position), so
/// message-typed values are not behind an `Option`.
fn decode_value(
    kind: &FieldKind,
    service: &Service,
    src: &str,
    label: &str,
    element: bool,
) -> String {
    match kind {
        FieldKind::Scalar(scalar) if scalar.widened => format!(
            "{}::try_from({src}).map_err(|_| Error::invalid_value(\"{label}\", \"out of range\"))?",
            scalar.rust
        ),
        FieldKind::Scalar(_) => src.to_string(),
        FieldKind::Bytes {
            fixed_len: Some(n),
        } => format!(
            "{{ let raw = {src}; let len = raw.len(); raw.try_into().map_err(|_| Error::invalid_length(\"{label}\", {n}, len))? }}"
        ),
        FieldKind::Bytes { fixed_len: None } => src.to_string(),
        FieldKind::Message(name) => {
            let snake = pascal_to_snake(name);
            if element {
                format!("{snake}_from_proto({src})?")
            } else {
                format!(
                    "{snake}_from_proto({src}.ok_or_else(|| Error::required(\"{label}\"))?)?"
                )
            }
        }
        FieldKind::Enum(idx) => {
            let mapping = &service.enums[*idx];
            let arms = mapping
                .values
                .iter()
                .map(|v| {
                    format!(
                        "proto::{}::{v} => {}::{v}",
                        mapping.proto_type, mapping.rust_type
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "(match proto::{}::try_from({src}).map_err(|_| Error::invalid_value(\"{label}\", \"unknown discriminant\"))? {{ {arms} }})",
                mapping.proto_type
            )
        }
        FieldKind::External(idx) => {
            format!("{}({src})?", service.externals[*idx].from_proto)
        }
        FieldKind::Oneof(idx) => {
            let snake = pascal_to_snake(&service.oneofs[*idx].container);
            if element {
                format!("{snake}_from_proto({src})?")
            } else {
                format!(
                    "{snake}_from_proto({src}.ok_or_else(|| Error::required(\"{label}\"))?)?"
                )
            }
        }
    }
}

/// Statements binding `var` to the decoded domain value of a field,
/// validating lengths and discriminants along the way.
fn decode_field_stmts(
    field: &Field,
    service: &Service,
    src: &str,
    var: &str,
    indent: &str,
) -> String {
    let label = &field.rust_name;
    if field.repeated {
        let elem = decode_value(&field.kind, service, "v", label, true);
        if let Some(n) = field.array_len {
            let base = super::rust_base_type(&field.kind, service);
            return format!(
                "{indent}let mut raw_{var} = Vec::with_capacity({src}.len());\n{indent}for v in {src} {{\n{indent}    raw_{var}.push({elem});\n{indent}}}\n{indent}let {var}: [{base}; {n}] = raw_{var}\n{indent}    .try_into()\n{indent}    .map_err(|v: Vec<_>| Error::invalid_length(\"{label}\", {n}, v.len()))?;\n"
            );
        }
        return format!(
            "{indent}let mut {var} = Vec::with_capacity({src}.len());\n{indent}for v in {src} {{\n{indent}    {var}.push({elem});\n{indent}}}\n"
        );
    }
    if field.optional {
        let elem = decode_value(&field.kind, service, "v", label, true);
        return format!(
            "{indent}let {var} = match {src} {{\n{indent}    Some(v) => Some({elem}),\n{indent}    None => None,\n{indent}}};\n"
        );
    }
    let value = decode_value(&field.kind, service, src, label, false);
    format!("{indent}let {var} = {value};\n")
}
