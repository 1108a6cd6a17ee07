//! Renders `rpc_test.rs`: a loopback round-trip test exercising every
//! method of the generated shim pair with synthesized fixture values.
//!
//! Fixture synthesis is deterministic (numbers are `3`, strings are
//! `"fixture"`, bytes are `[1, 2, 3]`) and depth-limited so self- and
//! deeply-nested messages terminate. Equality is asserted for scalar-like
//! values; structured values assert successful transport only.

use super::{FIXTURE_DEPTH, domain_imports, rust_field_type};
use crate::model::{Field, FieldKind, ReturnKind, Service};

pub fn render(service: &Service) -> String {
    let name = &service.name;
    let mut out = String::new();
    out.push_str("// Code generated by loopp-gen. DO NOT EDIT.\n\n");
    out.push_str(&format!(
        "use super::rpc::{{{name}Client, {name}Server}};\n"
    ));
    out.push_str("use loopp::Result;\n");
    out.push_str("use std::sync::Arc;\n");
    out.push_str(&format!(
        "use {}::{{{}}};\n\n",
        service.rust_use,
        domain_imports(service).join(", ")
    ));

    render_fixture_impl(&mut out, service);
    render_round_trip(&mut out, service);
    out
}

fn render_fixture_impl(out: &mut String, service: &Service) {
    let tr = &service.trait_name;
    out.push_str("struct Fixture;\n\n#[tonic::async_trait]\n");
    out.push_str(&format!("impl {tr} for Fixture {{\n"));
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
        for param in &method.params {
            match assert_expr(param, service) {
                Some(expected) => out.push_str(&format!(
                    "        assert_eq!({}, {expected});\n",
                    param.rust_name
                )),
                None => out.push_str(&format!("        let _ = {};\n", param.rust_name)),
            }
        }
        match &method.ret {
            ReturnKind::Unit => out.push_str("        Ok(())\n"),
            ReturnKind::Value(field) => out.push_str(&format!(
                "        Ok({})\n",
                fixture_field(field, service, FIXTURE_DEPTH, false)
            )),
        }
        out.push_str("    }\n\n");
    }
    out.push_str("}\n\n");
}

fn render_round_trip(out: &mut String, service: &Service) {
    let name = &service.name;
    out.push_str("#[tokio::test]\nasync fn round_trip() {\n");
    out.push_str(
        "    let listener = tokio::net::TcpListener::bind(\"127.0.0.1:0\")\n        .await\n        .expect(\"bind\");\n    let addr = listener.local_addr().expect(\"local addr\");\n",
    );
    out.push_str(&format!(
        "    tokio::spawn(\n        tonic::transport::Server::builder()\n            .add_service({name}Server::new(Arc::new(Fixture)).into_service())\n            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener)),\n    );\n"
    ));
    out.push_str(
        "    let channel = tonic::transport::Endpoint::try_from(format!(\"http://{addr}\"))\n        .expect(\"endpoint\")\n        .connect()\n        .await\n        .expect(\"connect\");\n",
    );
    out.push_str(&format!("    let client = {name}Client::new(channel);\n\n"));

    for method in &service.methods {
        let args = method
            .params
            .iter()
            .map(|p| fixture_field(p, service, FIXTURE_DEPTH, true))
            .collect::<Vec<_>>()
            .join(", ");
        match &method.ret {
            ReturnKind::Unit => {
                out.push_str(&format!(
                    "    client.{m}({args}).await.expect(\"{m}\");\n",
                    m = method.rust_name
                ));
            }
            ReturnKind::Value(field) => {
                out.push_str(&format!(
                    "    let result = client.{m}({args}).await.expect(\"{m}\");\n",
                    m = method.rust_name
                ));
                match assert_expr(field, service) {
                    Some(expected) => {
                        out.push_str(&format!("    assert_eq!(result, {expected});\n"));
                    }
                    None => out.push_str("    let _ = result;\n"),
                }
            }
        }
    }
    out.push_str("}\n");
}

/// The fixture literal for one field, as an argument (`param`) or an owned
/// return value.
fn fixture_field(field: &Field, service: &Service, depth: usize, param: bool) -> String {
    if field.repeated {
        let elem = fixture_value(&field.kind, service, depth);
        if let Some(n) = field.array_len {
            return format!("[{elem}; {n}]");
        }
        if field.borrowed && param {
            return format!("&[{elem}]");
        }
        if depth == 0 {
            return "Vec::new()".to_string();
        }
        return format!("vec![{elem}]");
    }
    if field.optional {
        if depth == 0 {
            return "None".to_string();
        }
        return format!("Some({})", fixture_value(&field.kind, service, depth));
    }
    match &field.kind {
        FieldKind::Bytes { fixed_len: None } if field.borrowed && param => {
            "&[1u8, 2, 3]".to_string()
        }
        FieldKind::Scalar(scalar) if scalar.rust == "String" && field.borrowed && param => {
            "\"fixture\"".to_string()
        }
        _ => fixture_value(&field.kind, service, depth),
    }
}

/// The owned fixture literal for one element.
fn fixture_value(kind: &FieldKind, service: &Service, depth: usize) -> String {
    match kind {
        FieldKind::Scalar(scalar) => match scalar.rust {
            "bool" => "true".to_string(),
            "String" => "\"fixture\".to_string()".to_string(),
            "f32" => "3.0f32".to_string(),
            "f64" => "3.0f64".to_string(),
            rust => format!("3{rust}"),
        },
        FieldKind::Bytes { fixed_len: Some(n) } => format!("[3u8; {n}]"),
        FieldKind::Bytes { fixed_len: None } => "vec![1u8, 2, 3]".to_string(),
        FieldKind::Message(name) => {
            let msg = service
                .messages
                .iter()
                .find(|m| &m.rust_name == name)
                .expect("message is always registered before rendering");
            let next = depth.saturating_sub(1);
            let fields = msg
                .fields
                .iter()
                .map(|f| {
                    format!(
                        "{}: {}",
                        f.rust_name,
                        fixture_field(f, service, next, false)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name} {{ {fields} }}")
        }
        FieldKind::Enum(idx) => {
            let mapping = &service.enums[*idx];
            format!("{}::{}", mapping.rust_type, mapping.values[0])
        }
        FieldKind::External(_) => "Default::default()".to_string(),
        FieldKind::Oneof(idx) => {
            let oneof = &service.oneofs[*idx];
            let (variant, case) = &oneof.cases[0];
            let case_fixture = fixture_value(
                &FieldKind::Message(case.clone()),
                service,
                depth.saturating_sub(1),
            );
            format!("{}::{variant}({case_fixture})", oneof.rust_enum)
        }
    }
}

/// The expected-value expression for fields whose equality the generated
/// test can assert directly. Structured values return `None` and are only
/// checked for successful transport.
fn assert_expr(field: &Field, service: &Service) -> Option<String> {
    if field.array_len.is_some() {
        return None;
    }
    let simple = matches!(
        &field.kind,
        FieldKind::Scalar(_) | FieldKind::Bytes { .. }
    );
    if !simple {
        return None;
    }
    if field.repeated && field.borrowed {
        return Some(format!(
            "[{}].as_slice()",
            fixture_value(&field.kind, service, FIXTURE_DEPTH)
        ));
    }
    if field.borrowed {
        return Some(match &field.kind {
            FieldKind::Bytes { .. } => "[1u8, 2, 3].as_slice()".to_string(),
            _ => "\"fixture\"".to_string(),
        });
    }
    Some(fixture_field(field, service, FIXTURE_DEPTH, false))
}
