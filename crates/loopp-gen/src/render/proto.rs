//! Renders the `.proto` schema.
//!
//! Field numbers follow encounter order and are append-only from then on:
//! regenerating after adding a trait method or struct field only ever adds
//! new tags, it never renumbers existing ones.

use super::proto_type;
use crate::model::{Field, ReturnKind, Service, pascal_to_snake, screaming_snake};

pub fn render(service: &Service) -> String {
    let mut out = String::new();
    out.push_str("// Code generated by loopp-gen. DO NOT EDIT.\n");
    out.push_str(&format!(
        "// Service {} bridged from trait {}.\n",
        service.name, service.trait_name
    ));
    out.push_str("syntax = \"proto3\";\n\n");
    out.push_str(&format!("package {};\n\n", service.proto_pkg));

    for mapping in &service.enums {
        out.push_str(&format!("enum {} {{\n", mapping.proto_type));
        let prefix = screaming_snake(&mapping.proto_type);
        for (i, value) in mapping.values.iter().enumerate() {
            out.push_str(&format!("  {prefix}_{} = {i};\n", screaming_snake(value)));
        }
        out.push_str("}\n\n");
    }

    for msg in &service.messages {
        render_message(&mut out, &msg.rust_name, &msg.fields, service);
    }

    for oneof in &service.oneofs {
        out.push_str(&format!("message {} {{\n  oneof value {{\n", oneof.container));
        for (i, (variant, case)) in oneof.cases.iter().enumerate() {
            out.push_str(&format!(
                "    {case} {} = {};\n",
                pascal_to_snake(variant),
                i + 1
            ));
        }
        out.push_str("  }\n}\n\n");
    }

    for method in &service.methods {
        render_message(&mut out, &method.request_name(), &method.params, service);
        match &method.ret {
            ReturnKind::Unit => {
                out.push_str(&format!("message {} {{}}\n\n", method.reply_name()));
            }
            ReturnKind::Value(field) => {
                render_message(
                    &mut out,
                    &method.reply_name(),
                    std::slice::from_ref(field),
                    service,
                );
            }
        }
    }

    out.push_str(&format!("service {} {{\n", service.name));
    for method in &service.methods {
        out.push_str(&format!(
            "  rpc {}({}) returns ({});\n",
            method.proto_name,
            method.request_name(),
            method.reply_name()
        ));
    }
    out.push_str("}\n");
    out
}

fn render_message(out: &mut String, name: &str, fields: &[Field], service: &Service) {
    out.push_str(&format!("message {name} {{\n"));
    for field in fields {
        let label = if field.repeated {
            "repeated "
        } else if field.optional {
            "optional "
        } else {
            ""
        };
        out.push_str(&format!(
            "  {label}{} {} = {};\n",
            proto_type(field, service),
            field.rust_name,
            field.tag
        ));
    }
    out.push_str("}\n\n");
}
