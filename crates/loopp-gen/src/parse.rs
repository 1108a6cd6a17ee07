//! Static introspection of the source trait.
//!
//! The generator has no runtime reflection to lean on; the source file is
//! the type descriptor. `syn` parses it, the target trait is located, and
//! each method signature is mapped recursively onto the wire model. Any
//! type that cannot be mapped aborts the run with the method and parameter
//! named — there is no silent fallback.

use crate::config::Config;
use crate::error::{GenError, Result};
use crate::model::{
    Field, FieldKind, InterfaceOneof, Method, ReturnKind, Scalar, Service, UserMessage,
    snake_to_pascal,
};
use std::collections::HashMap;
use std::path::Path;

pub fn build_service(
    source_path: &Path,
    interface: &str,
    service_name: &str,
    proto_pkg: &str,
    rust_use: &str,
    config: &Config,
) -> Result<Service> {
    let display = source_path.display().to_string();
    let text = std::fs::read_to_string(source_path).map_err(|err| GenError::Io {
        path: display.clone(),
        reason: err.to_string(),
    })?;
    let file = syn::parse_file(&text).map_err(|err| GenError::Parse {
        path: display.clone(),
        reason: err.to_string(),
    })?;

    let mut builder = Builder::new(&file, config);

    let Some(item) = builder.find_named_item(interface) else {
        return Err(GenError::InterfaceNotFound {
            name: interface.to_string(),
            path: display,
        });
    };
    let NamedItem::Trait(tr) = item else {
        return Err(GenError::NotAnInterface {
            name: interface.to_string(),
            path: display,
        });
    };

    let mut methods = Vec::new();
    for item in &tr.items {
        if let syn::TraitItem::Fn(f) = item {
            methods.push(builder.method(f)?);
        }
    }

    Ok(Service {
        name: service_name.to_string(),
        trait_name: interface.to_string(),
        proto_pkg: proto_pkg.to_string(),
        rust_use: rust_use.to_string(),
        methods,
        messages: builder.messages,
        oneofs: builder.oneofs,
        enums: builder.enums_used,
        externals: builder.externals_used,
    })
}

enum NamedItem<'a> {
    Trait(&'a syn::ItemTrait),
    Other,
}

struct Builder<'a> {
    config: &'a Config,
    structs: HashMap<String, &'a syn::ItemStruct>,
    enums: HashMap<String, &'a syn::ItemEnum>,
    traits: HashMap<String, &'a syn::ItemTrait>,
    messages: Vec<UserMessage>,
    message_index: HashMap<String, usize>,
    oneofs: Vec<InterfaceOneof>,
    oneof_index: HashMap<String, usize>,
    enums_used: Vec<crate::config::EnumMapping>,
    enum_index: HashMap<String, usize>,
    externals_used: Vec<crate::config::ExternalType>,
    external_index: HashMap<String, usize>,
}

#[derive(Debug)]
struct Mapped {
    kind: FieldKind,
    repeated: bool,
    optional: bool,
    borrowed: bool,
    array_len: Option<usize>,
}

impl Mapped {
    fn plain(kind: FieldKind) -> Self {
        Self {
            kind,
            repeated: false,
            optional: false,
            borrowed: false,
            array_len: None,
        }
    }

    fn into_field(self, rust_name: String, tag: u32) -> Field {
        Field {
            rust_name,
            tag,
            kind: self.kind,
            repeated: self.repeated,
            optional: self.optional,
            borrowed: self.borrowed,
            array_len: self.array_len,
        }
    }
}

impl<'a> Builder<'a> {
    fn new(file: &'a syn::File, config: &'a Config) -> Self {
        let mut structs = HashMap::new();
        let mut enums = HashMap::new();
        let mut traits = HashMap::new();
        for item in &file.items {
            match item {
                syn::Item::Struct(s) => {
                    structs.insert(s.ident.to_string(), s);
                }
                syn::Item::Enum(e) => {
                    enums.insert(e.ident.to_string(), e);
                }
                syn::Item::Trait(t) => {
                    traits.insert(t.ident.to_string(), t);
                }
                _ => {}
            }
        }
        Self {
            config,
            structs,
            enums,
            traits,
            messages: Vec::new(),
            message_index: HashMap::new(),
            oneofs: Vec::new(),
            oneof_index: HashMap::new(),
            enums_used: Vec::new(),
            enum_index: HashMap::new(),
            externals_used: Vec::new(),
            external_index: HashMap::new(),
        }
    }

    fn find_named_item(&self, name: &str) -> Option<NamedItem<'a>> {
        if let Some(tr) = self.traits.get(name) {
            return Some(NamedItem::Trait(tr));
        }
        if self.structs.contains_key(name) || self.enums.contains_key(name) {
            return Some(NamedItem::Other);
        }
        None
    }

    fn method(&mut self, f: &syn::TraitItemFn) -> Result<Method> {
        let rust_name = f.sig.ident.to_string();
        let fail = |reason: &str| GenError::UnsupportedSignature {
            method: rust_name.clone(),
            reason: reason.to_string(),
        };

        if f.sig.asyncness.is_none() {
            return Err(fail("must be an async fn"));
        }
        if !f.sig.generics.params.is_empty() {
            return Err(fail("generic methods cannot be bridged"));
        }
        match f.sig.receiver() {
            Some(receiver) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
            _ => return Err(fail("must take &self")),
        }

        let mut params = Vec::new();
        let mut tag = 1u32;
        for input in f.sig.inputs.iter().skip(1) {
            let syn::FnArg::Typed(pat) = input else {
                return Err(fail("unexpected receiver position"));
            };
            let name = match &*pat.pat {
                syn::Pat::Ident(ident) => ident.ident.to_string(),
                _ => format!("arg{tag}"),
            };
            let mapped = self.map_type(&pat.ty, &rust_name, &name)?;
            params.push(mapped.into_field(name, tag));
            tag += 1;
        }

        let ret = match &f.sig.output {
            syn::ReturnType::Default => {
                return Err(fail("must return Result<_, Error>"));
            }
            syn::ReturnType::Type(_, ty) => self.return_kind(ty, &rust_name)?,
        };

        Ok(Method {
            proto_name: snake_to_pascal(&rust_name),
            rust_name,
            params,
            ret,
        })
    }

    fn return_kind(&mut self, ty: &syn::Type, method: &str) -> Result<ReturnKind> {
        let fail = |reason: &str| GenError::UnsupportedSignature {
            method: method.to_string(),
            reason: reason.to_string(),
        };

        let syn::Type::Path(path) = ty else {
            return Err(fail("must return Result<_, Error>"));
        };
        let Some(last) = path.path.segments.last() else {
            return Err(fail("must return Result<_, Error>"));
        };
        if last.ident != "Result" {
            return Err(fail("must return Result<_, Error>"));
        }
        let syn::PathArguments::AngleBracketed(args) = &last.arguments else {
            return Err(fail("Result must name its Ok type"));
        };
        let Some(syn::GenericArgument::Type(ok)) = args.args.first() else {
            return Err(fail("Result must name its Ok type"));
        };

        if let syn::Type::Tuple(tuple) = ok {
            if tuple.elems.is_empty() {
                return Ok(ReturnKind::Unit);
            }
            return Err(fail("tuple results are not supported; return a struct"));
        }

        let mapped = self.map_type(ok, method, "result")?;
        if mapped.borrowed {
            return Err(fail("results must be owned types"));
        }
        Ok(ReturnKind::Value(mapped.into_field("result".to_string(), 1)))
    }

    fn map_type(&mut self, ty: &syn::Type, method: &str, param: &str) -> Result<Mapped> {
        match ty {
            syn::Type::Reference(reference) => self.map_reference(&reference.elem, method, param),
            syn::Type::Array(array) => self.map_array(array, method, param),
            syn::Type::Path(path) => self.map_path(path, method, param),
            syn::Type::TraitObject(obj) => {
                let ty = trait_object_name(obj);
                Err(GenError::MissingOneof {
                    method: method.to_string(),
                    param: param.to_string(),
                    ty,
                })
            }
            syn::Type::ImplTrait(imp) => Err(GenError::MissingOneof {
                method: method.to_string(),
                param: param.to_string(),
                ty: impl_trait_name(imp),
            }),
            syn::Type::Paren(paren) => self.map_type(&paren.elem, method, param),
            other => Err(self.unsupported(method, param, other, "not representable on the wire")),
        }
    }

    fn map_reference(&mut self, elem: &syn::Type, method: &str, param: &str) -> Result<Mapped> {
        match elem {
            syn::Type::Slice(slice) => {
                if is_u8(&slice.elem) {
                    return Ok(Mapped {
                        borrowed: true,
                        ..Mapped::plain(FieldKind::Bytes { fixed_len: None })
                    });
                }
                let inner = self.map_type(&slice.elem, method, param)?;
                if inner.repeated || inner.optional {
                    return Err(self.unsupported(
                        method,
                        param,
                        elem,
                        "nested repeated/optional types are not representable",
                    ));
                }
                Ok(Mapped {
                    repeated: true,
                    borrowed: true,
                    ..inner
                })
            }
            syn::Type::Path(path) if path_is(path, "str") => Ok(Mapped {
                borrowed: true,
                ..Mapped::plain(FieldKind::Scalar(Scalar {
                    rust: "String",
                    proto: "string",
                    widened: false,
                }))
            }),
            // `&dyn Trait` / `&impl Trait` report through the polymorphic
            // path so the error names the type that needs a mapping.
            syn::Type::TraitObject(_) | syn::Type::ImplTrait(_) => {
                self.map_type(elem, method, param)
            }
            other => Err(self.unsupported(
                method,
                param,
                other,
                "only &[u8], &[T], and &str references are supported",
            )),
        }
    }

    fn map_array(&mut self, array: &syn::TypeArray, method: &str, param: &str) -> Result<Mapped> {
        let len = array_len(array).ok_or_else(|| {
            self.unsupported(
                method,
                param,
                &array.elem,
                "array length must be an integer literal",
            )
        })?;
        if is_u8(&array.elem) {
            return Ok(Mapped::plain(FieldKind::Bytes {
                fixed_len: Some(len),
            }));
        }
        let inner = self.map_type(&array.elem, method, param)?;
        match inner.kind {
            FieldKind::Scalar(_) if !inner.repeated && !inner.optional => Ok(Mapped {
                repeated: true,
                array_len: Some(len),
                ..inner
            }),
            _ => Err(self.unsupported(
                method,
                param,
                &array.elem,
                "fixed-size arrays are only supported over scalars",
            )),
        }
    }

    fn map_path(&mut self, path: &syn::TypePath, method: &str, param: &str) -> Result<Mapped> {
        if let Some(inner) = generic_inner(path, "Vec") {
            if is_u8(inner) {
                return Ok(Mapped::plain(FieldKind::Bytes { fixed_len: None }));
            }
            let mapped = self.map_type(inner, method, param)?;
            if mapped.repeated || mapped.optional {
                return Err(self.unsupported(
                    method,
                    param,
                    inner,
                    "nested repeated/optional types are not representable",
                ));
            }
            return Ok(Mapped {
                repeated: true,
                ..mapped
            });
        }
        if let Some(inner) = generic_inner(path, "Option") {
            let mapped = self.map_type(inner, method, param)?;
            if mapped.repeated || mapped.optional {
                return Err(self.unsupported(
                    method,
                    param,
                    inner,
                    "nested repeated/optional types are not representable",
                ));
            }
            return Ok(Mapped {
                optional: true,
                ..mapped
            });
        }
        for wrapper in ["Arc", "Box"] {
            if let Some(inner) = generic_inner(path, wrapper) {
                return self.map_type(inner, method, param);
            }
        }

        let name = path_text(path);
        if let Some(scalar) = scalar_for(&name) {
            return Ok(Mapped::plain(FieldKind::Scalar(scalar)));
        }
        if name == "usize" || name == "isize" {
            return Err(GenError::UnsupportedType {
                method: method.to_string(),
                param: param.to_string(),
                ty: name,
                reason: "platform-dependent width; use an explicit u64/i64".to_string(),
            });
        }
        self.named(&name, method, param)
    }

    fn named(&mut self, name: &str, method: &str, param: &str) -> Result<Mapped> {
        let last = name.rsplit("::").next().unwrap_or(name);
        let config = self.config;

        if let Some(idx) = self.external_index.get(name).copied() {
            return Ok(Mapped::plain(FieldKind::External(idx)));
        }
        if let Some(external) = config
            .external_types
            .iter()
            .find(|ext| ext.rust_type == name || ext.rust_type == last)
        {
            let idx = self.externals_used.len();
            self.externals_used.push(external.clone());
            self.external_index.insert(name.to_string(), idx);
            return Ok(Mapped::plain(FieldKind::External(idx)));
        }

        if let Some(idx) = self.enum_index.get(name).copied() {
            return Ok(Mapped::plain(FieldKind::Enum(idx)));
        }
        if let Some(mapping) = config
            .enums
            .iter()
            .find(|e| e.rust_type == name || e.rust_type == last)
        {
            let idx = self.enums_used.len();
            self.enums_used.push(mapping.clone());
            self.enum_index.insert(name.to_string(), idx);
            return Ok(Mapped::plain(FieldKind::Enum(idx)));
        }

        if self.structs.contains_key(last) {
            self.build_message(last, method, param)?;
            return Ok(Mapped::plain(FieldKind::Message(last.to_string())));
        }

        if let Some(item) = self.enums.get(last).copied() {
            // A data-carrying enum is the closed polymorphic case; it needs
            // an explicit oneof mapping. A unit-variant enum belongs under
            // `enums:` instead, which was checked above.
            return self.oneof(item, method, param);
        }

        if self.traits.contains_key(last) {
            return Err(GenError::MissingOneof {
                method: method.to_string(),
                param: param.to_string(),
                ty: last.to_string(),
            });
        }

        Err(GenError::UnsupportedType {
            method: method.to_string(),
            param: param.to_string(),
            ty: name.to_string(),
            reason: "no mapping known for this type; add it to the generator config".to_string(),
        })
    }

    fn build_message(&mut self, name: &str, method: &str, param: &str) -> Result<()> {
        if self.message_index.contains_key(name) {
            return Ok(());
        }
        // Reserve the slot first so self-referential structs terminate.
        let idx = self.messages.len();
        self.messages.push(UserMessage {
            rust_name: name.to_string(),
            fields: Vec::new(),
        });
        self.message_index.insert(name.to_string(), idx);

        let item = self.structs[name];
        let syn::Fields::Named(named) = &item.fields else {
            return Err(GenError::UnsupportedType {
                method: method.to_string(),
                param: param.to_string(),
                ty: name.to_string(),
                reason: "only structs with named fields can become messages".to_string(),
            });
        };

        let mut fields = Vec::new();
        let mut tag = 1u32;
        for field in &named.named {
            let field_name = field
                .ident
                .as_ref()
                .map(|ident| ident.to_string())
                .unwrap_or_else(|| format!("field{tag}"));
            let mapped = self.map_type(&field.ty, method, &format!("{param}.{field_name}"))?;
            if mapped.borrowed {
                return Err(GenError::UnsupportedType {
                    method: method.to_string(),
                    param: format!("{param}.{field_name}"),
                    ty: name.to_string(),
                    reason: "message fields must be owned types".to_string(),
                });
            }
            fields.push(mapped.into_field(field_name, tag));
            tag += 1;
        }
        self.messages[idx].fields = fields;
        Ok(())
    }

    fn oneof(&mut self, item: &'a syn::ItemEnum, method: &str, param: &str) -> Result<Mapped> {
        let enum_name = item.ident.to_string();
        if let Some(idx) = self.oneof_index.get(&enum_name).copied() {
            return Ok(Mapped::plain(FieldKind::Oneof(idx)));
        }

        let config = self.config;
        let Some(mapping) = config
            .interfaces
            .iter()
            .find(|m| m.rust_type == enum_name)
        else {
            return Err(GenError::MissingOneof {
                method: method.to_string(),
                param: param.to_string(),
                ty: enum_name,
            });
        };

        // Variant -> carried struct, for validation against the config.
        let mut variant_structs = HashMap::new();
        for variant in &item.variants {
            let syn::Fields::Unnamed(unnamed) = &variant.fields else {
                return Err(GenError::UnsupportedType {
                    method: method.to_string(),
                    param: param.to_string(),
                    ty: enum_name,
                    reason: format!(
                        "variant {} must hold exactly one struct value",
                        variant.ident
                    ),
                });
            };
            if unnamed.unnamed.len() != 1 {
                return Err(GenError::UnsupportedType {
                    method: method.to_string(),
                    param: param.to_string(),
                    ty: enum_name,
                    reason: format!(
                        "variant {} must hold exactly one struct value",
                        variant.ident
                    ),
                });
            }
            let struct_name = match &unnamed.unnamed[0].ty {
                syn::Type::Path(p) => path_text(p),
                other => {
                    return Err(self.unsupported(
                        method,
                        param,
                        other,
                        "oneof cases must be named structs",
                    ));
                }
            };
            variant_structs.insert(struct_name, variant.ident.to_string());
        }

        let mut cases = Vec::new();
        for case in &mapping.cases {
            let Some(variant) = variant_structs.remove(&case.rust_type) else {
                return Err(GenError::Config {
                    path: "interfaces".to_string(),
                    reason: format!(
                        "{enum_name}: case {} does not match any variant",
                        case.rust_type
                    ),
                });
            };
            self.build_message(&case.rust_type, method, param)?;
            cases.push((variant, case.rust_type.clone()));
        }
        if let Some((struct_name, variant)) = variant_structs.into_iter().next() {
            return Err(GenError::Config {
                path: "interfaces".to_string(),
                reason: format!("{enum_name}: variant {variant} ({struct_name}) has no case entry"),
            });
        }

        let idx = self.oneofs.len();
        self.oneofs.push(InterfaceOneof {
            rust_enum: enum_name.clone(),
            container: mapping.proto_container.clone(),
            cases,
        });
        self.oneof_index.insert(enum_name, idx);
        Ok(Mapped::plain(FieldKind::Oneof(idx)))
    }

    fn unsupported(&self, method: &str, param: &str, ty: &syn::Type, reason: &str) -> GenError {
        GenError::UnsupportedType {
            method: method.to_string(),
            param: param.to_string(),
            ty: type_name(ty),
            reason: reason.to_string(),
        }
    }
}

fn scalar_for(name: &str) -> Option<Scalar> {
    let (rust, proto, widened) = match name {
        "u8" => ("u8", "uint32", true),
        "u16" => ("u16", "uint32", true),
        "u32" => ("u32", "uint32", false),
        "u64" => ("u64", "uint64", false),
        "i8" => ("i8", "int32", true),
        "i16" => ("i16", "int32", true),
        "i32" => ("i32", "int32", false),
        "i64" => ("i64", "int64", false),
        "f32" => ("f32", "float", false),
        "f64" => ("f64", "double", false),
        "bool" => ("bool", "bool", false),
        "String" => ("String", "string", false),
        _ => return None,
    };
    Some(Scalar {
        rust,
        proto,
        widened,
    })
}

fn is_u8(ty: &syn::Type) -> bool {
    matches!(ty, syn::Type::Path(p) if path_is(p, "u8"))
}

fn path_is(path: &syn::TypePath, name: &str) -> bool {
    path.qself.is_none()
        && path.path.segments.len() == 1
        && path.path.segments[0].ident == name
        && path.path.segments[0].arguments.is_none()
}

fn type_name(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(path) => path_text(path),
        syn::Type::TraitObject(obj) => trait_object_name(obj),
        syn::Type::ImplTrait(imp) => impl_trait_name(imp),
        syn::Type::Reference(reference) => format!("&{}", type_name(&reference.elem)),
        syn::Type::Paren(paren) => type_name(&paren.elem),
        syn::Type::Slice(slice) => format!("[{}]", type_name(&slice.elem)),
        syn::Type::Array(array) => format!("[{}]", type_name(&array.elem)),
        syn::Type::Tuple(tuple) => {
            let inner = tuple
                .elems
                .iter()
                .map(type_name)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({inner})")
        }
        _ => "unknown type".to_string(),
    }
}

fn path_text(path: &syn::TypePath) -> String {
    path.path
        .segments
        .iter()
        .map(|seg| seg.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

fn generic_inner<'t>(path: &'t syn::TypePath, wrapper: &str) -> Option<&'t syn::Type> {
    let last = path.path.segments.last()?;
    if last.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &last.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

fn array_len(array: &syn::TypeArray) -> Option<usize> {
    if let syn::Expr::Lit(lit) = &array.len {
        if let syn::Lit::Int(int) = &lit.lit {
            return int.base10_parse().ok();
        }
    }
    None
}

fn trait_object_name(obj: &syn::TypeTraitObject) -> String {
    obj.bounds
        .iter()
        .find_map(|bound| match bound {
            syn::TypeParamBound::Trait(t) => Some(
                t.path
                    .segments
                    .iter()
                    .map(|seg| seg.ident.to_string())
                    .collect::<Vec<_>>()
                    .join("::"),
            ),
            _ => None,
        })
        .unwrap_or_else(|| "dyn trait".to_string())
}

fn impl_trait_name(imp: &syn::TypeImplTrait) -> String {
    imp.bounds
        .iter()
        .find_map(|bound| match bound {
            syn::TypeParamBound::Trait(t) => Some(
                t.path
                    .segments
                    .iter()
                    .map(|seg| seg.ident.to_string())
                    .collect::<Vec<_>>()
                    .join("::"),
            ),
            _ => None,
        })
        .unwrap_or_else(|| "impl trait".to_string())
}
