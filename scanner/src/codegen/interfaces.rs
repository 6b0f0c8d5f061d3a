//! Per-interface module: descriptor table, opcode constants and enums

use super::util::*;
use super::Context;
use crate::protocol::{Arg, ArgType, Enum, Interface, Message};
use proc_macro2::TokenStream;
use quote::quote;
use std::collections::HashSet;

pub(crate) fn generate(
    ctx: &Context,
    interface: &Interface,
    client: Option<TokenStream>,
    server: Option<TokenStream>,
) -> TokenStream {
    let module = snake_ident(&interface.name);
    let doc = doc_attrs(
        interface.description.as_ref(),
        None,
        &[format!("Interface `{}`, version {}", interface.name, interface.version)],
    );
    let descriptor = descriptor(ctx, interface);
    let request_consts = opcode_consts("REQ", &interface.requests);
    let event_consts = opcode_consts("EVT", &interface.events);
    let enums = interface.enums.iter().map(|e| {
        if e.bitfield {
            bitfield(e)
        } else {
            plain_enum(e)
        }
    });

    quote! {
        #doc
        #[allow(
            clippy::all,
            dead_code,
            non_camel_case_types,
            non_upper_case_globals,
            unused_imports,
            unused_mut,
            unused_variables
        )]
        pub mod #module {
            #descriptor
            #request_consts
            #event_consts
            #(#enums)*
            #client
            #server
        }
    }
}

fn descriptor(ctx: &Context, interface: &Interface) -> TokenStream {
    let rt = &ctx.rt;
    let static_name = interface_static(&interface.name);
    let name = &interface.name;
    let version = interface.version;
    let requests = interface.requests.iter().map(|m| message_desc(ctx, m));
    let events = interface.events.iter().map(|m| message_desc(ctx, m));

    quote! {
        pub static #static_name: #rt::protocol::Interface = #rt::protocol::Interface {
            name: #name,
            version: #version,
            requests: &[#(#requests),*],
            events: &[#(#events),*],
        };
    }
}

fn message_desc(ctx: &Context, message: &Message) -> TokenStream {
    let rt = &ctx.rt;
    let name = &message.name;
    let since = message.since;
    let is_destructor = message.is_destructor;
    let args = message.args.iter().map(|arg| arg_spec(ctx, arg));
    quote! {
        #rt::protocol::MessageDesc {
            name: #name,
            since: #since,
            is_destructor: #is_destructor,
            signature: &[#(#args),*],
        }
    }
}

fn arg_spec(ctx: &Context, arg: &Arg) -> TokenStream {
    let rt = &ctx.rt;
    let name = &arg.name;
    let kind = match arg.kind {
        ArgType::Int => quote!(Int),
        ArgType::Uint => quote!(Uint),
        ArgType::Fixed => quote!(Fixed),
        ArgType::String => quote!(Str),
        ArgType::Object => quote!(Object),
        ArgType::NewId => quote!(NewId),
        ArgType::Array => quote!(Array),
        ArgType::Fd => quote!(Fd),
    };
    let nullable = arg.allow_null;
    let interface = match (&arg.interface, arg.kind) {
        (Some(target), ArgType::Object | ArgType::NewId) => {
            let module = snake_ident(target);
            let static_name = interface_static(target);
            quote!(::core::option::Option::Some(&super::#module::#static_name))
        }
        _ => quote!(::core::option::Option::None),
    };
    quote! {
        #rt::protocol::ArgSpec {
            name: #name,
            kind: #rt::protocol::ArgumentType::#kind,
            nullable: #nullable,
            interface: #interface,
        }
    }
}

fn opcode_consts(prefix: &str, messages: &[Message]) -> TokenStream {
    let consts = messages.iter().enumerate().map(|(opcode, message)| {
        let opcode_name = opcode_const(prefix, &message.name);
        let since_name = since_const(prefix, &message.name);
        let opcode = opcode as u16;
        let since = message.since;
        let opcode_doc = format!(" Opcode of `{}`", message.name);
        let since_doc = format!(" Minimum object version for `{}`", message.name);
        quote! {
            #[doc = #opcode_doc]
            pub const #opcode_name: u16 = #opcode;
            #[doc = #since_doc]
            pub const #since_name: u32 = #since;
        }
    });
    quote! { #(#consts)* }
}

fn entry_doc(summary: Option<&str>, since: u32) -> TokenStream {
    let notes = if since > 1 {
        vec![format!("Since version {}", since)]
    } else {
        Vec::new()
    };
    doc_attrs(None, summary, &notes)
}

fn plain_enum(e: &Enum) -> TokenStream {
    let name = camel_ident(&e.name);
    let doc = doc_attrs(e.description.as_ref(), None, &[]);

    // later entries sharing a value become aliases of the first one
    let mut seen = HashSet::new();
    let mut variants = Vec::new();
    let mut aliases = Vec::new();
    for entry in &e.entries {
        let variant = camel_ident(&entry.name);
        if seen.insert(entry.value) {
            variants.push((variant, entry));
        } else if let Some((original, _)) = variants.iter().find(|(_, v)| v.value == entry.value) {
            let doc = entry_doc(entry.summary.as_deref(), entry.since);
            aliases.push(quote! {
                #doc
                pub const #variant: #name = #name::#original;
            });
        }
    }

    let repr = if variants.is_empty() {
        quote!()
    } else {
        quote!(#[repr(u32)])
    };
    let definitions = variants.iter().map(|(variant, entry)| {
        let doc = entry_doc(entry.summary.as_deref(), entry.since);
        let value = entry.value;
        quote! { #doc #variant = #value }
    });
    let from_arms = variants.iter().map(|(variant, entry)| {
        let value = entry.value;
        quote! { #value => ::core::result::Result::Ok(#name::#variant), }
    });
    let into_arms = variants.iter().map(|(variant, entry)| {
        let value = entry.value;
        quote! { #name::#variant => #value, }
    });
    let since_arms = variants.iter().map(|(variant, entry)| {
        let since = entry.since;
        quote! { #name::#variant => #since, }
    });
    let alias_impl = if aliases.is_empty() {
        quote!()
    } else {
        quote! { impl #name { #(#aliases)* } }
    };

    quote! {
        #doc
        #repr
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum #name {
            #(#definitions),*
        }

        #alias_impl

        impl #name {
            /// Minimum interface version carrying this value
            pub fn since(&self) -> u32 {
                match *self {
                    #(#since_arms)*
                }
            }
        }

        impl ::core::convert::TryFrom<u32> for #name {
            type Error = ();
            fn try_from(value: u32) -> ::core::result::Result<Self, ()> {
                match value {
                    #(#from_arms)*
                    _ => ::core::result::Result::Err(()),
                }
            }
        }

        impl ::core::convert::From<#name> for u32 {
            fn from(value: #name) -> u32 {
                match value {
                    #(#into_arms)*
                }
            }
        }
    }
}

fn bitfield(e: &Enum) -> TokenStream {
    let name = camel_ident(&e.name);
    let doc = doc_attrs(e.description.as_ref(), None, &[]);
    let flags: Vec<_> = e
        .entries
        .iter()
        .map(|entry| {
            let flag = camel_ident(&entry.name);
            let value = entry.value;
            let doc = entry_doc(entry.summary.as_deref(), entry.since);
            (flag, value, doc)
        })
        .collect();

    let consts = flags.iter().map(|(flag, value, doc)| {
        quote! {
            #doc
            pub const #flag: #name = #name(#value);
        }
    });
    let all = flags
        .iter()
        .fold(0u32, |all, (_, value, _)| all | value);
    let count = flags.len();
    let members = flags.iter().map(|(flag, _, _)| quote!(#name::#flag));

    quote! {
        #doc
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct #name(u32);

        impl #name {
            #(#consts)*

            const ALL_BITS: u32 = #all;

            pub const fn empty() -> Self {
                #name(0)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            /// `None` if `bits` has bits no flag defines
            pub const fn from_bits(bits: u32) -> ::core::option::Option<Self> {
                if bits & !Self::ALL_BITS == 0 {
                    ::core::option::Option::Some(#name(bits))
                } else {
                    ::core::option::Option::None
                }
            }

            pub const fn from_bits_truncate(bits: u32) -> Self {
                #name(bits & Self::ALL_BITS)
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// The defined non-zero flags set in `self`
            pub fn iter(&self) -> impl ::core::iter::Iterator<Item = Self> {
                let bits = self.0;
                let flags: [#name; #count] = [#(#members),*];
                flags
                    .into_iter()
                    .filter(move |flag| flag.0 != 0 && bits & flag.0 == flag.0)
            }
        }

        impl ::core::ops::BitOr for #name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                #name(self.0 | rhs.0)
            }
        }

        impl ::core::ops::BitOrAssign for #name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::core::ops::BitAnd for #name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                #name(self.0 & rhs.0)
            }
        }

        impl ::core::convert::TryFrom<u32> for #name {
            type Error = ();
            fn try_from(value: u32) -> ::core::result::Result<Self, ()> {
                Self::from_bits(value).ok_or(())
            }
        }

        impl ::core::convert::From<#name> for u32 {
            fn from(value: #name) -> u32 {
                value.0
            }
        }
    }
}
