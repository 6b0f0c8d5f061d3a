//! `client` and `server` submodules
//!
//! Both sides are mirror images: the client sends requests and decodes
//! events, the server sends events and decodes requests.

use super::util::*;
use super::Context;
use crate::protocol::{split_enum_ref, Arg, ArgType, Interface, Message};
use proc_macro2::TokenStream;
use quote::quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Client,
    Server,
}

impl Side {
    fn module(&self) -> TokenStream {
        match self {
            Side::Client => quote!(client),
            Side::Server => quote!(server),
        }
    }

    fn handle_trait(&self, ctx: &Context) -> TokenStream {
        let rt = &ctx.rt;
        match self {
            Side::Client => quote!(#rt::client::Proxy),
            Side::Server => quote!(#rt::server::Resource),
        }
    }

    fn outgoing<'a>(&self, interface: &'a Interface) -> &'a [Message] {
        match self {
            Side::Client => &interface.requests,
            Side::Server => &interface.events,
        }
    }

    fn incoming<'a>(&self, interface: &'a Interface) -> &'a [Message] {
        match self {
            Side::Client => &interface.events,
            Side::Server => &interface.requests,
        }
    }

    fn outgoing_prefix(&self) -> &'static str {
        match self {
            Side::Client => "REQ",
            Side::Server => "EVT",
        }
    }

    fn incoming_enum(&self) -> TokenStream {
        match self {
            Side::Client => quote!(Event),
            Side::Server => quote!(Request),
        }
    }

    fn handler_method(&self) -> TokenStream {
        match self {
            Side::Client => quote!(event),
            Side::Server => quote!(request),
        }
    }

    fn closure_fn(&self) -> TokenStream {
        match self {
            Side::Client => quote!(on_event),
            Side::Server => quote!(on_request),
        }
    }
}

pub(crate) fn generate(ctx: &Context, side: Side, interface: &Interface) -> TokenStream {
    let module = side.module();
    let handle = handle_struct(ctx, side, interface);
    let incoming = incoming_enum(ctx, side, interface);
    let glue = handler_glue(ctx, side, interface);
    let doc = match side {
        Side::Client => format!(" Client side of `{}`", interface.name),
        Side::Server => format!(" Server side of `{}`", interface.name),
    };
    quote! {
        #[doc = #doc]
        pub mod #module {
            #handle
            #incoming
            #glue
        }
    }
}

/// Path, from inside a side module, of the handle type of `interface`
fn handle_path(side: Side, interface: &str) -> TokenStream {
    let module = snake_ident(interface);
    let side_module = side.module();
    let handle = camel_ident(interface);
    quote!(super::super::#module::#side_module::#handle)
}

fn interface_ref(interface: &str) -> TokenStream {
    let module = snake_ident(interface);
    let static_name = interface_static(interface);
    quote!(super::super::#module::#static_name)
}

fn enum_path(current: &str, reference: &str) -> TokenStream {
    let (owner, name) = split_enum_ref(reference, current);
    let module = snake_ident(owner);
    let name = camel_ident(name);
    quote!(super::super::#module::#name)
}

fn handle_struct(ctx: &Context, side: Side, interface: &Interface) -> TokenStream {
    let rt = &ctx.rt;
    let handle = camel_ident(&interface.name);
    let handle_trait = side.handle_trait(ctx);
    let static_name = interface_static(&interface.name);
    let doc = doc_attrs(
        interface.description.as_ref(),
        None,
        &[format!("Handle to a `{}` object", interface.name)],
    );
    let methods = side
        .outgoing(interface)
        .iter()
        .map(|message| outgoing_method(ctx, side, interface, message));

    quote! {
        #doc
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct #handle {
            id: #rt::ObjectId,
        }

        impl #handle_trait for #handle {
            fn interface() -> &'static #rt::protocol::Interface {
                &super::#static_name
            }

            fn from_id(id: #rt::ObjectId) -> Self {
                #handle { id }
            }

            fn id(&self) -> #rt::ObjectId {
                self.id
            }
        }

        impl #handle {
            #(#methods)*
        }
    }
}

enum Constructor {
    None,
    Typed(String),
    Untyped,
}

fn outgoing_method(ctx: &Context, side: Side, interface: &Interface, message: &Message) -> TokenStream {
    let rt = &ctx.rt;
    let handle_trait = side.handle_trait(ctx);
    let method = snake_ident(&message.name);
    let opcode = opcode_const(side.outgoing_prefix(), &message.name);

    let mut params = Vec::new();
    let mut values = Vec::new();
    let mut constructor = Constructor::None;
    for arg in &message.args {
        let name = arg_ident(&arg.name);
        match arg.kind {
            ArgType::Int | ArgType::Uint => match (&arg.enum_, arg.kind) {
                (Some(reference), kind) => {
                    let path = enum_path(&interface.name, reference);
                    params.push(quote!(#name: #path));
                    if kind == ArgType::Int {
                        values.push(quote!(#rt::Argument::Int(u32::from(#name) as i32)));
                    } else {
                        values.push(quote!(#rt::Argument::Uint(u32::from(#name))));
                    }
                }
                (None, ArgType::Int) => {
                    params.push(quote!(#name: i32));
                    values.push(quote!(#rt::Argument::Int(#name)));
                }
                (None, _) => {
                    params.push(quote!(#name: u32));
                    values.push(quote!(#rt::Argument::Uint(#name)));
                }
            },
            ArgType::Fixed => {
                params.push(quote!(#name: f64));
                values.push(quote!(#rt::Argument::Fixed(#rt::Fixed::from_f64(#name))));
            }
            ArgType::String => {
                if arg.allow_null {
                    params.push(quote!(#name: ::core::option::Option<&str>));
                    values.push(quote!(#rt::Argument::Str(#name.map(|s| s.to_string()))));
                } else {
                    params.push(quote!(#name: &str));
                    values.push(quote!(#rt::Argument::Str(::core::option::Option::Some(#name.to_string()))));
                }
            }
            ArgType::Object => match &arg.interface {
                Some(target) => {
                    let path = handle_path(side, target);
                    if arg.allow_null {
                        params.push(quote!(#name: ::core::option::Option<&#path>));
                        values.push(quote! {
                            #rt::Argument::Object(#name.map_or(#rt::ObjectId::NONE, |o| #handle_trait::id(o)))
                        });
                    } else {
                        params.push(quote!(#name: &#path));
                        values.push(quote!(#rt::Argument::Object(#handle_trait::id(#name))));
                    }
                }
                None => {
                    params.push(quote!(#name: #rt::ObjectId));
                    values.push(quote!(#rt::Argument::Object(#name)));
                }
            },
            ArgType::NewId => match &arg.interface {
                Some(target) => {
                    constructor = Constructor::Typed(target.clone());
                    values.push(quote!(#rt::Argument::NewId(#rt::ObjectId::NONE)));
                }
                None => {
                    constructor = Constructor::Untyped;
                    params.push(quote!(child_version: u32));
                    values.push(quote! {
                        #rt::Argument::UntypedNewId(#rt::wire::UntypedNewId {
                            interface: <P as #handle_trait>::interface().name.to_string(),
                            version: child_version,
                            id: #rt::ObjectId::NONE,
                        })
                    });
                }
            },
            ArgType::Array => {
                params.push(quote!(#name: ::std::vec::Vec<u8>));
                values.push(quote!(#rt::Argument::Array(#name)));
            }
            ArgType::Fd => {
                params.push(quote!(#name: ::std::os::fd::BorrowedFd<'_>));
                values.push(quote!(#rt::Argument::Fd(#name.try_clone_to_owned()?)));
            }
        }
    }

    let mut notes = Vec::new();
    if message.since > 1 {
        notes.push(format!("Requires object version {} or later.", message.since));
    }
    if let Some(deprecated) = message.deprecated_since {
        notes.push(format!("Deprecated since version {}.", deprecated));
    }
    if message.is_destructor {
        notes.push("This is a destructor: the object is released once sent.".to_string());
    }
    let doc = doc_attrs(message.description.as_ref(), None, &notes);

    let build = quote! {
        let msg = #rt::Message {
            object: self.id,
            opcode: super::#opcode,
            args: ::std::vec![#(#values),*],
        };
    };

    match constructor {
        Constructor::None => quote! {
            #doc
            pub fn #method(&self, conn: &mut #rt::Connection #(, #params)*) -> ::core::result::Result<(), #rt::Error> {
                #build
                conn.send(msg)
            }
        },
        Constructor::Typed(target) => {
            let child = handle_path(side, &target);
            let child_interface = interface_ref(&target);
            quote! {
                #doc
                pub fn #method(
                    &self,
                    conn: &mut #rt::Connection
                    #(, #params)*,
                    child_data: ::core::option::Option<::std::sync::Arc<dyn #rt::ObjectData>>
                ) -> ::core::result::Result<#child, #rt::Error> {
                    #build
                    let id = conn.send_constructor(msg, &#child_interface, ::core::option::Option::None, child_data)?;
                    ::core::result::Result::Ok(<#child as #handle_trait>::from_id(id))
                }
            }
        }
        Constructor::Untyped => quote! {
            #doc
            pub fn #method<P: #handle_trait>(
                &self,
                conn: &mut #rt::Connection
                #(, #params)*,
                child_data: ::core::option::Option<::std::sync::Arc<dyn #rt::ObjectData>>
            ) -> ::core::result::Result<P, #rt::Error> {
                #build
                let id = conn.send_constructor(
                    msg,
                    <P as #handle_trait>::interface(),
                    ::core::option::Option::Some(child_version),
                    child_data,
                )?;
                ::core::result::Result::Ok(<P as #handle_trait>::from_id(id))
            }
        },
    }
}

/// Field type, match pattern and field value of an incoming argument
fn incoming_arg(
    ctx: &Context,
    side: Side,
    interface: &Interface,
    arg: &Arg,
) -> (TokenStream, TokenStream, TokenStream) {
    let rt = &ctx.rt;
    let handle_trait = side.handle_trait(ctx);
    let name = arg_ident(&arg.name);
    match arg.kind {
        ArgType::Int | ArgType::Uint => {
            let (plain, pattern) = if arg.kind == ArgType::Int {
                (quote!(i32), quote!(#rt::Argument::Int(#name)))
            } else {
                (quote!(u32), quote!(#rt::Argument::Uint(#name)))
            };
            match &arg.enum_ {
                Some(reference) => {
                    let path = enum_path(&interface.name, reference);
                    let raw = if arg.kind == ArgType::Int {
                        quote!(#name as u32)
                    } else {
                        quote!(#name)
                    };
                    (
                        quote!(#rt::WEnum<#path>),
                        pattern,
                        quote!(#rt::WEnum::from(#raw)),
                    )
                }
                None => (plain, pattern, quote!(#name)),
            }
        }
        ArgType::Fixed => (
            quote!(f64),
            quote!(#rt::Argument::Fixed(#name)),
            quote!(#name.to_f64()),
        ),
        ArgType::String => {
            if arg.allow_null {
                (
                    quote!(::core::option::Option<::std::string::String>),
                    quote!(#rt::Argument::Str(#name)),
                    quote!(#name),
                )
            } else {
                (
                    quote!(::std::string::String),
                    quote!(#rt::Argument::Str(::core::option::Option::Some(#name))),
                    quote!(#name),
                )
            }
        }
        ArgType::Object => match &arg.interface {
            Some(target) => {
                let path = handle_path(side, target);
                if arg.allow_null {
                    (
                        quote!(::core::option::Option<#path>),
                        quote!(#rt::Argument::Object(#name)),
                        quote! {
                            if #name.is_null() {
                                ::core::option::Option::None
                            } else {
                                ::core::option::Option::Some(<#path as #handle_trait>::from_id(#name))
                            }
                        },
                    )
                } else {
                    (
                        path.clone(),
                        quote!(#rt::Argument::Object(#name)),
                        quote!(<#path as #handle_trait>::from_id(#name)),
                    )
                }
            }
            None => (
                quote!(#rt::ObjectId),
                quote!(#rt::Argument::Object(#name)),
                quote!(#name),
            ),
        },
        ArgType::NewId => match &arg.interface {
            Some(target) => {
                let path = handle_path(side, target);
                (
                    path.clone(),
                    quote!(#rt::Argument::NewId(#name)),
                    quote!(<#path as #handle_trait>::from_id(#name)),
                )
            }
            None => (
                quote!(#rt::wire::UntypedNewId),
                quote!(#rt::Argument::UntypedNewId(#name)),
                quote!(#name),
            ),
        },
        ArgType::Array => (
            quote!(::std::vec::Vec<u8>),
            quote!(#rt::Argument::Array(#name)),
            quote!(#name),
        ),
        ArgType::Fd => (
            quote!(::std::os::fd::OwnedFd),
            quote!(#rt::Argument::Fd(#name)),
            quote!(#name),
        ),
    }
}

fn incoming_enum(ctx: &Context, side: Side, interface: &Interface) -> TokenStream {
    let rt = &ctx.rt;
    let enum_name = side.incoming_enum();
    let static_name = interface_static(&interface.name);
    let messages = side.incoming(interface);

    let mut variants = Vec::new();
    let mut opcode_arms = Vec::new();
    let mut decode_arms = Vec::new();
    for (opcode, message) in messages.iter().enumerate() {
        let variant = camel_ident(&message.name);
        let opcode = opcode as u16;
        let mut notes = Vec::new();
        if message.since > 1 {
            notes.push(format!("Only sent to objects of version {} or later.", message.since));
        }
        if message.is_destructor {
            notes.push("This is a destructor: the object is released after dispatch.".to_string());
        }
        let doc = doc_attrs(message.description.as_ref(), None, &notes);

        let mut fields = Vec::new();
        let mut patterns = Vec::new();
        let mut values = Vec::new();
        for arg in &message.args {
            let name = arg_ident(&arg.name);
            let (ty, pattern, value) = incoming_arg(ctx, side, interface, arg);
            let field_doc = doc_attrs(None, arg.summary.as_deref(), &[]);
            fields.push(quote!(#field_doc #name: #ty));
            patterns.push(pattern);
            values.push(quote!(#name: #value));
        }

        if fields.is_empty() {
            variants.push(quote!(#doc #variant));
        } else {
            variants.push(quote!(#doc #variant { #(#fields),* }));
        }
        opcode_arms.push(quote!(#enum_name::#variant { .. } => #opcode,));

        let construct = if values.is_empty() {
            quote!(#enum_name::#variant)
        } else {
            quote!(#enum_name::#variant { #(#values),* })
        };
        let since_check = if message.since > 1 {
            let since = message.since;
            let message_name = &message.name;
            quote! {
                if version < #since {
                    return ::core::result::Result::Err(#rt::Error::VersionMismatch {
                        interface,
                        message: #message_name,
                        since: #since,
                        version,
                        id: object,
                    });
                }
            }
        } else {
            quote!()
        };
        let count = message.args.len();
        decode_arms.push(quote! {
            #opcode => {
                #since_check
                match <[#rt::Argument; #count] as ::core::convert::TryFrom<::std::vec::Vec<#rt::Argument>>>::try_from(msg.args) {
                    ::core::result::Result::Ok([#(#patterns),*]) => ::core::result::Result::Ok(#construct),
                    _ => ::core::result::Result::Err(#rt::Error::BadMessage { interface, opcode }),
                }
            }
        });
    }

    let doc = match side {
        Side::Client => format!(" Events of `{}`", interface.name),
        Side::Server => format!(" Requests of `{}`", interface.name),
    };

    quote! {
        #[doc = #doc]
        #[derive(Debug)]
        pub enum #enum_name {
            #(#variants),*
        }

        impl #enum_name {
            pub fn opcode(&self) -> u16 {
                match *self {
                    #(#opcode_arms)*
                }
            }

            /// Decode a message received on an object bound at `version`
            pub fn from_message(msg: #rt::Message, version: u32) -> ::core::result::Result<Self, #rt::Error> {
                let interface = super::#static_name.name;
                let opcode = msg.opcode;
                let object = msg.object;
                match opcode {
                    #(#decode_arms)*
                    _ => ::core::result::Result::Err(#rt::Error::InvalidOpcode { interface, opcode }),
                }
            }
        }
    }
}

fn handler_glue(ctx: &Context, side: Side, interface: &Interface) -> TokenStream {
    let rt = &ctx.rt;
    let handle = camel_ident(&interface.name);
    let handle_trait = side.handle_trait(ctx);
    let incoming = side.incoming_enum();
    let method = side.handler_method();
    let closure_fn = side.closure_fn();
    let closure = quote!(Closure);
    let handler_doc = format!(" Receives the decoded messages of a `{}` object", interface.name);

    quote! {
        #[doc = #handler_doc]
        pub trait Handler: ::core::marker::Send + ::core::marker::Sync + 'static {
            fn #method(
                &self,
                conn: &mut #rt::Connection,
                object: #handle,
                message: #incoming,
            ) -> ::core::result::Result<(), #rt::Error>;

            /// The object was released, by a destructor or by connection close
            fn destroyed(&self, object: #handle) {
                let _ = object;
            }
        }

        /// Adapts a [`Handler`] to the connection's object data
        pub struct Dispatcher<H: Handler>(pub H);

        impl<H: Handler> #rt::ObjectData for Dispatcher<H> {
            fn dispatch(&self, conn: &mut #rt::Connection, msg: #rt::Message) -> ::core::result::Result<(), #rt::Error> {
                let version = conn.object_info(msg.object)?.version;
                let object = <#handle as #handle_trait>::from_id(msg.object);
                let message = #incoming::from_message(msg, version)?;
                self.0.#method(conn, object, message)
            }

            fn destroyed(&self, object: #rt::ObjectId) {
                self.0.destroyed(<#handle as #handle_trait>::from_id(object))
            }
        }

        struct #closure<F>(F);

        impl<F> Handler for #closure<F>
        where
            F: Fn(&mut #rt::Connection, #handle, #incoming) -> ::core::result::Result<(), #rt::Error>
                + ::core::marker::Send
                + ::core::marker::Sync
                + 'static,
        {
            fn #method(
                &self,
                conn: &mut #rt::Connection,
                object: #handle,
                message: #incoming,
            ) -> ::core::result::Result<(), #rt::Error> {
                (self.0)(conn, object, message)
            }
        }

        pub fn handler<H: Handler>(handler: H) -> ::std::sync::Arc<dyn #rt::ObjectData> {
            ::std::sync::Arc::new(Dispatcher(handler))
        }

        pub fn #closure_fn<F>(f: F) -> ::std::sync::Arc<dyn #rt::ObjectData>
        where
            F: Fn(&mut #rt::Connection, #handle, #incoming) -> ::core::result::Result<(), #rt::Error>
                + ::core::marker::Send
                + ::core::marker::Sync
                + 'static,
        {
            handler(#closure(f))
        }
    }
}
